//! Status aggregation - rolls machine states up into a project status

use crate::types::{Machine, MachineState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Rank of a state when rolling up; lower wins
///
/// States without a fixed rank sort after `Exited`, in declaration order.
pub fn priority(state: MachineState) -> u8 {
    match state {
        MachineState::Running => 0,
        MachineState::Paused => 1,
        MachineState::Created => 2,
        MachineState::Exited => 3,
        MachineState::Unknown => 4,
        MachineState::Suspended => 5,
        MachineState::Restarting => 6,
        MachineState::Errored => 7,
        MachineState::Failed => 8,
    }
}

/// Aggregate status of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProjectStatus(MachineState);

impl ProjectStatus {
    pub fn state(&self) -> MachineState {
        self.0
    }

    /// Display label; `Exited` reads as "stopped"
    pub fn label(&self) -> &'static str {
        match self.0 {
            MachineState::Exited => "stopped",
            other => other.as_str(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.0 == MachineState::Running
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reduce machine states to one project status
///
/// The highest-priority state present wins. No machines at all reads as
/// stopped.
pub fn aggregate<I>(states: I) -> ProjectStatus
where
    I: IntoIterator<Item = MachineState>,
{
    let state = states
        .into_iter()
        .min_by_key(|s| priority(*s))
        .unwrap_or(MachineState::Exited);
    ProjectStatus(state)
}

/// One row of a project listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    pub name: String,
    pub status: ProjectStatus,
    pub machines: usize,
    pub running: usize,
}

/// Group machines by project label and summarize each project
///
/// Rows come back sorted by project name.
pub fn summarize(machines: &[Machine]) -> Vec<ProjectSummary> {
    let mut by_project: BTreeMap<&str, Vec<MachineState>> = BTreeMap::new();
    for machine in machines {
        by_project
            .entry(machine.project.as_str())
            .or_default()
            .push(machine.state);
    }

    by_project
        .into_iter()
        .map(|(name, states)| ProjectSummary {
            name: name.to_string(),
            status: aggregate(states.iter().copied()),
            machines: states.len(),
            running: states.iter().filter(|s| s.is_running()).count(),
        })
        .collect()
}
