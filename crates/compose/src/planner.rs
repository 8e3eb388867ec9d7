//! State reconciler - turns a project plus a backend inventory into a plan
//!
//! The plan is an ordered list of actions. Each action may name earlier
//! actions it has to wait for; the list order is always a valid order to
//! run them in one at a time.

use crate::error::{Error, ResourceKind, Result};
use crate::inventory::Inventory;
use crate::orphans::{Orphans, find_orphans};
use crate::project::{Project, Service};
use crate::types::{Machine, MachineSpec, MachineState, NetworkSpec, Operation};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A lifecycle command against a single resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    CreateMachine,
    StartMachine,
    StopMachine,
    PauseMachine,
    UnpauseMachine,
    RemoveMachine,
    CreateNetwork,
    RemoveNetwork,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::CreateMachine => "CreateMachine",
            ActionKind::StartMachine => "StartMachine",
            ActionKind::StopMachine => "StopMachine",
            ActionKind::PauseMachine => "PauseMachine",
            ActionKind::UnpauseMachine => "UnpauseMachine",
            ActionKind::RemoveMachine => "RemoveMachine",
            ActionKind::CreateNetwork => "CreateNetwork",
            ActionKind::RemoveNetwork => "RemoveNetwork",
        }
    }

    /// Present-tense verb for progress output
    pub fn verb(&self) -> &'static str {
        match self {
            ActionKind::CreateMachine | ActionKind::CreateNetwork => "create",
            ActionKind::StartMachine => "start",
            ActionKind::StopMachine => "stop",
            ActionKind::PauseMachine => "pause",
            ActionKind::UnpauseMachine => "unpause",
            ActionKind::RemoveMachine | ActionKind::RemoveNetwork => "remove",
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ActionKind::CreateNetwork | ActionKind::RemoveNetwork)
    }

    /// Teardown commands treat an already absent resource as done
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            ActionKind::StopMachine | ActionKind::RemoveMachine | ActionKind::RemoveNetwork
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resource an action operates on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Machine(MachineSpec),
    Network(NetworkSpec),
}

impl Target {
    pub fn name(&self) -> &str {
        match self {
            Target::Machine(spec) => &spec.name,
            Target::Network(spec) => &spec.name,
        }
    }
}

/// One planned command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    pub target: Target,
    /// Indices of earlier actions that must succeed first
    pub depends_on: Vec<usize>,
}

impl Action {
    /// Name of the targeted resource
    pub fn name(&self) -> &str {
        self.target.name()
    }

    /// Human-readable description, e.g. "start machine web"
    pub fn describe(&self) -> String {
        let noun = if self.kind.is_network() {
            "network"
        } else {
            "machine"
        };
        format!("{} {} {}", self.kind.verb(), noun, self.name())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.name())
    }
}

/// Ordered actions for one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    project: String,
    operation: Operation,
    actions: Vec<Action>,
}

impl Plan {
    /// Create a new empty plan
    pub fn new(project: impl Into<String>, operation: Operation) -> Self {
        Self {
            project: project.into(),
            operation,
            actions: Vec::new(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Check if plan is empty
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Action> {
        self.actions.iter()
    }

    /// Append an action and return its index
    ///
    /// Dependencies must point at actions already in the plan.
    pub fn push(&mut self, kind: ActionKind, target: Target, mut depends_on: Vec<usize>) -> usize {
        let index = self.actions.len();
        depends_on.sort_unstable();
        depends_on.dedup();
        debug_assert!(
            depends_on.iter().all(|&d| d < index),
            "plan dependencies must point backwards"
        );
        self.actions.push(Action {
            kind,
            target,
            depends_on,
        });
        index
    }

    /// Index of the action of `kind` targeting `name`
    pub fn position(&self, kind: ActionKind, name: &str) -> Option<usize> {
        self.actions
            .iter()
            .position(|a| a.kind == kind && a.name() == name)
    }

    /// For every action, the indices of actions that depend on it
    pub fn dependents(&self) -> Vec<Vec<usize>> {
        let mut dependents = vec![Vec::new(); self.actions.len()];
        for (index, action) in self.actions.iter().enumerate() {
            for &dep in &action.depends_on {
                dependents[dep].push(index);
            }
        }
        dependents
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a Action;
    type IntoIter = std::slice::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}

/// Per-call planning options
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Restrict the operation to these services; empty means all
    pub services: Vec<String>,
    /// On `down`, also tear down resources the project no longer declares
    pub remove_orphans: bool,
}

impl PlanOptions {
    pub fn scoped<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            services: services.into_iter().map(Into::into).collect(),
            remove_orphans: false,
        }
    }

    pub fn with_orphans(mut self) -> Self {
        self.remove_orphans = true;
        self
    }

    pub fn is_scoped(&self) -> bool {
        !self.services.is_empty()
    }
}

/// Build the plan for `operation`
///
/// Fails with `NotFound` when a named service does not exist, or when a
/// scoped start/stop/pause/unpause names a service without a machine.
/// Fails with `Validation` when the services in scope form a dependency
/// cycle.
pub fn plan(
    project: &Project,
    operation: Operation,
    inventory: &Inventory,
    options: &PlanOptions,
) -> Result<Plan> {
    let mut planner = Planner {
        project,
        inventory,
        options,
        plan: Plan::new(&project.name, operation),
    };

    match operation {
        Operation::Up => planner.up()?,
        Operation::Down => planner.down()?,
        Operation::Start => planner.start()?,
        Operation::Stop => planner.stop()?,
        Operation::Pause => planner.toggle(MachineState::Running, ActionKind::PauseMachine)?,
        Operation::Unpause => planner.toggle(MachineState::Paused, ActionKind::UnpauseMachine)?,
    }

    log::debug!(
        "planned {} actions for {} {}",
        planner.plan.len(),
        operation,
        project.name
    );
    Ok(planner.plan)
}

struct Planner<'a> {
    project: &'a Project,
    inventory: &'a Inventory,
    options: &'a PlanOptions,
    plan: Plan,
}

impl<'a> Planner<'a> {
    /// Services in scope, dependencies first
    fn services(&self) -> Result<Vec<&'a Service>> {
        let selected = self.project.services(&self.options.services)?;
        self.project.dependency_order(&selected)
    }

    /// The machine backing a service
    ///
    /// A missing machine is an error for scoped operations and a skip
    /// otherwise.
    fn existing(&self, service: &Service) -> Result<Option<&'a Machine>> {
        match self.inventory.machine(&service.name) {
            Some(machine) => Ok(Some(machine)),
            None if self.options.is_scoped() && self.plan.operation().requires_existing() => {
                Err(Error::NotFound {
                    kind: ResourceKind::Machine,
                    name: service.name.clone(),
                })
            }
            None => {
                log::warn!("service {} has no machine, skipping", service.name);
                Ok(None)
            }
        }
    }

    fn up(&mut self) -> Result<()> {
        let services = self.services()?;

        let wanted: HashSet<&str> = if self.options.is_scoped() {
            services
                .iter()
                .flat_map(|s| s.networks.iter().map(String::as_str))
                .collect()
        } else {
            self.project.networks.iter().map(|n| n.name.as_str()).collect()
        };

        let mut created_networks: HashMap<&str, usize> = HashMap::new();
        for network in &self.project.networks {
            if !wanted.contains(network.name.as_str()) {
                continue;
            }
            if network.external {
                log::debug!("network {} is external, not creating", network.name);
                continue;
            }
            if self.inventory.network(&network.name).is_some() {
                log::debug!("network {} already exists", network.name);
                continue;
            }
            let index = self.plan.push(
                ActionKind::CreateNetwork,
                Target::Network(network.clone()),
                Vec::new(),
            );
            created_networks.insert(&network.name, index);
        }

        // Index of the action that brings each service up
        let mut ready: HashMap<&str, usize> = HashMap::new();
        for service in services {
            let mut deps: Vec<usize> = service
                .networks
                .iter()
                .filter_map(|n| created_networks.get(n.as_str()).copied())
                .collect();
            deps.extend(
                service
                    .depends_on
                    .iter()
                    .filter_map(|d| ready.get(d.as_str()).copied()),
            );

            let last = match self.inventory.machine(&service.name) {
                None => {
                    let target = Target::Machine(service.machine_spec());
                    let create = self.plan.push(ActionKind::CreateMachine, target.clone(), deps);
                    Some(self.plan.push(ActionKind::StartMachine, target, vec![create]))
                }
                Some(machine) => self.bring_up(machine, deps),
            };

            if let Some(index) = last {
                ready.insert(&service.name, index);
            }
        }

        Ok(())
    }

    /// Action for an existing machine during `up`
    fn bring_up(&mut self, machine: &Machine, deps: Vec<usize>) -> Option<usize> {
        let target = Target::Machine(machine.spec.clone());
        match machine.state {
            MachineState::Running => {
                log::debug!("machine {} is already running", machine.name);
                None
            }
            MachineState::Paused => Some(self.plan.push(ActionKind::UnpauseMachine, target, deps)),
            MachineState::Created
            | MachineState::Exited
            | MachineState::Errored
            | MachineState::Failed
            | MachineState::Suspended => {
                Some(self.plan.push(ActionKind::StartMachine, target, deps))
            }
            MachineState::Restarting | MachineState::Unknown => {
                log::warn!(
                    "machine {} is {}, leaving it alone",
                    machine.name,
                    machine.state
                );
                None
            }
        }
    }

    fn down(&mut self) -> Result<()> {
        let services = self.services()?;
        let in_scope: HashSet<&str> = services.iter().map(|s| s.name.as_str()).collect();

        let mut stops: HashMap<&str, usize> = HashMap::new();
        let mut removals: Vec<usize> = Vec::new();
        let mut torn_down: HashSet<String> = HashSet::new();

        // Dependents are torn down before what they depend on
        for service in services.iter().rev() {
            let Some(machine) = self.inventory.machine(&service.name) else {
                log::warn!("machine {} not found, nothing to remove", service.name);
                continue;
            };

            let deps: Vec<usize> = services
                .iter()
                .filter(|other| other.depends_on.contains(&service.name))
                .filter_map(|other| stops.get(other.name.as_str()).copied())
                .collect();

            let (stop, remove) = self.teardown_machine(machine, deps);
            stops.insert(&service.name, stop);
            removals.push(remove);
            torn_down.insert(machine.name.clone());
        }

        let orphans = if self.options.remove_orphans {
            find_orphans(self.project, self.inventory)
        } else {
            Orphans::default()
        };

        for machine in &orphans.machines {
            log::info!("removing orphaned machine {}", machine.name);
            let (_, remove) = self.teardown_machine(machine, Vec::new());
            removals.push(remove);
            torn_down.insert(machine.name.clone());
        }

        // Machines this plan leaves behind keep their networks in use
        let inventory = self.inventory;
        let survivors: Vec<&Machine> = inventory
            .machines
            .iter()
            .filter(|m| !torn_down.contains(&m.name))
            .collect();

        // Networks go last, after every machine that could be attached
        for network in &self.project.networks {
            if network.external {
                continue;
            }
            if self.inventory.network(&network.name).is_none() {
                log::debug!("network {} not found, nothing to remove", network.name);
                continue;
            }
            if self.options.is_scoped() && !self.network_in_scope(&network.name, &in_scope) {
                log::debug!(
                    "network {} is used outside the selected services, keeping it",
                    network.name
                );
                continue;
            }
            if in_use(&network.name, &survivors) {
                continue;
            }
            self.plan.push(
                ActionKind::RemoveNetwork,
                Target::Network(network.clone()),
                removals.clone(),
            );
        }

        for network in &orphans.networks {
            if in_use(&network.name, &survivors) {
                continue;
            }
            log::info!("removing orphaned network {}", network.name);
            self.plan.push(
                ActionKind::RemoveNetwork,
                Target::Network(network.spec.clone()),
                removals.clone(),
            );
        }

        Ok(())
    }

    fn teardown_machine(&mut self, machine: &Machine, deps: Vec<usize>) -> (usize, usize) {
        let target = Target::Machine(machine.spec.clone());
        let stop = self.plan.push(ActionKind::StopMachine, target.clone(), deps);
        let remove = self.plan.push(ActionKind::RemoveMachine, target, vec![stop]);
        (stop, remove)
    }

    /// A scoped `down` only removes a network that some selected service
    /// uses and that no unselected service uses
    fn network_in_scope(&self, network: &str, in_scope: &HashSet<&str>) -> bool {
        let mut users = self.project.services_on_network(network).peekable();
        users.peek().is_some() && users.all(|s| in_scope.contains(s.name.as_str()))
    }

    fn start(&mut self) -> Result<()> {
        let services = self.services()?;
        let mut started: HashMap<&str, usize> = HashMap::new();

        for service in services {
            let Some(machine) = self.existing(service)? else {
                continue;
            };
            if !machine.state.is_startable() {
                log::debug!("machine {} is {}, not starting", machine.name, machine.state);
                continue;
            }
            let deps: Vec<usize> = service
                .depends_on
                .iter()
                .filter_map(|d| started.get(d.as_str()).copied())
                .collect();
            let index = self.plan.push(
                ActionKind::StartMachine,
                Target::Machine(machine.spec.clone()),
                deps,
            );
            started.insert(&service.name, index);
        }

        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let services = self.services()?;
        let mut stopped: HashMap<&str, usize> = HashMap::new();

        for service in services.iter().rev() {
            let Some(machine) = self.existing(service)? else {
                continue;
            };
            if !machine.state.is_running() {
                log::debug!("machine {} is {}, not stopping", machine.name, machine.state);
                continue;
            }
            let deps: Vec<usize> = services
                .iter()
                .filter(|other| other.depends_on.contains(&service.name))
                .filter_map(|other| stopped.get(other.name.as_str()).copied())
                .collect();
            let index = self.plan.push(
                ActionKind::StopMachine,
                Target::Machine(machine.spec.clone()),
                deps,
            );
            stopped.insert(&service.name, index);
        }

        Ok(())
    }

    /// Pause or unpause every machine currently in `from`
    fn toggle(&mut self, from: MachineState, kind: ActionKind) -> Result<()> {
        for service in self.services()? {
            let Some(machine) = self.existing(service)? else {
                continue;
            };
            if machine.state != from {
                log::debug!(
                    "machine {} is {}, skipping {}",
                    machine.name,
                    machine.state,
                    kind.verb()
                );
                continue;
            }
            self.plan
                .push(kind, Target::Machine(machine.spec.clone()), Vec::new());
        }
        Ok(())
    }
}

/// Whether a machine that outlives the plan is attached to the network
fn in_use(network: &str, survivors: &[&Machine]) -> bool {
    let users: Vec<&str> = survivors
        .iter()
        .filter(|m| m.spec.networks.iter().any(|n| n == network))
        .map(|m| m.name.as_str())
        .collect();
    if users.is_empty() {
        return false;
    }
    log::warn!(
        "network {} is still used by {}, keeping it",
        network,
        users.join(", ")
    );
    true
}
