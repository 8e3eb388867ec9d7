//! Core types shared by the planner, executor and backends

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a machine as reported by its backend
///
/// The engine never assigns these; it only reads them from inventory
/// snapshots to decide which command applies.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    #[default]
    Unknown,
    Created,
    Running,
    Paused,
    Suspended,
    Restarting,
    Exited,
    Errored,
    Failed,
}

impl MachineState {
    /// All states, in declaration order
    pub const ALL: [MachineState; 9] = [
        MachineState::Unknown,
        MachineState::Created,
        MachineState::Running,
        MachineState::Paused,
        MachineState::Suspended,
        MachineState::Restarting,
        MachineState::Exited,
        MachineState::Errored,
        MachineState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MachineState::Unknown => "unknown",
            MachineState::Created => "created",
            MachineState::Running => "running",
            MachineState::Paused => "paused",
            MachineState::Suspended => "suspended",
            MachineState::Restarting => "restarting",
            MachineState::Exited => "exited",
            MachineState::Errored => "errored",
            MachineState::Failed => "failed",
        }
    }

    /// Check if the machine is running
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if `start` applies to a machine in this state
    pub fn is_startable(&self) -> bool {
        matches!(self, Self::Created | Self::Exited)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link state of a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    #[default]
    Unknown,
    Up,
    Down,
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkState::Unknown => write!(f, "unknown"),
            NetworkState::Up => write!(f, "up"),
            NetworkState::Down => write!(f, "down"),
        }
    }
}

/// What a backend needs to create a machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSpec {
    /// Machine name (the service name)
    pub name: String,
    /// Image or kernel reference
    pub image: String,
    /// Arguments passed to the unikernel
    #[serde(default)]
    pub args: Vec<String>,
    /// Networks to attach to
    #[serde(default)]
    pub networks: Vec<String>,
    /// Environment variables, in declaration order
    #[serde(default)]
    pub env: Vec<(String, String)>,
    /// Memory size (e.g. "64Mi")
    #[serde(default)]
    pub memory: Option<String>,
}

impl MachineSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn networks<I, S>(mut self, networks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.networks = networks.into_iter().map(Into::into).collect();
        self
    }
}

/// A machine record from a backend inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub name: String,
    pub uid: String,
    /// Project label the machine was created under
    pub project: String,
    pub state: MachineState,
    pub spec: MachineSpec,
    /// Free-form status text from the backend
    #[serde(default)]
    pub status: Option<String>,
}

/// What a backend needs to create a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    /// Network driver identifier
    pub driver: String,
    /// Lifecycle owned outside the project
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub netmask: Option<String>,
}

impl NetworkSpec {
    /// A project-owned network using the default driver
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: crate::project::DEFAULT_NETWORK_DRIVER.to_string(),
            external: false,
            gateway: None,
            netmask: None,
        }
    }

    /// A network whose lifecycle is owned elsewhere
    pub fn external(name: impl Into<String>) -> Self {
        Self {
            external: true,
            ..Self::new(name)
        }
    }
}

/// A network record from a backend inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub uid: String,
    pub project: String,
    pub state: NetworkState,
    pub spec: NetworkSpec,
}

/// Filter applied by backends when listing resources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    /// Only resources labelled with this project
    pub project: Option<String>,
}

impl Selector {
    /// Select every resource
    pub fn all() -> Self {
        Self::default()
    }

    /// Select resources belonging to one project
    pub fn project(name: impl Into<String>) -> Self {
        Self {
            project: Some(name.into()),
        }
    }

    pub fn matches(&self, project: &str) -> bool {
        self.project.as_deref().is_none_or(|p| p == project)
    }
}

/// A lifecycle operation requested for a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Up,
    Down,
    Start,
    Stop,
    Pause,
    Unpause,
}

impl Operation {
    /// Operations that act on a named service require its machine to exist
    pub fn requires_existing(&self) -> bool {
        matches!(
            self,
            Operation::Start | Operation::Stop | Operation::Pause | Operation::Unpause
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Up => "up",
            Operation::Down => "down",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Pause => "pause",
            Operation::Unpause => "unpause",
        };
        f.write_str(name)
    }
}

/// How many actions may run at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parallelism {
    /// Strict plan order, one action at a time
    #[default]
    Sequential,
    /// Up to `n` independent actions at once
    Bounded(usize),
}

impl Parallelism {
    /// Map a `--jobs` value to a mode; 0 and 1 mean sequential
    pub fn from_jobs(jobs: usize) -> Self {
        if jobs <= 1 {
            Self::Sequential
        } else {
            Self::Bounded(jobs)
        }
    }

    pub fn workers(&self) -> usize {
        match self {
            Parallelism::Sequential => 1,
            Parallelism::Bounded(n) => (*n).max(1),
        }
    }
}

/// Whether completed actions stay visible in progress output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Completed items remain on screen
    #[default]
    Retain,
    /// Completed items are cleared on success
    Clear,
}

/// Options for execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub parallelism: Parallelism,
    pub visibility: Visibility,
    /// Don't call the backend, just report what would happen
    pub dry_run: bool,
}

impl ExecuteOptions {
    pub fn sequential() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: usize) -> Self {
        Self {
            parallelism: Parallelism::from_jobs(jobs),
            ..Default::default()
        }
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Actions reported but not run (dry run)
    pub skipped: usize,
    /// Actions never started because of a failure or cancellation
    pub not_started: usize,
}

impl ExecuteSummary {
    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.not_started == 0
    }

    /// Total number of actions accounted for
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped + self.not_started
    }
}
