use crate::error::BackendError;
use crate::types::{Machine, MachineSpec, MachineState, Network, NetworkSpec, Selector};

pub mod memory;

/// Result type for backend calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Access to machine resources
///
/// Implementations own the machine records; the engine only reads
/// snapshots through `list`/`get` and issues commands.
pub trait MachineService: Send + Sync {
    /// List machines matching the selector
    fn list(&self, selector: &Selector) -> BackendResult<Vec<Machine>>;

    /// Get a single machine by name
    fn get(&self, name: &str) -> BackendResult<Machine>;

    /// Create a machine under a project label
    fn create(&self, project: &str, spec: &MachineSpec) -> BackendResult<Machine>;

    fn start(&self, name: &str) -> BackendResult<()>;

    fn stop(&self, name: &str) -> BackendResult<()>;

    fn pause(&self, name: &str) -> BackendResult<()>;

    fn unpause(&self, name: &str) -> BackendResult<()>;

    fn remove(&self, name: &str) -> BackendResult<()>;

    /// Output captured for a machine
    fn logs(&self, name: &str) -> BackendResult<Vec<String>> {
        Err(BackendError::Unsupported(format!("logs for {}", name)))
    }
}

/// Access to network resources
pub trait NetworkService: Send + Sync {
    fn list(&self, selector: &Selector) -> BackendResult<Vec<Network>>;

    fn get(&self, name: &str) -> BackendResult<Network>;

    fn create(&self, project: &str, spec: &NetworkSpec) -> BackendResult<Network>;

    fn remove(&self, name: &str) -> BackendResult<()>;

    /// Bring the network link up
    fn up(&self, name: &str) -> BackendResult<()>;

    /// Bring the network link down
    fn down(&self, name: &str) -> BackendResult<()>;
}

/// A named machine + network provider
///
/// The planner and executor only ever see this trait; concrete variants
/// are chosen by name when the caller builds its configuration.
pub trait Backend: Send + Sync {
    /// Name the backend is registered under
    fn name(&self) -> &str;

    fn machines(&self) -> &dyn MachineService;

    fn networks(&self) -> &dyn NetworkService;
}

/// Lifecycle commands that change a machine's state in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Stop,
    Pause,
    Unpause,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Stop => "stop",
            Transition::Pause => "pause",
            Transition::Unpause => "unpause",
        }
    }

    /// State a machine ends up in after this command
    ///
    /// Stopping an already stopped machine is accepted and leaves it
    /// unchanged. A machine in an unknown state can always be stopped.
    /// Every other mismatch is an `InvalidState` error.
    pub fn apply(&self, name: &str, from: MachineState) -> BackendResult<MachineState> {
        use MachineState::*;

        let to = match (self, from) {
            (Transition::Start, Created | Exited | Errored | Failed | Suspended) => Some(Running),
            (Transition::Stop, Running | Paused | Restarting | Suspended | Unknown) => {
                Some(Exited)
            }
            (Transition::Stop, Created | Exited | Errored | Failed) => Some(from),
            (Transition::Pause, Running) => Some(Paused),
            (Transition::Unpause, Paused) => Some(Running),
            _ => None,
        };

        to.ok_or_else(|| BackendError::InvalidState {
            name: name.to_string(),
            state: from.to_string(),
            operation: self.as_str().to_string(),
        })
    }
}
