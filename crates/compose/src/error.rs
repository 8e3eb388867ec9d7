use std::fmt;
use thiserror::Error;

/// The kind of resource an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A service declared in the project
    Service,
    /// A machine known to the backend
    Machine,
    /// A network known to the backend
    Network,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Service => write!(f, "service"),
            ResourceKind::Machine => write!(f, "machine"),
            ResourceKind::Network => write!(f, "network"),
        }
    }
}

/// Errors returned by machine and network services.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The named resource does not exist
    #[error("{kind} not found: {name}")]
    NotFound { kind: ResourceKind, name: String },

    /// A resource with this name already exists
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: ResourceKind, name: String },

    /// The resource is in a state that does not allow the operation
    #[error("cannot {operation} machine {name}: machine is {state}")]
    InvalidState {
        name: String,
        state: String,
        operation: String,
    },

    /// The backend does not implement this operation
    #[error("operation not supported by backend: {0}")]
    Unsupported(String),

    /// The backend command failed
    #[error("{0}")]
    Failed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Returns true if the resource was absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }
}

/// Errors that can occur while loading, planning or executing a project.
#[derive(Debug, Error)]
pub enum Error {
    /// The project declaration is malformed or inconsistent
    #[error("invalid project {project}: {}", .problems.join("; "))]
    Validation {
        project: String,
        problems: Vec<String>,
    },

    /// A named service or resource does not exist
    #[error("{kind} not found: {name}")]
    NotFound { kind: ResourceKind, name: String },

    /// An action failed while executing a plan
    #[error("{action} failed: {source}")]
    Action {
        action: String,
        #[source]
        source: BackendError,
    },

    /// Reading the backend inventory failed
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The run was cancelled before every action started
    #[error("operation cancelled")]
    Cancelled,

    /// No backend registered under this name
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// The worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    Pool(String),
}

impl Error {
    /// Returns true if a named service or resource was missing
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Backend(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Returns true if the project failed validation
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// Name of the failing action, if this error came from plan execution
    pub fn failed_action(&self) -> Option<&str> {
        match self {
            Error::Action { action, .. } => Some(action),
            _ => None,
        }
    }

    pub(crate) fn validation(project: &str, problems: Vec<String>) -> Self {
        Error::Validation {
            project: project.to_string(),
            problems,
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let missing = Error::NotFound {
            kind: ResourceKind::Service,
            name: "web".into(),
        };
        assert!(missing.is_not_found());
        assert!(!missing.is_validation());

        let backend_missing = Error::Backend(BackendError::NotFound {
            kind: ResourceKind::Machine,
            name: "web".into(),
        });
        assert!(backend_missing.is_not_found());

        let invalid = Error::validation("demo", vec!["a".into(), "b".into()]);
        assert!(invalid.is_validation());
        assert_eq!(invalid.to_string(), "invalid project demo: a; b");
    }

    #[test]
    fn test_action_error_keeps_identity() {
        let err = Error::Action {
            action: "StartMachine(web)".into(),
            source: BackendError::Failed("boom".into()),
        };
        assert_eq!(err.failed_action(), Some("StartMachine(web)"));
        assert_eq!(err.to_string(), "StartMachine(web) failed: boom");
    }
}
