//! Execution context traits
//!
//! These let the executor report progress and observe cancellation without
//! depending on any particular terminal UI or signal handling.

use crate::error::BackendError;
use crate::planner::Action;
use crate::types::{ExecuteSummary, Visibility};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress callback for plan execution
///
/// Implement this trait to receive progress updates. Calls are serialized
/// by the executor, even when actions run in parallel.
pub trait ProgressCallback: Send {
    /// Called once before any action runs
    fn on_run_start(&mut self, total: usize, visibility: Visibility);

    /// Called when an action starts (or would start, in a dry run)
    fn on_action_start(&mut self, index: usize, action: &Action);

    /// Called when an action succeeds
    fn on_action_success(&mut self, index: usize, action: &Action);

    /// Called when an action fails
    fn on_action_failure(&mut self, index: usize, action: &Action, error: &BackendError);

    /// Called once after the run ends, successful or not
    fn on_run_complete(&mut self, summary: &ExecuteSummary);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize, _visibility: Visibility) {}
    fn on_action_start(&mut self, _index: usize, _action: &Action) {}
    fn on_action_success(&mut self, _index: usize, _action: &Action) {}
    fn on_action_failure(&mut self, _index: usize, _action: &Action, _error: &BackendError) {}
    fn on_run_complete(&mut self, _summary: &ExecuteSummary) {}
}

/// Shared cancellation flag
///
/// Clones observe the same flag. Once cancelled, the executor starts no
/// new actions; actions already running finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }
}
