//! Execution engine - runs a plan against a backend
//!
//! Sequential mode runs actions strictly in plan order. Bounded mode runs
//! up to `n` actions at once on a rayon pool, starting an action only once
//! every action it depends on has succeeded. Both modes are fail-fast: after
//! the first failure no new action starts, and actions already running are
//! allowed to finish.

use crate::backend::{Backend, BackendResult};
use crate::context::{CancelToken, ProgressCallback};
use crate::error::{Error, Result};
use crate::planner::{Action, ActionKind, Plan, Target};
use crate::types::{ExecuteOptions, ExecuteSummary, Parallelism};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Execute a plan
///
/// Returns the summary on success. On failure the error names the first
/// failed action; on cancellation the error is [`Error::Cancelled`]. In
/// both cases the progress callback still receives the final summary, and
/// effects of actions that already completed are left in place.
pub fn execute<P: ProgressCallback>(
    plan: &Plan,
    backend: &dyn Backend,
    options: &ExecuteOptions,
    progress: &mut P,
    cancel: &CancelToken,
) -> Result<ExecuteSummary> {
    if plan.is_empty() {
        return Ok(ExecuteSummary::default());
    }

    log::debug!(
        "executing {} actions for {} {} on {} ({:?})",
        plan.len(),
        plan.operation(),
        plan.project(),
        backend.name(),
        options.parallelism
    );

    progress.on_run_start(plan.len(), options.visibility);

    let (summary, failure) = if options.dry_run {
        (dry_run(plan, progress), None)
    } else {
        match options.parallelism {
            Parallelism::Sequential => execute_sequential(plan, backend, progress, cancel),
            Parallelism::Bounded(_) => {
                execute_bounded(plan, backend, options.parallelism.workers(), progress, cancel)?
            }
        }
    };

    progress.on_run_complete(&summary);

    match failure {
        Some(err) => Err(err),
        None => Ok(summary),
    }
}

fn dry_run<P: ProgressCallback>(plan: &Plan, progress: &mut P) -> ExecuteSummary {
    for (index, action) in plan.iter().enumerate() {
        progress.on_action_start(index, action);
        log::info!("would {}", action.describe());
    }
    ExecuteSummary {
        skipped: plan.len(),
        ..Default::default()
    }
}

fn execute_sequential<P: ProgressCallback>(
    plan: &Plan,
    backend: &dyn Backend,
    progress: &mut P,
    cancel: &CancelToken,
) -> (ExecuteSummary, Option<Error>) {
    let mut summary = ExecuteSummary::default();

    for (index, action) in plan.iter().enumerate() {
        if cancel.is_cancelled() {
            summary.not_started = plan.len() - index;
            return (summary, Some(Error::Cancelled));
        }

        progress.on_action_start(index, action);
        match apply_action(plan.project(), action, backend) {
            Ok(()) => {
                summary.succeeded += 1;
                progress.on_action_success(index, action);
            }
            Err(e) => {
                summary.failed += 1;
                summary.not_started = plan.len() - index - 1;
                progress.on_action_failure(index, action, &e);
                return (summary, Some(action_failed(action, e)));
            }
        }
    }

    (summary, None)
}

/// Bookkeeping shared by the workers of a bounded run
struct RunState {
    /// Unfinished dependencies per action
    remaining: Vec<usize>,
    started: usize,
    succeeded: usize,
    failed: usize,
    failure: Option<Error>,
}

struct Run<'r, P> {
    plan: &'r Plan,
    backend: &'r dyn Backend,
    cancel: &'r CancelToken,
    dependents: Vec<Vec<usize>>,
    state: Mutex<RunState>,
    progress: Mutex<&'r mut P>,
}

fn execute_bounded<P: ProgressCallback>(
    plan: &Plan,
    backend: &dyn Backend,
    workers: usize,
    progress: &mut P,
    cancel: &CancelToken,
) -> Result<(ExecuteSummary, Option<Error>)> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| Error::Pool(e.to_string()))?;

    let run = Run {
        plan,
        backend,
        cancel,
        dependents: plan.dependents(),
        state: Mutex::new(RunState {
            remaining: plan.iter().map(|a| a.depends_on.len()).collect(),
            started: 0,
            succeeded: 0,
            failed: 0,
            failure: None,
        }),
        progress: Mutex::new(progress),
    };

    pool.scope(|scope| {
        for (index, action) in plan.iter().enumerate() {
            if action.depends_on.is_empty() {
                run.spawn(scope, index);
            }
        }
    });

    let state = run
        .state
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    let summary = ExecuteSummary {
        succeeded: state.succeeded,
        failed: state.failed,
        skipped: 0,
        not_started: plan.len() - state.started,
    };
    Ok((summary, state.failure))
}

impl<'r, P: ProgressCallback> Run<'r, P> {
    fn spawn<'s>(&'s self, scope: &rayon::Scope<'s>, index: usize) {
        scope.spawn(move |scope| self.run_one(scope, index));
    }

    fn run_one<'s>(&'s self, scope: &rayon::Scope<'s>, index: usize) {
        {
            let mut state = lock(&self.state);
            if state.failure.is_some() {
                return;
            }
            if self.cancel.is_cancelled() {
                state.failure = Some(Error::Cancelled);
                return;
            }
            state.started += 1;
        }

        let action = &self.plan.actions()[index];
        lock(&self.progress).on_action_start(index, action);

        match apply_action(self.plan.project(), action, self.backend) {
            Ok(()) => {
                lock(&self.progress).on_action_success(index, action);
                let ready = self.complete(index);
                for next in ready {
                    self.spawn(scope, next);
                }
            }
            Err(e) => {
                lock(&self.progress).on_action_failure(index, action, &e);
                let mut state = lock(&self.state);
                state.failed += 1;
                if state.failure.is_none() {
                    state.failure = Some(action_failed(action, e));
                }
            }
        }
    }

    /// Record a success and return the dependents that became ready
    fn complete(&self, index: usize) -> Vec<usize> {
        let mut state = lock(&self.state);
        state.succeeded += 1;
        if state.failure.is_some() {
            return Vec::new();
        }
        let mut ready = Vec::new();
        for &next in &self.dependents[index] {
            state.remaining[next] -= 1;
            if state.remaining[next] == 0 {
                ready.push(next);
            }
        }
        ready
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn action_failed(action: &Action, source: crate::error::BackendError) -> Error {
    Error::Action {
        action: action.to_string(),
        source,
    }
}

/// Issue the backend command for one action
fn apply_action(project: &str, action: &Action, backend: &dyn Backend) -> BackendResult<()> {
    log::info!("{}", action.describe());

    let machines = backend.machines();
    let networks = backend.networks();

    let result = match (action.kind, &action.target) {
        (ActionKind::CreateMachine, Target::Machine(spec)) => {
            machines.create(project, spec).map(|_| ())
        }
        (ActionKind::StartMachine, Target::Machine(spec)) => machines.start(&spec.name),
        (ActionKind::StopMachine, Target::Machine(spec)) => machines.stop(&spec.name),
        (ActionKind::PauseMachine, Target::Machine(spec)) => machines.pause(&spec.name),
        (ActionKind::UnpauseMachine, Target::Machine(spec)) => machines.unpause(&spec.name),
        (ActionKind::RemoveMachine, Target::Machine(spec)) => machines.remove(&spec.name),
        (ActionKind::CreateNetwork, Target::Network(spec)) => {
            networks.create(project, spec).map(|_| ())
        }
        (ActionKind::RemoveNetwork, Target::Network(spec)) => networks.remove(&spec.name),
        (kind, target) => Err(crate::error::BackendError::Unsupported(format!(
            "{} on {}",
            kind,
            target.name()
        ))),
    };

    match result {
        Err(e) if e.is_not_found() && action.kind.is_teardown() => {
            log::warn!("{} is already gone", action.name());
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::context::NoProgress;
    use crate::error::BackendError;
    use crate::inventory::Inventory;
    use crate::planner::{PlanOptions, plan};
    use crate::project::{Project, Service};
    use crate::types::{MachineSpec, MachineState, NetworkSpec, Operation, Selector, Visibility};
    use std::time::Duration;

    /// Records every progress event as a string
    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        summary: Option<ExecuteSummary>,
        cancel_on_success: Option<CancelToken>,
    }

    impl ProgressCallback for Recorder {
        fn on_run_start(&mut self, total: usize, _visibility: Visibility) {
            self.events.push(format!("run {}", total));
        }

        fn on_action_start(&mut self, _index: usize, action: &Action) {
            self.events.push(format!("start {}", action));
        }

        fn on_action_success(&mut self, _index: usize, action: &Action) {
            self.events.push(format!("ok {}", action));
            if let Some(token) = &self.cancel_on_success {
                token.cancel();
            }
        }

        fn on_action_failure(&mut self, _index: usize, action: &Action, _error: &BackendError) {
            self.events.push(format!("fail {}", action));
        }

        fn on_run_complete(&mut self, summary: &ExecuteSummary) {
            self.summary = Some(summary.clone());
        }
    }

    fn web_project() -> Project {
        Project::new("demo", ".")
            .with_network(NetworkSpec::new("net1"))
            .with_service(Service::new("web", "nginx").networks(["net1"]))
    }

    fn stack_project() -> Project {
        Project::new("demo", ".")
            .with_network(NetworkSpec::new("net1"))
            .with_service(Service::new("db", "redis").networks(["net1"]))
            .with_service(Service::new("cache", "redis").networks(["net1"]))
            .with_service(
                Service::new("api", "api")
                    .depends_on(["db", "cache"])
                    .networks(["net1"]),
            )
            .with_service(Service::new("web", "nginx").depends_on(["api"]))
    }

    fn plan_for(project: &Project, operation: Operation, backend: &MemoryBackend) -> Plan {
        let inventory = Inventory::fetch(backend, &Selector::project(&project.name)).unwrap();
        plan(project, operation, &inventory, &PlanOptions::default()).unwrap()
    }

    fn machine(name: &str) -> Target {
        Target::Machine(MachineSpec::new(name, "img"))
    }

    /// Run with a fresh cancel token
    fn run<P: ProgressCallback>(
        plan: &Plan,
        backend: &MemoryBackend,
        options: &ExecuteOptions,
        progress: &mut P,
    ) -> Result<ExecuteSummary> {
        execute(plan, backend, options, progress, &CancelToken::new())
    }

    /// Independent start actions on created machines
    fn start_all(backend: &MemoryBackend, names: &[&str]) -> Plan {
        let mut plan = Plan::new("demo", Operation::Start);
        for name in names {
            backend.insert_machine("demo", name, MachineState::Created);
            plan.push(ActionKind::StartMachine, machine(name), Vec::new());
        }
        plan
    }

    fn start_abc(backend: &MemoryBackend) -> Plan {
        start_all(backend, &["a", "b", "c"])
    }

    #[test]
    fn test_up_then_down() {
        let backend = MemoryBackend::new();
        let project = web_project();
        let sequential = ExecuteOptions::sequential();

        let up = plan_for(&project, Operation::Up, &backend);
        let summary = run(&up, &backend, &sequential, &mut NoProgress).unwrap();
        assert_eq!(summary.succeeded, 3);
        assert!(backend.has_network("net1"));
        assert_eq!(backend.machine_state("web"), Some(MachineState::Running));

        // Second up is a no-op
        assert!(plan_for(&project, Operation::Up, &backend).is_empty());

        let down = plan_for(&project, Operation::Down, &backend);
        run(&down, &backend, &sequential, &mut NoProgress).unwrap();
        assert_eq!(backend.machine_state("web"), None);
        assert!(!backend.has_network("net1"));
        assert_eq!(
            backend.calls(),
            [
                "net-create net1",
                "create web",
                "start web",
                "stop web",
                "remove web",
                "net-remove net1",
            ]
        );
    }

    #[test]
    fn test_down_removes_machine_in_unknown_state() {
        let backend = MemoryBackend::new();
        backend.insert_machine("demo", "web", MachineState::Unknown);
        let project = Project::new("demo", ".").with_service(Service::new("web", "nginx"));

        let down = plan_for(&project, Operation::Down, &backend);
        let summary = run(&down, &backend, &ExecuteOptions::sequential(), &mut NoProgress).unwrap();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(backend.machine_state("web"), None);
        assert_eq!(backend.calls(), ["stop web", "remove web"]);
    }

    #[test]
    fn test_down_leaves_network_of_remaining_machine() {
        let backend = MemoryBackend::new();
        let project = web_project();
        let up = plan_for(&project, Operation::Up, &backend);
        run(&up, &backend, &ExecuteOptions::sequential(), &mut NoProgress).unwrap();
        backend.insert_machine_spec(
            "demo",
            MachineSpec::new("old", "nginx").networks(["net1"]),
            MachineState::Running,
        );

        let down = plan_for(&project, Operation::Down, &backend);
        run(&down, &backend, &ExecuteOptions::sequential(), &mut NoProgress).unwrap();
        assert_eq!(backend.machine_state("web"), None);
        assert_eq!(backend.machine_state("old"), Some(MachineState::Running));
        assert!(backend.has_network("net1"));
    }

    #[test]
    fn test_sequential_fail_fast() {
        let backend = MemoryBackend::new();
        let plan = start_abc(&backend);
        backend.fail_on("start", "b");

        let mut recorder = Recorder::default();
        let err = run(&plan, &backend, &ExecuteOptions::sequential(), &mut recorder).unwrap_err();

        assert_eq!(err.failed_action(), Some("StartMachine(b)"));
        assert_eq!(backend.calls(), ["start a", "start b"]);
        // Completed work is not rolled back
        assert_eq!(backend.machine_state("a"), Some(MachineState::Running));
        assert_eq!(backend.machine_state("c"), Some(MachineState::Created));

        let summary = recorder.summary.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.not_started, 1);
    }

    #[test]
    fn test_sequential_never_overlaps() {
        let backend = MemoryBackend::new().with_delay(Duration::from_millis(5));
        let plan = start_abc(&backend);

        run(&plan, &backend, &ExecuteOptions::sequential(), &mut NoProgress).unwrap();
        assert_eq!(backend.peak_concurrency(), 1);
    }

    #[test]
    fn test_bounded_respects_dependencies() {
        let backend = MemoryBackend::new().with_delay(Duration::from_millis(5));
        let project = stack_project();
        let up = plan_for(&project, Operation::Up, &backend);

        let summary = run(&up, &backend, &ExecuteOptions::with_jobs(4), &mut NoProgress).unwrap();
        assert_eq!(summary.succeeded, up.len());

        let calls = backend.calls();
        let at = |call: &str| calls.iter().position(|c| c == call).unwrap();
        assert!(at("net-create net1") < at("create db"));
        assert!(at("start db") < at("create api"));
        assert!(at("start cache") < at("create api"));
        assert!(at("start api") < at("create web"));
        for name in ["db", "cache", "api", "web"] {
            assert_eq!(backend.machine_state(name), Some(MachineState::Running));
        }
    }

    #[test]
    fn test_bounded_concurrency_stays_within_limit() {
        let backend = MemoryBackend::new().with_delay(Duration::from_millis(30));
        let plan = start_all(&backend, &["a", "b", "c", "d", "e", "f"]);

        let summary = run(&plan, &backend, &ExecuteOptions::with_jobs(2), &mut NoProgress).unwrap();
        assert_eq!(summary.succeeded, 6);
        // Independent starts overlap, but never beyond two at a time
        assert_eq!(backend.peak_concurrency(), 2);
    }

    #[test]
    fn test_bounded_fail_fast_skips_dependents() {
        let backend = MemoryBackend::new();
        let mut plan = Plan::new("demo", Operation::Start);
        for name in ["a", "b", "c"] {
            backend.insert_machine("demo", name, MachineState::Created);
        }
        let a = plan.push(ActionKind::StartMachine, machine("a"), vec![]);
        let b = plan.push(ActionKind::StartMachine, machine("b"), vec![a]);
        plan.push(ActionKind::StartMachine, machine("c"), vec![b]);
        backend.fail_on("start", "b");

        let mut recorder = Recorder::default();
        let err = run(&plan, &backend, &ExecuteOptions::with_jobs(2), &mut recorder).unwrap_err();

        assert_eq!(err.failed_action(), Some("StartMachine(b)"));
        assert_eq!(backend.calls(), ["start a", "start b"]);
        assert_eq!(
            recorder.summary,
            Some(ExecuteSummary {
                succeeded: 1,
                failed: 1,
                skipped: 0,
                not_started: 1,
            })
        );
    }

    #[test]
    fn test_cancel_before_start() {
        let backend = MemoryBackend::new();
        let plan = start_abc(&backend);
        let cancel = CancelToken::new();
        cancel.cancel();

        for options in [ExecuteOptions::sequential(), ExecuteOptions::with_jobs(2)] {
            let mut recorder = Recorder::default();
            let err = execute(&plan, &backend, &options, &mut recorder, &cancel).unwrap_err();
            assert!(matches!(err, Error::Cancelled));
        }
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_cancel_stops_new_actions() {
        let backend = MemoryBackend::new();
        let plan = start_abc(&backend);
        let cancel = CancelToken::new();
        let mut recorder = Recorder {
            cancel_on_success: Some(cancel.clone()),
            ..Default::default()
        };

        let options = ExecuteOptions::sequential();
        let err = execute(&plan, &backend, &options, &mut recorder, &cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(backend.calls(), ["start a"]);
        assert_eq!(recorder.summary.unwrap().not_started, 2);
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let backend = MemoryBackend::new();
        let up = plan_for(&web_project(), Operation::Up, &backend);
        let options = ExecuteOptions {
            dry_run: true,
            ..Default::default()
        };

        let mut recorder = Recorder::default();
        let summary = run(&up, &backend, &options, &mut recorder).unwrap();
        assert_eq!(summary.skipped, 3);
        assert!(backend.calls().is_empty());
        assert_eq!(
            recorder.events,
            [
                "run 3",
                "start CreateNetwork(net1)",
                "start CreateMachine(web)",
                "start StartMachine(web)",
            ]
        );
    }

    #[test]
    fn test_progress_events_in_order() {
        let backend = MemoryBackend::new();
        let plan = start_abc(&backend);
        let mut recorder = Recorder::default();

        run(&plan, &backend, &ExecuteOptions::sequential(), &mut recorder).unwrap();
        assert_eq!(
            recorder.events,
            [
                "run 3",
                "start StartMachine(a)",
                "ok StartMachine(a)",
                "start StartMachine(b)",
                "ok StartMachine(b)",
                "start StartMachine(c)",
                "ok StartMachine(c)",
            ]
        );
    }

    #[test]
    fn test_teardown_of_missing_machine_succeeds() {
        let backend = MemoryBackend::new();
        let mut plan = Plan::new("demo", Operation::Down);
        let stop = plan.push(ActionKind::StopMachine, machine("ghost"), vec![]);
        plan.push(ActionKind::RemoveMachine, machine("ghost"), vec![stop]);

        let summary = run(&plan, &backend, &ExecuteOptions::sequential(), &mut NoProgress).unwrap();
        assert_eq!(summary.succeeded, 2);
    }

    #[test]
    fn test_start_of_missing_machine_fails() {
        let backend = MemoryBackend::new();
        let mut plan = Plan::new("demo", Operation::Start);
        plan.push(ActionKind::StartMachine, machine("ghost"), vec![]);

        let err = run(&plan, &backend, &ExecuteOptions::sequential(), &mut NoProgress).unwrap_err();
        assert_eq!(
            err.to_string(),
            "StartMachine(ghost) failed: machine not found: ghost"
        );
    }
}
