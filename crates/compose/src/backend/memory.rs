//! In-process backend
//!
//! Keeps machine and network records in memory for the lifetime of the
//! value. Useful for tests and for previewing a project without touching
//! a real hypervisor. Individual commands can be made to fail with
//! [`MemoryBackend::fail_on`], and every command is recorded so callers
//! can assert on what ran. The backend also tracks how many commands were
//! in progress at once, see [`MemoryBackend::peak_concurrency`].

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{Backend, BackendResult, MachineService, NetworkService, Transition};
use crate::error::{BackendError, ResourceKind};
use crate::types::{
    Machine, MachineSpec, MachineState, Network, NetworkSpec, NetworkState, Selector,
};

#[derive(Default)]
struct Store {
    machines: BTreeMap<String, Machine>,
    networks: BTreeMap<String, Network>,
    logs: BTreeMap<String, Vec<String>>,
    calls: Vec<String>,
    failures: HashSet<String>,
    next_uid: u64,
}

impl Store {
    fn uid(&mut self, prefix: &str) -> String {
        self.next_uid += 1;
        format!("{}-{:08x}", prefix, self.next_uid)
    }

    /// Record a command, failing it if it was registered with `fail_on`
    fn record(&mut self, command: &str, name: &str) -> BackendResult<()> {
        let call = format!("{} {}", command, name);
        let fail = self.failures.contains(&call);
        self.calls.push(call);
        if fail {
            return Err(BackendError::Failed(format!(
                "injected failure: {} {}",
                command, name
            )));
        }
        Ok(())
    }
}

/// Backend that keeps everything in memory
#[derive(Default)]
pub struct MemoryBackend {
    store: Mutex<Store>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Marks one command as in progress until dropped
struct Busy<'a>(&'a AtomicUsize);

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every command, to make overlap observable
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make a command fail, e.g. `fail_on("start", "web")`
    pub fn fail_on(&self, command: &str, name: &str) {
        self.lock().failures.insert(format!("{} {}", command, name));
    }

    /// Insert a machine record directly, bypassing `create`
    pub fn insert_machine(&self, project: &str, name: &str, state: MachineState) {
        self.insert_machine_spec(project, MachineSpec::new(name, "unknown"), state);
    }

    /// Insert a machine record with a full spec, bypassing `create`
    pub fn insert_machine_spec(&self, project: &str, spec: MachineSpec, state: MachineState) {
        let mut store = self.lock();
        let uid = store.uid("m");
        store.machines.insert(
            spec.name.clone(),
            Machine {
                name: spec.name.clone(),
                uid,
                project: project.to_string(),
                state,
                spec,
                status: None,
            },
        );
    }

    /// Insert a network record directly, bypassing `create`
    pub fn insert_network(&self, project: &str, name: &str) {
        let mut store = self.lock();
        let uid = store.uid("n");
        store.networks.insert(
            name.to_string(),
            Network {
                name: name.to_string(),
                uid,
                project: project.to_string(),
                state: NetworkState::Up,
                spec: NetworkSpec::new(name),
            },
        );
    }

    /// Commands issued so far, as "command name"
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Current state of a machine, if it exists
    pub fn machine_state(&self, name: &str) -> Option<MachineState> {
        self.lock().machines.get(name).map(|m| m.state)
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.lock().networks.contains_key(name)
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Most commands that were ever in progress at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Enter a command, sleeping for the configured delay
    fn busy(&self) -> Busy<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Busy(&self.in_flight)
    }

    fn transition(&self, name: &str, transition: Transition) -> BackendResult<()> {
        let _busy = self.busy();
        let mut store = self.lock();
        store.record(transition.as_str(), name)?;
        let machine = store
            .machines
            .get_mut(name)
            .ok_or_else(|| machine_not_found(name))?;
        machine.state = transition.apply(name, machine.state)?;
        store
            .logs
            .entry(name.to_string())
            .or_default()
            .push(format!("{}: {}", name, transition.as_str()));
        Ok(())
    }
}

fn machine_not_found(name: &str) -> BackendError {
    BackendError::NotFound {
        kind: ResourceKind::Machine,
        name: name.to_string(),
    }
}

fn network_not_found(name: &str) -> BackendError {
    BackendError::NotFound {
        kind: ResourceKind::Network,
        name: name.to_string(),
    }
}

impl MachineService for MemoryBackend {
    fn list(&self, selector: &Selector) -> BackendResult<Vec<Machine>> {
        Ok(self
            .lock()
            .machines
            .values()
            .filter(|m| selector.matches(&m.project))
            .cloned()
            .collect())
    }

    fn get(&self, name: &str) -> BackendResult<Machine> {
        self.lock()
            .machines
            .get(name)
            .cloned()
            .ok_or_else(|| machine_not_found(name))
    }

    fn create(&self, project: &str, spec: &MachineSpec) -> BackendResult<Machine> {
        let _busy = self.busy();
        let mut store = self.lock();
        store.record("create", &spec.name)?;
        if store.machines.contains_key(&spec.name) {
            return Err(BackendError::AlreadyExists {
                kind: ResourceKind::Machine,
                name: spec.name.clone(),
            });
        }
        let machine = Machine {
            name: spec.name.clone(),
            uid: store.uid("m"),
            project: project.to_string(),
            state: MachineState::Created,
            spec: spec.clone(),
            status: None,
        };
        store.machines.insert(spec.name.clone(), machine.clone());
        store
            .logs
            .entry(spec.name.clone())
            .or_default()
            .push(format!("{}: created from {}", spec.name, spec.image));
        Ok(machine)
    }

    fn start(&self, name: &str) -> BackendResult<()> {
        self.transition(name, Transition::Start)
    }

    fn stop(&self, name: &str) -> BackendResult<()> {
        self.transition(name, Transition::Stop)
    }

    fn pause(&self, name: &str) -> BackendResult<()> {
        self.transition(name, Transition::Pause)
    }

    fn unpause(&self, name: &str) -> BackendResult<()> {
        self.transition(name, Transition::Unpause)
    }

    fn remove(&self, name: &str) -> BackendResult<()> {
        let _busy = self.busy();
        let mut store = self.lock();
        store.record("remove", name)?;
        store
            .machines
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| machine_not_found(name))?;
        store.logs.remove(name);
        Ok(())
    }

    fn logs(&self, name: &str) -> BackendResult<Vec<String>> {
        let store = self.lock();
        if !store.machines.contains_key(name) {
            return Err(machine_not_found(name));
        }
        Ok(store.logs.get(name).cloned().unwrap_or_default())
    }
}

impl NetworkService for MemoryBackend {
    fn list(&self, selector: &Selector) -> BackendResult<Vec<Network>> {
        Ok(self
            .lock()
            .networks
            .values()
            .filter(|n| selector.matches(&n.project))
            .cloned()
            .collect())
    }

    fn get(&self, name: &str) -> BackendResult<Network> {
        self.lock()
            .networks
            .get(name)
            .cloned()
            .ok_or_else(|| network_not_found(name))
    }

    fn create(&self, project: &str, spec: &NetworkSpec) -> BackendResult<Network> {
        let _busy = self.busy();
        let mut store = self.lock();
        store.record("net-create", &spec.name)?;
        if store.networks.contains_key(&spec.name) {
            return Err(BackendError::AlreadyExists {
                kind: ResourceKind::Network,
                name: spec.name.clone(),
            });
        }
        let network = Network {
            name: spec.name.clone(),
            uid: store.uid("n"),
            project: project.to_string(),
            state: NetworkState::Up,
            spec: spec.clone(),
        };
        store.networks.insert(spec.name.clone(), network.clone());
        Ok(network)
    }

    fn remove(&self, name: &str) -> BackendResult<()> {
        let _busy = self.busy();
        let mut store = self.lock();
        store.record("net-remove", name)?;
        let in_use: Vec<String> = store
            .machines
            .values()
            .filter(|m| m.spec.networks.iter().any(|n| n == name))
            .map(|m| m.name.clone())
            .collect();
        if !in_use.is_empty() {
            return Err(BackendError::Failed(format!(
                "network {} is in use by {}",
                name,
                in_use.join(", ")
            )));
        }
        store
            .networks
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| network_not_found(name))
    }

    fn up(&self, name: &str) -> BackendResult<()> {
        self.set_network_state(name, NetworkState::Up, "net-up")
    }

    fn down(&self, name: &str) -> BackendResult<()> {
        self.set_network_state(name, NetworkState::Down, "net-down")
    }
}

impl MemoryBackend {
    fn set_network_state(
        &self,
        name: &str,
        state: NetworkState,
        command: &str,
    ) -> BackendResult<()> {
        let mut store = self.lock();
        store.record(command, name)?;
        let network = store
            .networks
            .get_mut(name)
            .ok_or_else(|| network_not_found(name))?;
        network.state = state;
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn machines(&self) -> &dyn MachineService {
        self
    }

    fn networks(&self) -> &dyn NetworkService {
        self
    }
}
