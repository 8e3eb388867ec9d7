//! File-backed reference backend
//!
//! Machine and network records live in a single JSON file that is rewritten
//! after every change, so separate `kcompose` invocations see each other's
//! work. Machines are simulated: lifecycle commands only move the recorded
//! state, and the transitions themselves are what `logs` shows.

use anyhow::Context;
use chrono::{DateTime, Utc};
use compose::{
    Backend, BackendError, BackendResult, Machine, MachineService, MachineSpec, MachineState,
    Network, NetworkService, NetworkSpec, NetworkState, ResourceKind, Selector, Transition,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Records {
    #[serde(default)]
    machines: BTreeMap<String, Machine>,

    #[serde(default)]
    networks: BTreeMap<String, Network>,

    /// Lifecycle lines per machine
    #[serde(default)]
    logs: BTreeMap<String, Vec<String>>,

    /// Last time the file was written
    last_updated: Option<DateTime<Utc>>,
}

impl Records {
    fn uid(&self, prefix: &str) -> String {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let count = self.machines.len() + self.networks.len();
        format!("{}-{:x}{:04x}", prefix, nanos, count)
    }

    fn log(&mut self, name: &str, line: &str) {
        self.logs
            .entry(name.to_string())
            .or_default()
            .push(format!("{} {}", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"), line));
    }
}

fn status_line(state: MachineState) -> String {
    format!("{} since {}", state, Utc::now().format("%Y-%m-%d %H:%M:%S"))
}

// ============================================================================
// LocalBackend
// ============================================================================

pub struct LocalBackend {
    path: PathBuf,
    records: Mutex<Records>,
}

impl LocalBackend {
    /// Open the state file, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read state file: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse state file: {}", path.display()))?
        } else {
            log::debug!("State file {} does not exist, starting empty", path.display());
            Records::default()
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a change and persist it
    ///
    /// The change is made on a copy that replaces the live records only
    /// once it is on disk, so a failed change or write leaves both as they
    /// were.
    fn update<T>(
        &self,
        change: impl FnOnce(&mut Records) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let mut records = self.lock();
        let mut next = records.clone();
        let out = change(&mut next)?;
        next.last_updated = Some(Utc::now());
        self.save(&next)?;
        *records = next;
        Ok(out)
    }

    fn save(&self, records: &Records) -> BackendResult<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(records)
            .map_err(|e| BackendError::Failed(format!("failed to serialize state: {}", e)))?;

        // Write next to the target and rename, so readers never see half a file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;

        log::trace!("Saved state to {}", self.path.display());
        Ok(())
    }

    fn transition(&self, name: &str, transition: Transition) -> BackendResult<()> {
        self.update(|records| {
            let machine = records
                .machines
                .get_mut(name)
                .ok_or_else(|| not_found(ResourceKind::Machine, name))?;
            let from = machine.state;
            machine.state = transition.apply(name, from)?;
            machine.status = Some(status_line(machine.state));
            let line = format!("{}: {} -> {}", transition.as_str(), from, machine.state);
            records.log(name, &line);
            Ok(())
        })
    }
}

fn not_found(kind: ResourceKind, name: &str) -> BackendError {
    BackendError::NotFound {
        kind,
        name: name.to_string(),
    }
}

impl MachineService for LocalBackend {
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
            .ok_or_else(|| not_found(ResourceKind::Machine, name))
    }

    fn create(&self, project: &str, spec: &MachineSpec) -> BackendResult<Machine> {
        self.update(|records| {
            if records.machines.contains_key(&spec.name) {
                return Err(BackendError::AlreadyExists {
                    kind: ResourceKind::Machine,
                    name: spec.name.clone(),
                });
            }
            if let Some(missing) = spec
                .networks
                .iter()
                .find(|n| !records.networks.contains_key(n.as_str()))
            {
                return Err(not_found(ResourceKind::Network, missing));
            }

            let machine = Machine {
                name: spec.name.clone(),
                uid: records.uid("m"),
                project: project.to_string(),
                state: MachineState::Created,
                spec: spec.clone(),
                status: Some(status_line(MachineState::Created)),
            };
            records.machines.insert(spec.name.clone(), machine.clone());
            records.log(&spec.name, &format!("create: image {}", spec.image));
            Ok(machine)
        })
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
        self.update(|records| {
            let machine = records
                .machines
                .get(name)
                .ok_or_else(|| not_found(ResourceKind::Machine, name))?;
            if machine.state.is_running() || machine.state == MachineState::Paused {
                return Err(BackendError::InvalidState {
                    name: name.to_string(),
                    state: machine.state.to_string(),
                    operation: "remove".to_string(),
                });
            }
            records.machines.remove(name);
            records.logs.remove(name);
            Ok(())
        })
    }

    fn logs(&self, name: &str) -> BackendResult<Vec<String>> {
        let records = self.lock();
        if !records.machines.contains_key(name) {
            return Err(not_found(ResourceKind::Machine, name));
        }
        Ok(records.logs.get(name).cloned().unwrap_or_default())
    }
}

impl NetworkService for LocalBackend {
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
            .ok_or_else(|| not_found(ResourceKind::Network, name))
    }

    fn create(&self, project: &str, spec: &NetworkSpec) -> BackendResult<Network> {
        self.update(|records| {
            if records.networks.contains_key(&spec.name) {
                return Err(BackendError::AlreadyExists {
                    kind: ResourceKind::Network,
                    name: spec.name.clone(),
                });
            }
            let network = Network {
                name: spec.name.clone(),
                uid: records.uid("n"),
                project: project.to_string(),
                state: NetworkState::Up,
                spec: spec.clone(),
            };
            records.networks.insert(spec.name.clone(), network.clone());
            Ok(network)
        })
    }

    fn remove(&self, name: &str) -> BackendResult<()> {
        self.update(|records| {
            let users: Vec<&str> = records
                .machines
                .values()
                .filter(|m| m.spec.networks.iter().any(|n| n == name))
                .map(|m| m.name.as_str())
                .collect();
            if !users.is_empty() {
                return Err(BackendError::Failed(format!(
                    "network {} is in use by {}",
                    name,
                    users.join(", ")
                )));
            }
            records
                .networks
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| not_found(ResourceKind::Network, name))
        })
    }

    fn up(&self, name: &str) -> BackendResult<()> {
        self.set_network_state(name, NetworkState::Up)
    }

    fn down(&self, name: &str) -> BackendResult<()> {
        self.set_network_state(name, NetworkState::Down)
    }
}

impl LocalBackend {
    fn set_network_state(&self, name: &str, state: NetworkState) -> BackendResult<()> {
        self.update(|records| {
            let network = records
                .networks
                .get_mut(name)
                .ok_or_else(|| not_found(ResourceKind::Network, name))?;
            network.state = state;
            Ok(())
        })
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn machines(&self) -> &dyn MachineService {
        self
    }

    fn networks(&self) -> &dyn NetworkService {
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec(name: &str, networks: &[&str]) -> MachineSpec {
        let mut spec = MachineSpec::new(name, "nginx");
        spec.networks = networks.iter().map(|n| (*n).to_string()).collect();
        spec
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("machines.json");

        {
            let backend = LocalBackend::open(&path).unwrap();
            backend.networks().create("demo", &NetworkSpec::new("net1")).unwrap();
            backend.machines().create("demo", &spec("web", &["net1"])).unwrap();
            backend.machines().start("web").unwrap();
        }

        let backend = LocalBackend::open(&path).unwrap();
        let web = backend.machines().get("web").unwrap();
        assert_eq!(web.state, MachineState::Running);
        assert_eq!(web.project, "demo");
        assert!(backend.networks().get("net1").is_ok());
        assert!(!dir.path().join("state").join("machines.json.tmp").exists());
    }

    #[test]
    fn test_logs_record_transitions() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::open(dir.path().join("machines.json")).unwrap();
        backend.machines().create("demo", &spec("web", &[])).unwrap();
        backend.machines().start("web").unwrap();
        backend.machines().stop("web").unwrap();

        let logs = backend.machines().logs("web").unwrap();
        assert_eq!(logs.len(), 3);
        assert!(logs[0].ends_with("create: image nginx"));
        assert!(logs[1].ends_with("start: created -> running"));
        assert!(logs[2].ends_with("stop: running -> exited"));
    }

    #[test]
    fn test_failed_change_is_not_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("machines.json");
        let backend = LocalBackend::open(&path).unwrap();
        backend.machines().create("demo", &spec("web", &[])).unwrap();

        let err = backend.machines().pause("web").unwrap_err();
        assert_eq!(err.to_string(), "cannot pause machine web: machine is created");

        let reopened = LocalBackend::open(&path).unwrap();
        assert_eq!(
            reopened.machines().get("web").unwrap().state,
            MachineState::Created
        );
    }

    #[test]
    fn test_failed_write_keeps_memory_in_sync() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("machines.json");
        let backend = LocalBackend::open(&path).unwrap();
        backend.machines().create("demo", &spec("web", &[])).unwrap();

        // A directory where the temp file goes makes every write fail
        fs::create_dir(dir.path().join("machines.json.tmp")).unwrap();
        assert!(backend.machines().start("web").is_err());
        assert!(backend.machines().create("demo", &spec("db", &[])).is_err());

        assert_eq!(
            backend.machines().get("web").unwrap().state,
            MachineState::Created
        );
        assert!(backend.machines().get("db").unwrap_err().is_not_found());
    }

    #[test]
    fn test_create_requires_networks() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::open(dir.path().join("machines.json")).unwrap();
        let err = backend
            .machines()
            .create("demo", &spec("web", &["missing"]))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_running_machine_cannot_be_removed() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::open(dir.path().join("machines.json")).unwrap();
        backend.machines().create("demo", &spec("web", &[])).unwrap();
        backend.machines().start("web").unwrap();

        assert!(backend.machines().remove("web").is_err());
        backend.machines().stop("web").unwrap();
        backend.machines().remove("web").unwrap();
        assert!(backend.machines().list(&Selector::all()).unwrap().is_empty());
    }

    #[test]
    fn test_network_in_use() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::open(dir.path().join("machines.json")).unwrap();
        backend.networks().create("demo", &NetworkSpec::new("net1")).unwrap();
        backend.machines().create("demo", &spec("web", &["net1"])).unwrap();

        let err = backend.networks().remove("net1").unwrap_err();
        assert_eq!(err.to_string(), "network net1 is in use by web");
        backend.networks().down("net1").unwrap();
        assert_eq!(backend.networks().get("net1").unwrap().state, NetworkState::Down);
    }
}
