//! Snapshot of what a backend currently holds for a project

use crate::backend::Backend;
use crate::error::Result;
use crate::types::{Machine, MachineState, Network, Selector};

/// Machines and networks read from a backend at one point in time
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub machines: Vec<Machine>,
    pub networks: Vec<Network>,
}

impl Inventory {
    pub fn new(machines: Vec<Machine>, networks: Vec<Network>) -> Self {
        Self { machines, networks }
    }

    /// Read both inventories from a backend
    pub fn fetch(backend: &dyn Backend, selector: &Selector) -> Result<Self> {
        let machines = backend.machines().list(selector)?;
        let networks = backend.networks().list(selector)?;
        log::debug!(
            "inventory from {}: {} machines, {} networks",
            backend.name(),
            machines.len(),
            networks.len()
        );
        Ok(Self { machines, networks })
    }

    pub fn machine(&self, name: &str) -> Option<&Machine> {
        self.machines.iter().find(|m| m.name == name)
    }

    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.name == name)
    }

    /// States of every machine in the snapshot
    pub fn machine_states(&self) -> impl Iterator<Item = MachineState> + '_ {
        self.machines.iter().map(|m| m.state)
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty() && self.networks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;

    #[test]
    fn test_fetch_scopes_to_project() {
        let backend = MemoryBackend::new();
        backend.insert_machine("demo", "web", MachineState::Running);
        backend.insert_machine("other", "db", MachineState::Exited);
        backend.insert_network("demo", "net1");

        let inventory = Inventory::fetch(&backend, &Selector::project("demo")).unwrap();
        assert_eq!(inventory.machines.len(), 1);
        assert!(inventory.machine("web").is_some());
        assert!(inventory.machine("db").is_none());
        assert!(inventory.network("net1").is_some());
        assert_eq!(
            inventory.machine_states().collect::<Vec<_>>(),
            [MachineState::Running]
        );
    }
}
