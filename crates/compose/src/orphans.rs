//! Orphan detection - backend resources with no declaration in the project

use crate::inventory::Inventory;
use crate::project::Project;
use crate::types::{Machine, Network};

/// Resources present in the backend but not declared by the project
#[derive(Debug, Clone, Default)]
pub struct Orphans {
    pub machines: Vec<Machine>,
    pub networks: Vec<Network>,
}

impl Orphans {
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty() && self.networks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.machines.len() + self.networks.len()
    }

    /// Names of orphaned machines
    pub fn machine_names(&self) -> Vec<&str> {
        self.machines.iter().map(|m| m.name.as_str()).collect()
    }

    /// Names of orphaned networks
    pub fn network_names(&self) -> Vec<&str> {
        self.networks.iter().map(|n| n.name.as_str()).collect()
    }
}

/// Compute the orphan set for a project
///
/// A machine is orphaned when no service has its name; a network when no
/// declared network has its name. Inventory order is preserved.
pub fn find_orphans(project: &Project, inventory: &Inventory) -> Orphans {
    let (services, networks) = project.declared_names();

    let orphans = Orphans {
        machines: inventory
            .machines
            .iter()
            .filter(|m| !services.contains(m.name.as_str()))
            .cloned()
            .collect(),
        networks: inventory
            .networks
            .iter()
            .filter(|n| !networks.contains(n.name.as_str()))
            .cloned()
            .collect(),
    };

    if !orphans.is_empty() {
        log::debug!(
            "project {} has {} orphaned resources",
            project.name,
            orphans.len()
        );
    }
    orphans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::project::Service;
    use crate::types::{MachineState, NetworkSpec, Selector};

    #[test]
    fn test_find_orphans() {
        let project = Project::new("demo", ".")
            .with_service(Service::new("a", "img"))
            .with_service(Service::new("b", "img"))
            .with_network(NetworkSpec::new("net1"));

        let backend = MemoryBackend::new();
        for name in ["a", "b", "c"] {
            backend.insert_machine("demo", name, MachineState::Running);
        }
        backend.insert_network("demo", "net1");
        backend.insert_network("demo", "stale");

        let inventory = Inventory::fetch(&backend, &Selector::project("demo")).unwrap();
        let orphans = find_orphans(&project, &inventory);

        assert_eq!(orphans.machine_names(), ["c"]);
        assert_eq!(orphans.network_names(), ["stale"]);
        assert_eq!(orphans.len(), 2);
    }

    #[test]
    fn test_no_orphans_when_everything_declared() {
        let project = Project::new("demo", ".").with_service(Service::new("a", "img"));
        let backend = MemoryBackend::new();
        backend.insert_machine("demo", "a", MachineState::Exited);

        let inventory = Inventory::fetch(&backend, &Selector::project("demo")).unwrap();
        assert!(find_orphans(&project, &inventory).is_empty());
    }
}
