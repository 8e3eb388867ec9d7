//! Project model - the validated, in-memory form of a compose file

use crate::error::{Error, ResourceKind, Result};
use crate::types::{MachineSpec, NetworkSpec};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Network drivers the engine knows how to plan for
pub const SUPPORTED_NETWORK_DRIVERS: &[&str] = &["bridge"];

/// Driver used when a network does not name one
pub const DEFAULT_NETWORK_DRIVER: &str = "bridge";

/// A declared service, backed 1:1 by a machine of the same name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    /// Image or kernel reference
    pub image: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Services that must be up before this one
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Declared networks this service attaches to
    #[serde(default)]
    pub networks: Vec<String>,
    /// Follow this service's output by default
    #[serde(default)]
    pub attach: bool,
    #[serde(default)]
    pub environment: Vec<(String, String)>,
    #[serde(default)]
    pub memory: Option<String>,
}

impl Service {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn networks<I, S>(mut self, networks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.networks = networks.into_iter().map(Into::into).collect();
        self
    }

    pub fn attached(mut self) -> Self {
        self.attach = true;
        self
    }

    /// The spec a backend needs to create this service's machine
    pub fn machine_spec(&self) -> MachineSpec {
        MachineSpec {
            name: self.name.clone(),
            image: self.image.clone(),
            args: self.args.clone(),
            networks: self.networks.clone(),
            env: self.environment.clone(),
            memory: self.memory.clone(),
        }
    }
}

/// A declared volume. Volumes are carried for completeness; no action targets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub external: bool,
}

/// A loaded compose project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub workdir: PathBuf,
    #[serde(default)]
    pub spec_file: Option<PathBuf>,
    /// Services in declaration order
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub networks: Vec<NetworkSpec>,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
}

impl Project {
    /// Create an empty project
    pub fn new(name: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            workdir: workdir.into(),
            spec_file: None,
            services: Vec::new(),
            networks: Vec::new(),
            volumes: Vec::new(),
        }
    }

    pub fn with_service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    pub fn with_network(mut self, network: NetworkSpec) -> Self {
        self.networks.push(network);
        self
    }

    pub fn with_volume(mut self, volume: VolumeSpec) -> Self {
        self.volumes.push(volume);
        self
    }

    /// Find a service by name
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Find a network by name
    pub fn network(&self, name: &str) -> Option<&NetworkSpec> {
        self.networks.iter().find(|n| n.name == name)
    }

    /// Resolve a list of service names
    ///
    /// An empty list selects every service. The result keeps declaration
    /// order regardless of the order names were given in.
    pub fn services<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<&Service>> {
        if names.is_empty() {
            return Ok(self.services.iter().collect());
        }

        let wanted: HashSet<&str> = names.iter().map(AsRef::as_ref).collect();
        for name in &wanted {
            if self.service(name).is_none() {
                return Err(Error::NotFound {
                    kind: ResourceKind::Service,
                    name: (*name).to_string(),
                });
            }
        }

        Ok(self
            .services
            .iter()
            .filter(|s| wanted.contains(s.name.as_str()))
            .collect())
    }

    /// Declared machine and network names
    pub fn declared_names(&self) -> (HashSet<&str>, HashSet<&str>) {
        (
            self.services.iter().map(|s| s.name.as_str()).collect(),
            self.networks.iter().map(|n| n.name.as_str()).collect(),
        )
    }

    /// Services attaching to the given network
    pub fn services_on_network<'a>(
        &'a self,
        network: &'a str,
    ) -> impl Iterator<Item = &'a Service> {
        self.services
            .iter()
            .filter(move |s| s.networks.iter().any(|n| n == network))
    }

    /// Check the declaration for duplicates, dangling references and
    /// unsupported settings. Every problem found is reported at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("project name is empty".to_string());
        }

        check_unique("service", self.services.iter().map(|s| s.name.as_str()), &mut problems);
        check_unique("network", self.networks.iter().map(|n| n.name.as_str()), &mut problems);
        check_unique("volume", self.volumes.iter().map(|v| v.name.as_str()), &mut problems);

        for service in &self.services {
            if service.image.trim().is_empty() {
                problems.push(format!("service {} has no image", service.name));
            }
            for dep in &service.depends_on {
                if dep == &service.name {
                    problems.push(format!("service {} depends on itself", service.name));
                } else if self.service(dep).is_none() {
                    problems.push(format!(
                        "service {} depends on undefined service {}",
                        service.name, dep
                    ));
                }
            }
            for net in &service.networks {
                if self.network(net).is_none() {
                    problems.push(format!(
                        "service {} uses undefined network {}",
                        service.name, net
                    ));
                }
            }
        }

        for network in &self.networks {
            if !SUPPORTED_NETWORK_DRIVERS.contains(&network.driver.as_str()) {
                problems.push(format!(
                    "network {} uses unsupported driver {} (supported: {})",
                    network.name,
                    network.driver,
                    SUPPORTED_NETWORK_DRIVERS.join(", ")
                ));
            }
            if network.external && (network.gateway.is_some() || network.netmask.is_some()) {
                problems.push(format!(
                    "network {} is external and cannot set gateway or netmask",
                    network.name
                ));
            }
            if network.gateway.is_some() != network.netmask.is_some() {
                problems.push(format!(
                    "network {} must set gateway and netmask together",
                    network.name
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(&self.name, problems))
        }
    }

    /// Order services so every dependency comes before its dependents
    ///
    /// Only edges between services in `services` are considered. Ties keep
    /// declaration order, so a project without dependencies keeps its order.
    pub fn dependency_order<'a>(&self, services: &[&'a Service]) -> Result<Vec<&'a Service>> {
        let in_scope: HashMap<&str, usize> = services
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();

        let mut emitted = vec![false; services.len()];
        let mut ordered = Vec::with_capacity(services.len());

        while ordered.len() < services.len() {
            let next = services.iter().enumerate().position(|(i, s)| {
                !emitted[i]
                    && s.depends_on.iter().all(|dep| {
                        in_scope.get(dep.as_str()).is_none_or(|&d| emitted[d])
                    })
            });

            match next {
                Some(i) => {
                    emitted[i] = true;
                    ordered.push(services[i]);
                }
                None => {
                    let stuck: Vec<&str> = services
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| !emitted[*i])
                        .map(|(_, s)| s.name.as_str())
                        .collect();
                    return Err(Error::validation(
                        &self.name,
                        vec![format!("dependency cycle between services: {}", stuck.join(", "))],
                    ));
                }
            }
        }

        Ok(ordered)
    }
}

fn check_unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>, problems: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            problems.push(format!("{} with empty name", kind));
        } else if !seen.insert(name) {
            problems.push(format!("duplicate {} name: {}", kind, name));
        }
    }
}
