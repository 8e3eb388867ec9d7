//! Compose file discovery and parsing
//!
//! Reads `kcompose.yaml`, `compose.yaml` and friends (YAML or JSON) into a
//! [`compose::Project`]. Services, networks and volumes keep the order they
//! are written in, which is the tie-break order the planner uses.

use anyhow::{Context, Result, bail};
use compose::{NetworkSpec, Project, Service, VolumeSpec};
use serde::de::{Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// File names looked for in the working directory, in priority order
pub const COMPOSE_FILE_NAMES: &[&str] = &[
    "kcompose.yaml",
    "kcompose.yml",
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
    "kcompose.json",
];

// ============================================================================
// Raw File Format
// ============================================================================

/// A map that keeps document order
#[derive(Debug)]
struct Ordered<T>(Vec<(String, T)>);

impl<T> Default for Ordered<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Ordered<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
            type Value = Ordered<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, T>()? {
                    entries.push((key, value));
                }
                Ok(Ordered(entries))
            }

            // `services:` with nothing under it
            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(Ordered(Vec::new()))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawFile {
    name: Option<String>,
    #[serde(default)]
    services: Ordered<RawService>,
    #[serde(default)]
    networks: Ordered<Option<RawNetwork>>,
    #[serde(default)]
    volumes: Ordered<Option<RawVolume>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawService {
    image: Option<String>,
    command: Option<Command>,
    #[serde(default)]
    depends_on: Names,
    #[serde(default)]
    networks: Names,
    #[serde(default)]
    environment: Environment,
    #[serde(alias = "mem_limit")]
    memory: Option<String>,
    attach: Option<bool>,
}

/// `command: "a b"` or `command: [a, b]`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Command {
    Line(String),
    Args(Vec<String>),
}

impl Command {
    fn into_args(self) -> Vec<String> {
        match self {
            Command::Line(line) => line.split_whitespace().map(String::from).collect(),
            Command::Args(args) => args,
        }
    }
}

/// `[a, b]`, or a map whose keys are the names
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Names {
    List(Vec<String>),
    Map(Ordered<IgnoredAny>),
}

impl Default for Names {
    fn default() -> Self {
        Names::List(Vec::new())
    }
}

impl Names {
    fn into_vec(self) -> Vec<String> {
        match self {
            Names::List(names) => names,
            Names::Map(map) => map.0.into_iter().map(|(name, _)| name).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// `[KEY=value]` or `{KEY: value}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Environment {
    List(Vec<String>),
    Map(Ordered<Option<Scalar>>),
}

impl Default for Environment {
    fn default() -> Self {
        Environment::List(Vec::new())
    }
}

impl Environment {
    fn into_pairs(self) -> Vec<(String, String)> {
        match self {
            Environment::List(items) => items
                .into_iter()
                .map(|item| match item.split_once('=') {
                    Some((key, value)) => (key.to_string(), value.to_string()),
                    None => (item, String::new()),
                })
                .collect(),
            Environment::Map(map) => map
                .0
                .into_iter()
                .map(|(key, value)| (key, value.map(|v| v.to_string()).unwrap_or_default()))
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawNetwork {
    driver: Option<String>,
    #[serde(default)]
    external: bool,
    ipam: Option<RawIpam>,
}

#[derive(Debug, Deserialize)]
struct RawIpam {
    #[serde(default)]
    config: Vec<RawIpamConfig>,
}

#[derive(Debug, Deserialize)]
struct RawIpamConfig {
    subnet: Option<String>,
    gateway: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawVolume {
    driver: Option<String>,
    #[serde(default)]
    external: bool,
}

// ============================================================================
// Discovery
// ============================================================================

/// Find the compose file in `dir`
pub fn find_compose_file(dir: &Path) -> Result<PathBuf> {
    for name in COMPOSE_FILE_NAMES {
        let candidate = dir.join(name);
        if candidate.is_file() {
            log::debug!("Found compose file {}", candidate.display());
            return Ok(candidate);
        }
    }
    bail!(
        "No compose file found in {} (looked for {})",
        dir.display(),
        COMPOSE_FILE_NAMES.join(", ")
    )
}

/// Load the project from `file`, or from the file discovered in `workdir`
pub fn load(workdir: &Path, file: Option<&Path>, project_name: Option<&str>) -> Result<Project> {
    let path = match file {
        Some(file) => workdir.join(file),
        None => find_compose_file(workdir)?,
    };
    load_file(&path, project_name)
}

/// Load a project from a specific file
///
/// The project name is `project_name` if given, else the file's `name:`,
/// else the name of the directory holding the file.
pub fn load_file(path: &Path, project_name: Option<&str>) -> Result<Project> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;

    let raw: RawFile = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid compose file: {}", path.display()))?
    } else {
        serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Invalid compose file: {}", path.display()))?
    };

    let workdir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let name = match project_name.or(raw.name.as_deref()) {
        Some(name) => sanitize_project_name(name),
        None => default_project_name(&workdir),
    };

    let mut project = Project::new(name, workdir);
    project.spec_file = Some(path.to_path_buf());

    for (name, raw) in raw.networks.0 {
        project.networks.push(network_spec(name, raw.unwrap_or_default())?);
    }

    for (name, raw) in raw.volumes.0 {
        let raw = raw.unwrap_or_default();
        project.volumes.push(VolumeSpec {
            name,
            driver: raw.driver,
            external: raw.external,
        });
    }

    for (name, raw) in raw.services.0 {
        project.services.push(Service {
            name,
            image: raw.image.unwrap_or_default(),
            args: raw.command.map(Command::into_args).unwrap_or_default(),
            depends_on: raw.depends_on.into_vec(),
            networks: raw.networks.into_vec(),
            attach: raw.attach.unwrap_or(true),
            environment: raw.environment.into_pairs(),
            memory: raw.memory,
        });
    }

    log::debug!(
        "Loaded project {} from {}: {} services, {} networks",
        project.name,
        path.display(),
        project.services.len(),
        project.networks.len()
    );
    Ok(project)
}

fn network_spec(name: String, raw: RawNetwork) -> Result<NetworkSpec> {
    let mut spec = if raw.external {
        NetworkSpec::external(name)
    } else {
        NetworkSpec::new(name)
    };
    if let Some(driver) = raw.driver {
        spec.driver = driver;
    }

    if let Some(config) = raw.ipam.and_then(|ipam| ipam.config.into_iter().next()) {
        if let Some(subnet) = &config.subnet {
            let (network, netmask) = parse_subnet(subnet)
                .with_context(|| format!("Invalid subnet for network {}", spec.name))?;
            spec.netmask = Some(netmask.to_string());
            let gateway = match config.gateway {
                Some(gateway) => gateway,
                None => first_host(network, netmask)
                    .with_context(|| {
                        format!(
                            "Subnet {} of network {} has no host address for a gateway",
                            subnet, spec.name
                        )
                    })?
                    .to_string(),
            };
            spec.gateway = Some(gateway);
        } else {
            spec.gateway = config.gateway;
        }
    }

    Ok(spec)
}

/// Split `10.0.0.0/24` into network address and netmask
fn parse_subnet(subnet: &str) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let (addr, prefix) = subnet
        .split_once('/')
        .with_context(|| format!("expected CIDR notation, got {}", subnet))?;
    let addr: Ipv4Addr = addr
        .parse()
        .with_context(|| format!("invalid address {}", addr))?;
    let prefix: u32 = prefix
        .parse()
        .with_context(|| format!("invalid prefix length {}", prefix))?;
    if prefix > 32 {
        bail!("prefix length {} is larger than 32", prefix);
    }
    let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
    Ok((Ipv4Addr::from(u32::from(addr) & mask), Ipv4Addr::from(mask)))
}

/// First usable host of a subnet, the default gateway
///
/// /31 and /32 subnets have none.
fn first_host(network: Ipv4Addr, netmask: Ipv4Addr) -> Option<Ipv4Addr> {
    let hosts = !u32::from(netmask);
    if hosts < 3 {
        return None;
    }
    u32::from(network).checked_add(1).map(Ipv4Addr::from)
}

/// Project name derived from a directory
pub fn default_project_name(dir: &Path) -> String {
    let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let base = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = sanitize_project_name(&base);
    if name.is_empty() {
        "default".to_string()
    } else {
        name
    }
}

/// Lowercase, keep `[a-z0-9_-]`, and start with a letter or digit
pub fn sanitize_project_name(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    cleaned
        .trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const YAML: &str = r#"
name: Demo App
services:
  web:
    image: unikraft.org/nginx:1.25
    command: -c /nginx/conf/nginx.conf
    depends_on:
      api:
        condition: service_started
    networks: [net1]
    mem_limit: 64Mi
  api:
    image: api:latest
    depends_on: [db]
    networks:
      net1:
    environment:
      PORT: 8080
      DEBUG: true
  db:
    image: unikraft.org/redis:7
    environment:
      - REDIS_PASSWORD=secret
      - EMPTY
    attach: false
networks:
  net1:
    ipam:
      config:
        - subnet: 172.23.0.0/16
  shared:
    external: true
volumes:
  data:
"#;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_yaml_keeps_order() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "compose.yaml", YAML);
        let project = load_file(&path, None).unwrap();

        assert_eq!(project.name, "demoapp");
        let names: Vec<&str> = project.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["web", "api", "db"]);

        let web = project.service("web").unwrap();
        assert_eq!(web.args, ["-c", "/nginx/conf/nginx.conf"]);
        assert_eq!(web.depends_on, ["api"]);
        assert_eq!(web.memory.as_deref(), Some("64Mi"));
        assert!(web.attach);

        let api = project.service("api").unwrap();
        assert_eq!(api.networks, ["net1"]);
        assert_eq!(
            api.environment,
            [
                ("PORT".to_string(), "8080".to_string()),
                ("DEBUG".to_string(), "true".to_string())
            ]
        );

        let db = project.service("db").unwrap();
        assert!(!db.attach);
        assert_eq!(db.environment[1], ("EMPTY".to_string(), String::new()));

        let net1 = project.network("net1").unwrap();
        assert_eq!(net1.driver, "bridge");
        assert_eq!(net1.netmask.as_deref(), Some("255.255.0.0"));
        assert_eq!(net1.gateway.as_deref(), Some("172.23.0.1"));
        assert!(project.network("shared").unwrap().external);
        assert_eq!(project.volumes.len(), 1);

        project.validate().unwrap();
    }

    #[test]
    fn test_load_json() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "kcompose.json",
            r#"{"services": {"b": {"image": "x"}, "a": {"image": "y", "depends_on": ["b"]}}}"#,
        );
        let project = load_file(&path, Some("json-demo")).unwrap();
        assert_eq!(project.name, "json-demo");
        assert_eq!(project.services[0].name, "b");
        assert_eq!(project.services[1].depends_on, ["b"]);
    }

    #[test]
    fn test_discovery_priority() {
        let dir = TempDir::new().unwrap();
        write(&dir, "docker-compose.yml", "services: {}\n");
        write(&dir, "compose.yaml", "services: {}\n");

        let found = find_compose_file(dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "compose.yaml");
    }

    #[test]
    fn test_discovery_fails_in_empty_dir() {
        let dir = TempDir::new().unwrap();
        let err = find_compose_file(dir.path()).unwrap_err();
        assert!(err.to_string().contains("No compose file found"));
    }

    #[test]
    fn test_project_name_from_directory() {
        let dir = TempDir::new().unwrap();
        let workdir = dir.path().join("My_Stack");
        fs::create_dir(&workdir).unwrap();
        fs::write(workdir.join("compose.yml"), "services:\n").unwrap();

        let project = load(&workdir, None, None).unwrap();
        assert_eq!(project.name, "my_stack");
        assert!(project.services.is_empty());
    }

    #[test]
    fn test_invalid_project_is_reported_by_validate() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "compose.yaml",
            "services:\n  web:\n    depends_on: [ghost]\n    networks: [nowhere]\n",
        );
        let project = load_file(&path, None).unwrap();
        let err = project.validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("service web has no image"));
        assert!(message.contains("undefined service ghost"));
        assert!(message.contains("undefined network nowhere"));
    }

    #[test]
    fn test_malformed_yaml() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "compose.yaml", "services: [not, a, map]\n");
        assert!(load_file(&path, None).is_err());
    }

    #[test]
    fn test_parse_subnet() {
        let (network, mask) = parse_subnet("10.1.2.3/24").unwrap();
        assert_eq!(network, Ipv4Addr::new(10, 1, 2, 0));
        assert_eq!(mask, Ipv4Addr::new(255, 255, 255, 0));
        assert!(parse_subnet("10.0.0.0").is_err());
        assert!(parse_subnet("10.0.0.0/33").is_err());
    }

    /// Compose file with a single network `net1` using this ipam entry
    fn with_ipam(entry: &str) -> String {
        format!(
            "networks:\n  net1:\n    ipam:\n      config:\n        - {}\n",
            entry
        )
    }

    #[test]
    fn test_default_gateway_is_first_host() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "compose.yaml", &with_ipam("subnet: 10.0.0.8/30"));
        let project = load_file(&path, None).unwrap();
        let net1 = project.network("net1").unwrap();
        assert_eq!(net1.gateway.as_deref(), Some("10.0.0.9"));
        assert_eq!(net1.netmask.as_deref(), Some("255.255.255.252"));
    }

    #[test]
    fn test_subnet_without_hosts_needs_gateway() {
        let dir = TempDir::new().unwrap();
        for subnet in ["255.255.255.255/32", "10.0.0.0/31"] {
            let entry = format!("subnet: {}", subnet);
            let path = write(&dir, "compose.yaml", &with_ipam(&entry));
            let err = load_file(&path, None).unwrap_err();
            assert!(format!("{:#}", err).contains("has no host address"));
        }

        let entry = "subnet: 255.255.255.255/32\n          gateway: 255.255.255.255";
        let path = write(&dir, "compose.yaml", &with_ipam(entry));
        let project = load_file(&path, None).unwrap();
        let net1 = project.network("net1").unwrap();
        assert_eq!(net1.gateway.as_deref(), Some("255.255.255.255"));
    }

    #[test]
    fn test_sanitize_project_name() {
        assert_eq!(sanitize_project_name("My App!"), "myapp");
        assert_eq!(sanitize_project_name("__x-1"), "x-1");
        assert_eq!(sanitize_project_name("..."), "");
    }
}
