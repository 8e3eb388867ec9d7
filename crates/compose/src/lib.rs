//! # Compose
//!
//! A reconciliation engine for compose-style unikernel projects.
//!
//! This crate turns a declared project (services, networks, volumes and the
//! dependencies between services) plus a snapshot of what a backend holds
//! into an ordered plan of lifecycle actions, and runs that plan with
//! controllable parallelism and fail-fast semantics.
//!
//! ## Core Concepts
//!
//! - **Project**: The validated desired state, see [`Project`]
//! - **Inventory**: Machines and networks a backend currently holds
//! - **Plan**: Actions with dependency edges, produced by [`plan`]
//! - **Executor**: Runs a plan sequentially or on a bounded pool, see [`execute`]
//! - **Orphans**: Backend resources the project no longer declares
//! - **Status**: Per-machine states rolled up into one project status
//!
//! ## Example
//!
//! ```ignore
//! use compose::{
//!     CancelToken, ExecuteOptions, Inventory, MemoryBackend, NetworkSpec,
//!     NoProgress, Operation, PlanOptions, Project, Selector, Service,
//! };
//!
//! let project = Project::new("demo", ".")
//!     .with_network(NetworkSpec::new("net1"))
//!     .with_service(Service::new("web", "nginx").networks(["net1"]));
//! project.validate()?;
//!
//! let backend = MemoryBackend::new();
//! let inventory = Inventory::fetch(&backend, &Selector::project("demo"))?;
//! let plan = compose::plan(&project, Operation::Up, &inventory, &PlanOptions::default())?;
//!
//! let summary = compose::execute(
//!     &plan,
//!     &backend,
//!     &ExecuteOptions::with_jobs(4),
//!     &mut NoProgress,
//!     &CancelToken::new(),
//! )?;
//! ```
//!
//! ## Backends
//!
//! The engine only talks to the [`Backend`] trait. [`MemoryBackend`] keeps
//! everything in process; other implementations live with the caller.

pub mod backend;
pub mod context;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod orphans;
pub mod planner;
pub mod project;
pub mod status;
pub mod types;

// Re-export main types at crate root
pub use backend::memory::MemoryBackend;
pub use backend::{Backend, BackendResult, MachineService, NetworkService, Transition};
pub use context::{CancelToken, NoProgress, ProgressCallback};
pub use error::{BackendError, Error, ResourceKind, Result};
pub use executor::execute;
pub use inventory::Inventory;
pub use orphans::{Orphans, find_orphans};
pub use planner::{Action, ActionKind, Plan, PlanOptions, Target, plan};
pub use project::{Project, Service, VolumeSpec};
pub use status::{ProjectStatus, ProjectSummary, aggregate, summarize};
pub use types::{
    ExecuteOptions, ExecuteSummary, Machine, MachineSpec, MachineState, Network, NetworkSpec,
    NetworkState, Operation, Parallelism, Selector, Visibility,
};
