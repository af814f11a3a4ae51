//! Saga Ports - Port Orchestration Engine
//!
//! Domain models declare named ports backed by adapters. Ports are chained
//! through events: a port consumes one event, and on success records itself
//! in the model's port flow and produces the next. Each invocation is timed
//! and retried until a per-port deadline, and completed ports can be undone
//! in reverse order.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            Use-cases                                │
//! │  ┌──────────────┐ ┌──────────────┐ ┌─────────────┐ ┌─────────────┐  │
//! │  │  Edit-Model  │ │ Command/Port │ │ List-Models │ │ Load-Models │  │
//! │  └──────┬───────┘ └──────┬───────┘ └──────┬──────┘ └──────┬──────┘  │
//! ├─────────┼────────────────┼────────────────┼───────────────┼─────────┤
//! │         │        ┌───────┴────────┐       │               │         │
//! │         │        │ Model Registry │       │               │         │
//! │         │        └───────┬────────┘       │               │         │
//! │         │        ┌───────┴────────┐       │               │         │
//! │         └───────►│   Port Engine  │◄──────┼───────────────┘         │
//! │                  │ timers/retries │       │                         │
//! │                  └───────┬────────┘       │                         │
//! ├──────────────────────────┼────────────────┼─────────────────────────┤
//! │  ┌────────────────┐ ┌────┴─────┐ ┌────────┴───────┐ ┌────────────┐  │
//! │  │   Event Bus    │ │ Adapters │ │  Repositories  │ │ Serializer │  │
//! │  │ topics/signals │ │          │ │  memory / file │ │            │  │
//! │  └────────────────┘ └──────────┘ └────────────────┘ └────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`domain`]: Models, events, specifications and port traits
//! - [`registry`]: Model/event registry and model construction
//! - [`engine`]: Port binding, invocation, retries and compensation
//! - [`bus`]: Event bus and side-channel signals
//! - [`usecases`]: Edit, command, port, list and load operations
//! - [`datasource`]: In-memory and file-backed repositories
//! - [`adapters`]: Ready-made persistence adapters
//! - [`serializer`]: Persistence value rewriting rules
//! - [`config`]: Engine configuration and workflow manifests
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod access;
pub mod adapters;
pub mod bus;
pub mod config;
pub mod datasource;
pub mod domain;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod serializer;
pub mod usecases;

// Re-export commonly used types
pub use bus::{handler_fn, EventBus, EventHandler, EventPayload, Signal};

pub use config::{EngineConfig, Manifest};

pub use datasource::{FileRepository, MemoryRepository};

pub use domain::{
    adapter_fn, command_fn, CommandSpec, DomainEvent, EditRequest, EventArgs, EventName,
    EventType, Model, ModelId, ModelSpecification, PortAdapter, PortConfig, PortRequest,
    Repository, RepositoryRef, WorkflowState,
};

pub use engine::{CompensationReport, PortOutcome, WorkflowGraph};

pub use error::{Error, Result};

pub use metrics::EngineMetrics;

pub use registry::ModelRegistry;

pub use usecases::{
    execute_command, invoke_port, resume_workflow, EditModel, ListModels, ListResult,
    LoadModels,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
