//! Domain layer - Models, events, specifications and port definitions
//!
//! This module defines the values the engine operates on and the traits
//! (ports) that adapters implement, following hexagonal architecture
//! principles.

pub mod event;
pub mod model;
pub mod ports;
pub mod spec;

pub use event::{
    DomainEvent, EditRequest, EventArgs, EventFactory, EventName, EventType, IntoEventType,
};
pub use model::{Model, ModelId, WorkflowState};
pub use ports::*;
pub use spec::{Command, CommandSpec, ModelSpecBuilder, ModelSpecification, PortConfig};
