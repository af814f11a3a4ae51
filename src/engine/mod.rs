//! Port Orchestration Engine
//!
//! Binds specification ports to adapters and drives their invocation:
//!
//! ```text
//!   event ──► PortTrigger ──► BoundPort::attempt ──► adapter
//!                                  │      ▲              │
//!                             arm timer   │ retry        │ ok
//!                                  ▼      │              ▼
//!                             on_timeout ─┘      record flow, publish producesEvent
//! ```
//!
//! Timers and adapter calls share an [`InvocationState`] so the error
//! callback runs at most once per invocation chain.

pub mod binding;
pub mod callbacks;
pub mod compensation;
pub mod graph;
pub mod invocation;

pub use binding::{BoundPort, PortEngine, PortTable};
pub use callbacks::{error_callback, retry_callback, ErrorContext, TimeoutContext};
pub use compensation::{CompensationFailure, CompensationReport};
pub use graph::{StepNode, WorkflowGraph};
pub use invocation::{InvocationPhase, InvocationState, PortOutcome};
