//! Use-cases - Application operations over bound models
//!
//! - `execute_command` / `invoke_port`: ACL-checked actions on a model
//! - `edit_model`: transactional edit with UPDATE notification
//! - `list_models`: filtered listing and counts
//! - `load_models`: startup loading and workflow resumption

pub mod edit_model;
pub mod execute_command;
pub mod invoke_port;
pub mod list_models;
pub mod load_models;

pub use edit_model::EditModel;
pub use execute_command::execute_command;
pub use invoke_port::invoke_port;
pub use list_models::{DateRange, ListModels, ListResult, COUNT_KEY};
pub use load_models::{resume_workflow, LoadModels, ResumeReport, DEFAULT_RESUME_DELAY};
