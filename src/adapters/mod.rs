//! Adapters - Ready-made port adapters
//!
//! - `persistence`: save/find/update through a repository, workflow checkpoints

pub mod persistence;

pub use persistence::{
    close, find_adapter, save_adapter, update_adapter, CheckpointHandler, FindAdapter,
    SaveAdapter, UpdateAdapter,
};
