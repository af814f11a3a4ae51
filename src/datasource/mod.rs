//! Repository implementations
//!
//! - `memory`: DashMap-backed store
//! - `file`: memory store mirrored to a JSON file

pub mod file;
pub mod memory;

pub use file::FileRepository;
pub use memory::MemoryRepository;
