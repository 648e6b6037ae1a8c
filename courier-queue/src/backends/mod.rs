//! Queue store implementations:
//! - `memory`: in-process storage with an optional capacity
//! - `file`: one bincode file per record in a directory

pub mod file;
pub mod memory;

pub use file::FileQueueStore;
pub use memory::MemoryQueueStore;
