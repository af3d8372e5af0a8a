//! Keyed agent memory with TTL expiry and category index.

pub mod entry;
pub mod link;
pub mod registry;

pub use entry::{MemoryEntry, MemoryRecord};
pub use link::{MemoryLink, MemoryStats, StoreOptions};
pub use registry::{GlobalMemoryStats, MemoryRegistry, SharedMemoryLink};
