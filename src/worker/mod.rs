//! Task scheduler: typed work items run on registered handlers.
//!
//! Core components:
//! - `state`: Task state machine (Pending → Running → Completed/Failed, Pending → Cancelled)
//! - `task`: Task record, snapshot view, handler and callback traits
//! - `registry`: Task type → handler mapping
//! - `scheduler`: FIFO dispatch loop with bounded concurrency

pub mod registry;
pub mod scheduler;
pub mod state;
pub mod task;

pub use registry::HandlerRegistry;
pub use scheduler::{QueueStatus, Scheduler, TaskEvent};
pub use state::TaskStatus;
pub use task::{FnCallback, FnHandler, Task, TaskCallback, TaskHandler, TaskSnapshot};
