//! Agent core: bounded task scheduler and per-owner TTL memory.

pub mod config;
pub mod error;
pub mod memory;
pub mod worker;
