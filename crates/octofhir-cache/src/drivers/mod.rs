//! Built-in drivers.
//!
//! The Redis driver lives in the `octofhir-cache-redis` crate.

mod memory;

pub use memory::MemoryDriver;
