//! # Local Execution
//!
//! A small in-memory substrate for running task graphs: row-major partitions,
//! the partition-level merge, an in-process shuffle service, and an executor
//! that evaluates a [`TaskGraph`](crate::task::TaskGraph) to its output
//! partitions. It exists so that plans can be checked end to end without an
//! external scheduler.

pub mod executor;
pub mod frame;
pub mod merge;
pub mod service;

pub use executor::LocalExecutor;
pub use frame::{partition_index, Frame};
pub use merge::merge_frames;
pub use service::InMemoryShuffleService;
