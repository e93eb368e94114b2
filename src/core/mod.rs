//! Daemon plumbing shared by the agent binary.
//!
//! - [`shutdown`]: waits for the termination signal of the agent process.

pub mod shutdown;
