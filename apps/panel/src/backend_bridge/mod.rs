//! Queue and worker plumbing between the panel surface and the insertion
//! backend.

pub mod commands;
pub mod runtime;
