//! Controller layer: panel events and trigger orchestration.

pub mod events;
pub mod orchestration;
