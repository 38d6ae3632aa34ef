//! Batch intake orchestration.
//!
//! Covers the per-user queue with debounce, the run registry, the batch
//! worker state machine, consolidation, and session lifecycle.

pub mod consolidator;
pub mod debounce;
pub mod gate;
pub mod intake;
pub mod ports;
pub mod registry;
pub mod session_manager;
pub mod worker;
