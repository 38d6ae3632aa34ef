#![forbid(unsafe_code)]

//! Batch screenshot intake for game inventories: recognition, catalog
//! correction, market enrichment, and consolidation into session working sets.

pub mod catalog;
pub mod config;
pub mod errors;
pub mod market;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod recognition;
pub mod retry;
pub mod screenshot;
pub mod slack;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
