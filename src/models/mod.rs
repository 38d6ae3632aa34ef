//! Domain model module declarations.

pub mod item;
pub mod report;
pub mod screenshot;
pub mod session;
