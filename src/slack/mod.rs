//! Slack delivery of batch reports.

pub mod client;
pub mod report;
