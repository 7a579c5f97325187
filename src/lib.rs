//! # repofeed
//!
//! Polls a fixed set of GitHub repositories with conditional requests,
//! caches their metadata and activity in memory, and aggregates the
//! activity into one bounded, time-ordered feed served over a read-only API.

pub mod config;
pub mod error;
pub mod feed;
pub mod github;
pub mod handlers;
pub mod models;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod telemetry;
