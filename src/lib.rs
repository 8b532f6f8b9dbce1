//! Jobcore - durable background job execution
//!
//! Persistent job queues with an atomic claim, per-action worker pools with
//! retry and rollback, and an in-memory debounce scheduler for coalescing
//! bursts of triggers into a single deferred execution.

#![allow(missing_docs)]

pub mod app_info;
pub mod boot;
pub mod cli;
pub mod coalescing;
pub mod commands;
pub mod config;
pub mod database;
pub mod environment;
pub mod job_queue;
pub mod jobs;
pub mod setup_tracing;
