//! modsync - module dependency graph synchronization.
//!
//! This crate merges per-instance module dependency snapshots into one global
//! graph, keeps track of which instances observed each dependency, and
//! detects dependency cycles across the whole fleet. It provides both a CLI
//! application and a library used by the HTTP server.

#![forbid(unsafe_code)]

// Public modules for library usage
pub mod analysis;
pub mod config;
pub mod domain;
pub mod error;
pub mod graph;
pub mod merge;
pub mod service;
pub mod snapshot;
pub mod store;

// Public CLI module (needed by binary)
pub mod cli;

pub use analysis::CycleAnalysisResult;
pub use error::{Error, Result};
pub use service::{HealthReport, IngestReport, SyncService};
