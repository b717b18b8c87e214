//! modsync-server - HTTP surface for modsync.
//!
//! Exposes three endpoints over a shared [`modsync::SyncService`]:
//!
//! - `GET /health`: liveness plus graph store connectivity
//! - `POST /ingest`: merge a batch of per-instance snapshots
//! - `GET /analyse` (alias `/analyze`): dependency cycle analysis

#![forbid(unsafe_code)]

pub mod error;
pub mod routes;
pub mod server;

pub use error::{ApiError, ErrorBody};
pub use routes::{AppState, router};
pub use server::{ctrl_c, serve, serve_on};
