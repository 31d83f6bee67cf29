//! modscan daemon library.
//!
//! This library exposes internal modules for integration testing.
//! In production, `modscan-daemon` is used as a binary (main.rs).
//!
//! # Module Structure
//!
//! - [`daemon`]: startup, table creation, shutdown
//! - [`state`]: `WorkerConfig`, shared `AppState`, scanner wiring
//! - [`worker`]: task queue consumers (admission, gate, scan, upload, finish)
//! - [`enqueue`]: corpus selection and job creation
//! - [`server`]: axum control surface
//! - [`health`]: `/healthz` report
//! - [`logging`], [`metrics_server`]: ambient setup

pub mod daemon;
pub mod enqueue;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics_server;
pub mod server;
pub mod state;
pub mod worker;
