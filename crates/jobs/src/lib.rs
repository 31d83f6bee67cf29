#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`JobError`)
//! - [`job`]: Job model, counters, state, ETA (`Job`, `TaskOutcome`, `Eta`)
//! - [`store`]: Versioned job store and update loop (`JobStore`, `MemoryJobStore`, `update_job`, `admit_task`)

pub mod error;
pub mod job;
pub mod store;

// --- Public API Re-exports ---

pub use error::JobError;
pub use job::{Eta, FieldFn, Job, JobState, TaskOutcome, job_id};
pub use store::{
    Admission, DEFAULT_MAX_ATTEMPTS, JobStore, MemoryJobStore, Versioned, admit_task, update_job,
};
