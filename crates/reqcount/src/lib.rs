#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`ReqCountError`)
//! - [`logline`]: Access-log line parsing (`LogHit`, `LineCounts`)
//! - [`bucket`]: Bounded fan-out aggregation of one bucket day (`count_bucket_day`)
//! - [`entries`]: Paged log-entry counting with quota retry (`LogEntrySource`, `count_log_entries`)
//! - [`rows`]: Count rows, table schemas, latest-count queries
//!
//! # Architecture
//!
//! ```text
//! <prefix>/YYYY/MM/DD/*.json --list--> Semaphore(N) + JoinSet --read--> count_lines
//!                                                                          |
//!                                                        Mutex<LineCounts> (merge)
//!                                                                          |
//!                                               count_rows --> IpRequestCount / RequestCount
//! ```

pub mod bucket;
pub mod entries;
pub mod error;
pub mod logline;
pub mod rows;

// --- Public API Re-exports ---

pub use bucket::{DEFAULT_MAX_CONCURRENCY, DayCounts, count_bucket_day, day_prefix};
pub use entries::{DEFAULT_QUOTA_BACKOFF, LogEntrySource, LogPage, ObjectPages, count_log_entries};
pub use error::ReqCountError;
pub use logline::{LineCounts, LogHit, count_lines, parse_log_line};
pub use rows::{
    COUNTS_TABLE, IP_COUNTS_TABLE, IpRequestCount, RequestCount, count_rows, latest_counts_query,
    latest_ip_counts_query,
};
