//! Command handlers -- one module per subcommand

pub mod analysis;
pub mod config;
pub mod jobs;
pub mod reqcount;
pub mod sandbox;
pub mod scan;
