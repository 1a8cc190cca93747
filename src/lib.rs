pub mod cleaner;
pub mod cli;
pub mod config;
pub mod consistency;
mod db;
pub mod distance;
pub mod error;
mod metrics;
pub mod refdb;
pub mod report;
pub mod review;
pub mod score;
pub mod stats;
pub mod store;
pub mod utils;

pub use cleaner::{CleanConfig, Cleaner, RetryPolicy};
pub use config::Opts;
pub use refdb::{RefDB, RefDBBuilder};
