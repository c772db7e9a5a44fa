pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod types;
