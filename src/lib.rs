pub mod config;
pub mod error;
pub mod generator;
pub mod model;
pub mod observability;
pub mod query;
pub mod report;
pub mod runner;
pub mod store;
pub mod wal;
