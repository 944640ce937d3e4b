//! # Tutti Common Library
//!
//! Shared code for the substitute staffing services:
//! - Database initialization and persisted row models
//! - Closed enumerations shared by engine and storage (strategy, statuses)
//! - Configuration file loading and data folder resolution
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
