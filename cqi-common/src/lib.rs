//! # CQI Common Library
//!
//! Shared code for the clinical quality indicator services including:
//! - Error taxonomy (`Error`, `Result`)
//! - Configuration loading and resolution
//! - Reporting period arithmetic
//! - Aggregate store schema and persisted models
//! - Event types and the broadcast `EventBus`

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
