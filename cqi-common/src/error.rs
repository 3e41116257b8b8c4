//! Common error types for CQI

use thiserror::Error;

/// Common result type for CQI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the CQI crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Indicator id has no registered template
    #[error("Template not found for indicator: {0}")]
    TemplateNotFound(String),

    /// Site id is not registered with the router
    #[error("Unknown site: {0}")]
    UnknownSite(String),

    /// A site database could not be reached or its URL is unsupported
    #[error("Cannot connect to site {site_id}: {message}")]
    SiteConnection { site_id: String, message: String },

    /// The site store rejected a query; the driver message is preserved
    #[error("Query failed for indicator {indicator_id} at site {site_id}: {message}")]
    QueryExecution {
        site_id: String,
        indicator_id: String,
        message: String,
    },

    /// A query did not complete within the configured timeout
    #[error("Query for indicator {indicator_id} at site {site_id} timed out after {timeout_ms} ms")]
    QueryTimeout {
        site_id: String,
        indicator_id: String,
        timeout_ms: u64,
    },

    /// A validation rule's own check failed to execute
    #[error("Validation rule {rule_id} failed to execute: {message}")]
    ValidationRule { rule_id: String, message: String },

    /// Auto-fix requested for a rule outside the remediation allow-list
    #[error("Auto-fix not permitted for rule: {0}")]
    AutoFixRejected(String),

    /// Scheduler setup or timer registration error
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
