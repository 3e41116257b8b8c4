//! Aggregate store operations owned by the engine

pub mod aggregates;
pub mod jobs;
pub mod status;

pub use status::SqliteStatusStore;
