//! State management module
//!
//! This module handles all persisted state:
//! - Database connections and queries (library.rs)
//! - Shared data structures (data.rs)

pub mod data;
pub mod library;

pub use data::{PhotographSummary, PhotographWithDetections, Stats, TileDetection};
pub use library::Database;
