//! Core types and utilities for building defect classification.
//!
//! This crate provides the foundational types, configuration, class mapping
//! and evaluation metrics shared by the dataset, training and serving crates.

pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod mapping;
pub mod metrics;
pub mod report;
pub mod types;

pub use cli::*;
pub use config::*;
pub use error::{Error, Result};
pub use history::*;
pub use mapping::*;
pub use metrics::*;
pub use report::*;
pub use types::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::{Error, Result};
    pub use crate::history::*;
    pub use crate::mapping::*;
    pub use crate::metrics::*;
    pub use crate::types::*;
}
