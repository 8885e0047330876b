//! OnFile Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, configuration, and metadata
//! record types used across the OnFile components.

pub mod config;
pub mod error;
pub mod types;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use types::*;
