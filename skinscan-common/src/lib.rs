//! # SkinScan Common Library
//!
//! Shared code for the SkinScan crates:
//! - Common error type
//! - TOML configuration loading and resolution
//! - Logging initialization

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
