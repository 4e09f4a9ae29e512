//! # CSM Common Library
//!
//! Shared code for the CSM migration tools including:
//! - Error types
//! - Target environments and locales
//! - Configuration resolution (environment variables, TOML tunables, defaults)

pub mod config;
pub mod error;

pub use config::{Locale, ResolvedConfig, TargetEnvironment};
pub use error::{Error, Result};
