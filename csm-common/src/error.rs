//! Error type for configuration and environment resolution

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or unusable settings, or a malformed config file
    #[error("Configuration error: {0}")]
    Config(String),

    /// Command-line value that names nothing known (e.g. an unknown environment)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
