//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use imgcache::cache::CacheError;
use imgcache::config::ConfigFileError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration file could not be loaded
    Config(ConfigFileError),
    /// Cache could not be opened
    CacheOpen(CacheError),
    /// Argument rejected before touching the cache
    InvalidArgument(String),
    /// Key has no cached entry
    NotFound(String),
    /// Failed to read input file
    FileRead { path: String, error: std::io::Error },
    /// Failed to write output
    FileWrite { path: String, error: std::io::Error },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::CacheOpen(CacheError::InvalidConfig(_)) | CliError::Config(_) => {
                eprintln!();
                eprintln!("Check the [cache] section of your config file:");
                eprintln!("  {}", imgcache::config::config_file_path().display());
            }
            CliError::NotFound(_) => {
                eprintln!();
                eprintln!("Keys are bucketed by hour; regenerate the key with 'imgcache key'.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::CacheOpen(e) => write!(f, "Failed to open cache: {}", e),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::NotFound(key) => write!(f, "No cached entry for key '{}'", key),
            CliError::FileRead { path, error } => {
                write!(f, "Failed to read file '{}': {}", path, error)
            }
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write '{}': {}", path, error)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::CacheOpen(e) => Some(e),
            CliError::FileRead { error, .. } => Some(error),
            CliError::FileWrite { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<CacheError> for CliError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::InvalidKey(key) => {
                CliError::InvalidArgument(format!("'{}' is not a valid cache key", key))
            }
            other => CliError::CacheOpen(other),
        }
    }
}
