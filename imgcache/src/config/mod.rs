//! User configuration for imgcache.
//!
//! Settings are read from an INI file (`~/.imgcache/config.ini` by default)
//! and turned into a [`CacheConfig`](crate::cache::CacheConfig).
//!
//! # Example
//!
//! ```no_run
//! use imgcache::config::ConfigFile;
//!
//! let file = ConfigFile::load()?;
//! let cache_config = file.to_cache_config();
//! # Ok::<(), imgcache::config::ConfigFileError>(())
//! ```

mod file;
mod parser;
mod size;
mod writer;

pub use file::{
    config_directory, config_file_path, CacheSettings, ConfigFile, ConfigFileError,
    LoggingSettings,
};
pub use size::{format_size, parse_size, SizeParseError};
