//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::Ini;

use super::file::{ConfigFile, ConfigFileError};
use super::size::parse_size;
use crate::cache::MAX_COMPRESSION_LEVEL;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.cache.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("memory_budget") {
            config.cache.memory_budget = parse_size(v).map_err(|_| {
                invalid("cache", "memory_budget", v, "expected format like '256MB' or '1GB'")
            })?;
        }
        if let Some(v) = section.get("max_size") {
            config.cache.max_size = parse_size(v).map_err(|_| {
                invalid("cache", "max_size", v, "expected format like '2GB' or '500MB'")
            })?;
        }
        if let Some(v) = section.get("max_age_hours") {
            config.cache.max_age_hours = parse_positive("cache", "max_age_hours", v)?;
        }
        if let Some(v) = section.get("compression_level") {
            let level: u32 = parse_number("cache", "compression_level", v)?;
            if level > MAX_COMPRESSION_LEVEL {
                return Err(invalid(
                    "cache",
                    "compression_level",
                    v,
                    "must be between 0 and 9",
                ));
            }
            config.cache.compression_level = level;
        }
        if let Some(v) = section.get("cleanup_interval_minutes") {
            config.cache.cleanup_interval_minutes =
                parse_positive("cache", "cleanup_interval_minutes", v)?;
        }
        if let Some(v) = section.get("enable_disk") {
            config.cache.enable_disk = parse_bool(v);
        }
        if let Some(v) = section.get("enable_memory") {
            config.cache.enable_memory = parse_bool(v);
        }
        if let Some(v) = section.get("warm_start") {
            config.cache.warm_start = parse_bool(v);
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = v.to_string();
            }
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "must be a non-negative integer"))
}

fn parse_positive(section: &str, key: &str, value: &str) -> Result<u64, ConfigFileError> {
    match parse_number::<u64>(section, key, value)? {
        0 => Err(invalid(section, key, value, "must be greater than zero")),
        n => Ok(n),
    }
}

/// Parse a boolean value ("true", "1", "yes", "on" are true).
pub(super) fn parse_bool(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v == "true" || v == "1" || v == "yes" || v == "on"
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
