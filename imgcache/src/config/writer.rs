//! INI serialization logic for converting `ConfigFile` → INI string.

use std::path::Path;

use super::file::ConfigFile;
use super::size::format_size;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let cache = &config.cache;
    let logging = &config.logging;

    format!(
        r#"[cache]
; Directory holding <key>.cache / <key>.meta pairs
; Example: directory = /mnt/fast-ssd/imgcache
directory = {}
; Memory tier budget (default: 256MB)
; Supports: KB, MB, GB suffixes (e.g., 128MB, 1GB)
memory_budget = {}
; Disk tier size limit, enforced by the expiry sweep (default: 2GB)
max_size = {}
; Entries older than this are removed by the sweep (default: 24)
max_age_hours = {}
; zlib level for disk payloads, 0 stores raw bytes (default: 6)
compression_level = {}
; Minutes between expiry sweeps (default: 30)
cleanup_interval_minutes = {}
enable_disk = {}
enable_memory = {}
; Load recently used disk entries into memory on startup (default: false)
warm_start = {}

[logging]
directory = {}
file = {}
"#,
        path_to_string(&cache.directory),
        format_size(cache.memory_budget),
        format_size(cache.max_size),
        cache.max_age_hours,
        cache.compression_level,
        cache.cleanup_interval_minutes,
        cache.enable_disk,
        cache.enable_memory,
        cache.warm_start,
        path_to_string(&logging.directory),
        logging.file,
    )
}

/// Render a path, abbreviating the home directory as `~`.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
