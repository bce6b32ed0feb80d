//! Path expansion, directory validation, and timestamp canonicalization
//!
//! Configured locations may reference `{ENV_VAR}` placeholders that are
//! resolved from the process environment at ingestion time. Directory
//! existence is only enforced in client/CLI contexts — server contexts may
//! hold paths for mounts they cannot see.

use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDateTime};
use regex::Regex;

use crate::error::{DepictioError, Result};

/// Canonical timestamp format used throughout the metadata store.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Substitute `{NAME}` placeholders with environment values.
///
/// Fails with `config-invalid` if any referenced variable is unset.
pub fn expand_path(raw: &str) -> Result<String> {
    // Compiled on each call; expansion only happens at ingestion time.
    let pattern = Regex::new(r"\{([A-Z0-9_]+)\}")?;
    let mut expanded = raw.to_string();
    for capture in pattern.captures_iter(raw) {
        let name = &capture[1];
        let value = std::env::var(name).map_err(|_| {
            DepictioError::ConfigInvalid(format!(
                "environment variable '{name}' is not set for path '{raw}'"
            ))
        })?;
        expanded = expanded.replace(&format!("{{{name}}}"), &value);
    }
    Ok(expanded)
}

/// Check that a path exists, is a directory, and is readable.
///
/// Client/CLI contexts only; server contexts skip this since paths may refer
/// to remote mounts unknown to the caller.
pub fn validate_directory(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|e| DepictioError::ScanIo {
        location: path.display().to_string(),
        detail: e.to_string(),
    })?;
    if !metadata.is_dir() {
        return Err(DepictioError::ConfigInvalid(format!(
            "'{}' is not a directory",
            path.display()
        )));
    }
    std::fs::read_dir(path).map_err(|e| DepictioError::ScanIo {
        location: path.display().to_string(),
        detail: e.to_string(),
    })?;
    Ok(())
}

/// Format a filesystem timestamp in the canonical form.
pub fn format_timestamp(time: SystemTime) -> String {
    let datetime: DateTime<Local> = time.into();
    datetime.format(TIME_FORMAT).to_string()
}

/// Canonicalize an ISO-ish timestamp string into `YYYY-MM-DD HH:MM:SS`.
///
/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS`, and the canonical form itself.
pub fn normalize_time(value: &str) -> Result<String> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Ok(datetime.format(TIME_FORMAT).to_string());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", TIME_FORMAT] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.format(TIME_FORMAT).to_string());
        }
    }
    Err(DepictioError::InvalidTime {
        value: value.to_string(),
        detail: "not an ISO 8601 datetime".to_string(),
    })
}

/// Basename of a location, tolerating trailing separators.
pub fn basename(location: &str) -> String {
    Path::new(location.trim_end_matches(['/', '\\']))
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| location.to_string())
}
