//! Scan pattern compilation and matching
//!
//! Patterns are matched against file basenames, anchored at the start.
//! Wildcard substitution happens in [`RegexConfig::full_pattern`]; path
//! separators inside patterns are normalized to `/` there.

use regex::Regex;

use crate::error::Result;
use crate::models::RegexConfig;

/// Compile the full scan regex from a DC's regex configuration.
///
/// A malformed pattern or duplicate wildcard names surface as
/// `config-invalid`, fatal for the owning DC only.
pub fn compile_full_regex(config: &RegexConfig) -> Result<Regex> {
    let pattern = config.full_pattern()?;
    Ok(Regex::new(&format!("^(?:{pattern})"))?)
}

/// Whether a basename matches the compiled scan pattern
pub fn regex_match(file_name: &str, full_regex: &Regex) -> bool {
    full_regex.is_match(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Wildcard;

    #[test]
    fn test_wildcard_pattern_matches() {
        let config = RegexConfig {
            pattern: "run_{date}.csv".to_string(),
            wildcards: vec![Wildcard {
                name: "date".to_string(),
                wildcard_regex: r"\d{4}-\d{2}-\d{2}".to_string(),
                description: None,
            }],
        };
        let regex = compile_full_regex(&config).unwrap();
        assert!(regex_match("run_2025-01-01.csv", &regex));
        assert!(!regex_match("run_bad.csv", &regex));
    }

    #[test]
    fn test_plain_pattern_anchored_at_start() {
        let config = RegexConfig {
            pattern: r"counts\.tsv".to_string(),
            wildcards: vec![],
        };
        let regex = compile_full_regex(&config).unwrap();
        assert!(regex_match("counts.tsv", &regex));
        assert!(!regex_match("old_counts.tsv", &regex));
    }
}
