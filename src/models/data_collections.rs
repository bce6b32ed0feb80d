//! Data collections — typed datasets within a workflow or project
//!
//! DC configs vary by type; the type-specific part is a tagged sum
//! ([`DcSpecificProperties`]) under a common header (`type`, `metatype`,
//! `source`, `scan`).

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::{DepictioError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DcType {
    Table,
    Jbrowse2,
    Multiqc,
    Image,
}

impl std::fmt::Display for DcType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DcType::Table => "table",
            DcType::Jbrowse2 => "jbrowse2",
            DcType::Multiqc => "multiqc",
            DcType::Image => "image",
        };
        f.write_str(name)
    }
}

/// Where a DC's content comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DcSource {
    /// Discovered by the scan engine under the workflow's data location
    #[default]
    Scanned,
    /// Produced by a project-level join definition; carries no scan config
    Joined,
}

/// A named wildcard slotted into a scan pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Wildcard {
    pub name: String,
    pub wildcard_regex: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A filename pattern with named wildcards, e.g. `run_{date}_{sample}.csv`.
///
/// Each `{name}` placeholder is substituted with `(wildcard_regex)` before
/// the pattern is compiled. Wildcard names must be unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexConfig {
    pub pattern: String,
    #[serde(default)]
    pub wildcards: Vec<Wildcard>,
}

impl RegexConfig {
    /// Substitute wildcards into the pattern. Duplicate wildcard names are a
    /// configuration error, fatal for the owning DC.
    pub fn full_pattern(&self) -> Result<String> {
        let mut seen = std::collections::HashSet::new();
        for wildcard in &self.wildcards {
            if !seen.insert(wildcard.name.as_str()) {
                return Err(DepictioError::ConfigInvalid(format!(
                    "duplicate wildcard name '{}' in regex configuration",
                    wildcard.name
                )));
            }
        }

        let mut pattern = self.pattern.replace('\\', "/");
        for wildcard in &self.wildcards {
            let placeholder = format!("{{{}}}", wildcard.name);
            pattern = pattern.replace(&placeholder, &format!("({})", wildcard.wildcard_regex));
        }
        Ok(pattern)
    }
}

/// How files for a DC are discovered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "scan_parameters", rename_all = "lowercase")]
pub enum ScanConfig {
    /// One known file
    Single { filename: String },
    /// Recursive walk matching basenames against a wildcard pattern
    Recursive { regex_config: RegexConfig },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    Csv,
    Tsv,
    Parquet,
}

/// Reader options applied when materializing a table DC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolarsReadOptions {
    #[serde(default = "default_true")]
    pub has_header: bool,
    #[serde(default)]
    pub separator: Option<char>,
    #[serde(default)]
    pub skip_rows: usize,
}

fn default_true() -> bool {
    true
}

impl Default for PolarsReadOptions {
    fn default() -> Self {
        Self {
            has_header: true,
            separator: None,
            skip_rows: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableProperties {
    pub format: TableFormat,
    #[serde(default)]
    pub polars_kwargs: PolarsReadOptions,
    /// Restrict the materialized table to these columns when set
    #[serde(default)]
    pub keep_columns: Option<Vec<String>>,
}

/// Type-specific configuration, tagged by DC kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DcSpecificProperties {
    Table(TableProperties),
    Jbrowse2 {
        #[serde(default)]
        index_extension: Option<String>,
    },
    Multiqc {
        #[serde(default)]
        sample_field: Option<String>,
    },
    Image {
        #[serde(default)]
        thumbnail_column: Option<String>,
    },
}

/// DC configuration: common header plus type-specific properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCollectionConfig {
    #[serde(rename = "type")]
    pub dc_type: DcType,
    #[serde(default)]
    pub metatype: Option<String>,
    #[serde(default)]
    pub source: DcSource,
    #[serde(default)]
    pub scan: Option<ScanConfig>,
    pub properties: DcSpecificProperties,
}

/// A typed dataset, owned by its workflow (or project, for basic projects)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCollection {
    #[serde(rename = "_id", default = "ObjectId::new")]
    pub id: ObjectId,
    pub data_collection_tag: String,
    #[serde(default)]
    pub description: Option<String>,
    pub config: DataCollectionConfig,
}

impl DataCollection {
    pub fn validate(&self) -> Result<()> {
        if self.data_collection_tag.is_empty() {
            return Err(DepictioError::ConfigInvalid(
                "data_collection_tag is required".to_string(),
            ));
        }
        match (self.config.source, &self.config.scan) {
            (DcSource::Joined, Some(_)) => Err(DepictioError::ConfigInvalid(format!(
                "data collection '{}': joined DCs carry no scan configuration",
                self.data_collection_tag
            ))),
            (DcSource::Scanned, None) => Err(DepictioError::ConfigInvalid(format!(
                "data collection '{}': scan configuration is required",
                self.data_collection_tag
            ))),
            _ => {
                if let Some(ScanConfig::Recursive { regex_config }) = &self.config.scan {
                    regex_config.full_pattern()?;
                }
                Ok(())
            }
        }
    }

    pub fn is_table(&self) -> bool {
        self.config.dc_type == DcType::Table
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_pattern_substitutes_wildcards() {
        let config = RegexConfig {
            pattern: "run_{date}_{sample}.csv".to_string(),
            wildcards: vec![
                Wildcard {
                    name: "date".to_string(),
                    wildcard_regex: r"\d{4}-\d{2}-\d{2}".to_string(),
                    description: None,
                },
                Wildcard {
                    name: "sample".to_string(),
                    wildcard_regex: r"[A-Z]\d+".to_string(),
                    description: None,
                },
            ],
        };
        assert_eq!(
            config.full_pattern().unwrap(),
            r"run_(\d{4}-\d{2}-\d{2})_([A-Z]\d+).csv"
        );
    }

    #[test]
    fn test_duplicate_wildcard_names_rejected() {
        let config = RegexConfig {
            pattern: "run_{date}.csv".to_string(),
            wildcards: vec![
                Wildcard {
                    name: "date".to_string(),
                    wildcard_regex: r"\d+".to_string(),
                    description: None,
                },
                Wildcard {
                    name: "date".to_string(),
                    wildcard_regex: r"\w+".to_string(),
                    description: None,
                },
            ],
        };
        assert_eq!(config.full_pattern().unwrap_err().kind(), "config-invalid");
    }

    #[test]
    fn test_joined_dc_rejects_scan_config() {
        let mut dc = test_support::table_dc("t");
        dc.config.source = DcSource::Joined;
        assert_eq!(dc.validate().unwrap_err().kind(), "config-invalid");
    }

    #[test]
    fn test_scanned_dc_requires_scan_config() {
        let mut dc = test_support::table_dc("t");
        dc.config.scan = None;
        assert_eq!(dc.validate().unwrap_err().kind(), "config-invalid");
    }
}
