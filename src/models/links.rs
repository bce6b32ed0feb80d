//! Cross-DC links: lightweight value mappings used to propagate filters
//! between data collections without materializing a join.
//!
//! A link is directional: filters applied on the source DC's column are
//! resolved into target-DC identifiers through the configured resolver.

use std::collections::HashMap;

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::{DepictioError, Result};

/// Resolution strategy for mapping source values to target identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverKind {
    /// 1:1 — same value in source and target
    #[default]
    Direct,
    /// Expand canonical ids to sample-name variants via `mappings`
    SampleMapping,
    /// Template substitution, e.g. `{sample}.bam` → `S1.bam`
    Pattern,
    /// Prefix-regex match against known target values
    Regex,
    /// Glob match (`{value}*`) against known target values
    Wildcard,
}

impl ResolverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolverKind::Direct => "direct",
            ResolverKind::SampleMapping => "sample_mapping",
            ResolverKind::Pattern => "pattern",
            ResolverKind::Regex => "regex",
            ResolverKind::Wildcard => "wildcard",
        }
    }
}

/// How to resolve link values. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    #[serde(default)]
    pub resolver: ResolverKind,
    /// Canonical id → variants, for the sample_mapping resolver
    #[serde(default)]
    pub mappings: Option<HashMap<String, Vec<String>>>,
    /// Template for the pattern resolver; must contain `{sample}`
    #[serde(default)]
    pub pattern: Option<String>,
    /// Column in the target DC matched against resolved values
    #[serde(default)]
    pub target_field: Option<String>,
    #[serde(default = "LinkConfig::default_case_sensitive")]
    pub case_sensitive: bool,
}

impl LinkConfig {
    fn default_case_sensitive() -> bool {
        true
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(pattern) = &self.pattern {
            if !pattern.contains("{sample}") {
                return Err(DepictioError::ConfigInvalid(
                    "pattern must contain the {sample} placeholder".to_string(),
                ));
            }
        }
        if self.resolver == ResolverKind::Pattern && self.pattern.is_none() {
            return Err(DepictioError::ConfigInvalid(
                "pattern resolver requires a pattern template".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkTargetType {
    Table,
    Multiqc,
}

impl LinkTargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkTargetType::Table => "table",
            LinkTargetType::Multiqc => "multiqc",
        }
    }
}

/// Directional link between two data collections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcLink {
    #[serde(rename = "_id", default = "ObjectId::new")]
    pub id: ObjectId,
    pub source_dc_id: ObjectId,
    pub source_column: String,
    pub target_dc_id: ObjectId,
    pub target_type: LinkTargetType,
    #[serde(default)]
    pub link_config: LinkConfig,
    #[serde(default)]
    pub description: Option<String>,
    /// Disabled links are ignored during resolution
    #[serde(default = "DcLink::default_enabled")]
    pub enabled: bool,
}

impl DcLink {
    fn default_enabled() -> bool {
        true
    }
}

/// Request to resolve filtered values through a link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkResolutionRequest {
    pub source_dc_id: ObjectId,
    pub source_column: String,
    pub filter_values: Vec<String>,
    pub target_dc_id: ObjectId,
}

/// Resolved target values plus resolution metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkResolutionResponse {
    pub resolved_values: Vec<String>,
    pub link_id: ObjectId,
    pub resolver_used: String,
    pub match_count: usize,
    pub target_type: String,
    pub source_count: usize,
    pub unmapped_values: Vec<String>,
}
