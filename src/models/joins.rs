//! Project-level join definitions and execution metadata
//!
//! Joins are declared once per project and reference data collections by tag
//! (bare, or `workflow.tag` for cross-workflow disambiguation). Execution
//! results and lineage are recorded back onto the definition and into a
//! separate [`JoinedTableMetadata`] document.

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::{DepictioError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Outer,
}

impl std::fmt::Display for JoinType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
            JoinType::Right => "right",
            JoinType::Outer => "outer",
        };
        f.write_str(name)
    }
}

/// Aggregation functions available for granularity reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationFunction {
    Mean,
    Sum,
    Min,
    Max,
    Median,
    First,
    Last,
    Count,
}

/// Per-column override of the default aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnAggregation {
    pub column: String,
    pub function: AggregationFunction,
}

/// How to reconcile tables joined at different granularities.
///
/// The side whose rows are non-unique over `aggregate_to` is collapsed to
/// one row per group before the join; explicit overrides win over the
/// dtype-based defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GranularityConfig {
    /// Column that defines the aggregation key
    pub aggregate_to: String,
    #[serde(default = "GranularityConfig::default_numeric")]
    pub numeric_default: AggregationFunction,
    #[serde(default = "GranularityConfig::default_categorical")]
    pub categorical_default: AggregationFunction,
    #[serde(default)]
    pub column_overrides: Vec<ColumnAggregation>,
}

impl GranularityConfig {
    fn default_numeric() -> AggregationFunction {
        AggregationFunction::Mean
    }

    fn default_categorical() -> AggregationFunction {
        AggregationFunction::First
    }

    pub fn override_for(&self, column: &str) -> Option<AggregationFunction> {
        self.column_overrides
            .iter()
            .find(|o| o.column == column)
            .map(|o| o.function)
    }
}

/// Declarative join between two data collections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinDefinition {
    /// Optional stable id carried into the result DC, so the joined table's
    /// Delta location survives re-execution
    #[serde(default)]
    pub id: Option<ObjectId>,
    /// Unique within the project; `[A-Za-z0-9_-]+`
    pub name: String,
    /// Left side: bare tag or `workflow.tag`
    pub left_dc: String,
    /// Right side: bare tag or `workflow.tag`
    pub right_dc: String,
    pub on_columns: Vec<String>,
    #[serde(default = "JoinDefinition::default_how")]
    pub how: JoinType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub granularity: Option<GranularityConfig>,
    #[serde(default = "JoinDefinition::default_persist")]
    pub persist: bool,
    /// Restricts bare-tag resolution to this workflow when set
    #[serde(default)]
    pub workflow_name: Option<String>,

    // Populated after execution
    #[serde(default)]
    pub result_dc_id: Option<ObjectId>,
    #[serde(default)]
    pub result_dc_tag: Option<String>,
    #[serde(default)]
    pub delta_location: Option<String>,
    #[serde(default)]
    pub executed_at: Option<String>,
    #[serde(default)]
    pub row_count: Option<usize>,
    #[serde(default)]
    pub column_count: Option<usize>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

impl JoinDefinition {
    fn default_how() -> JoinType {
        JoinType::Inner
    }

    fn default_persist() -> bool {
        true
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(DepictioError::ConfigInvalid(format!(
                "join name '{}' must contain only alphanumerics, underscores, and hyphens",
                self.name
            )));
        }
        if self.on_columns.is_empty() {
            return Err(DepictioError::ConfigInvalid(format!(
                "join '{}': on_columns must contain at least one column",
                self.name
            )));
        }
        let unique: std::collections::HashSet<&str> =
            self.on_columns.iter().map(String::as_str).collect();
        if unique.len() != self.on_columns.len() {
            return Err(DepictioError::ConfigInvalid(format!(
                "join '{}': on_columns must not contain duplicates",
                self.name
            )));
        }
        if self.left_dc == self.right_dc {
            return Err(DepictioError::ConfigInvalid(format!(
                "join '{}': left_dc and right_dc must be different data collections",
                self.name
            )));
        }
        Ok(())
    }
}

/// Which side was collapsed by granularity reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregatedSide {
    Left,
    Right,
    None,
}

/// Metadata returned alongside a join result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinMetadata {
    pub joined_rows: usize,
    pub join_type: JoinType,
    pub join_columns: Vec<String>,
    pub aggregation_applied: bool,
    pub aggregated_side: AggregatedSide,
}

/// Outcome of validating a join configuration against project state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub left_dc_exists: bool,
    pub right_dc_exists: bool,
    pub left_dc_processed: bool,
    pub right_dc_processed: bool,
    pub missing_join_columns_left: Vec<String>,
    pub missing_join_columns_right: Vec<String>,
}

/// Statistics and sample rows for a join dry run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinPreview {
    pub left_rows: usize,
    pub right_rows: usize,
    pub joined_rows: usize,
    pub joined_columns: Vec<String>,
    pub matched_keys: usize,
    pub sample_rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub warnings: Vec<String>,
    pub aggregation_applied: bool,
}

/// Lineage record for a persisted joined Delta table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedTableMetadata {
    #[serde(rename = "_id", default = "ObjectId::new")]
    pub id: ObjectId,
    pub join_name: String,
    pub left_dc_id: ObjectId,
    pub right_dc_id: ObjectId,
    pub delta_table_location: String,
    pub row_count: usize,
    pub column_count: usize,
    pub size_bytes: u64,
    pub left_dc_row_count: usize,
    pub right_dc_row_count: usize,
    /// Snapshot of the join configuration at execution time
    pub join_config_snapshot: bson::Document,
    pub created_at: String,
    pub updated_at: String,
}
