//! Join engine — execute project-level join definitions over Delta tables
//!
//! The dataframe-level core (`join_frames`, `normalize_join_column_types`,
//! `apply_aggregation`) is pure; [`JoinEngine`] wires it to the object
//! store and records lineage through the metadata store.
//!
//! Type coercion is lossy-but-safe: join columns with mismatched dtypes are
//! cast to String on both sides, preserving equality-join correctness
//! without silent numeric truncation.

use std::sync::Arc;

use bson::oid::ObjectId;
use chrono::Utc;
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{DepictioError, Result};
use crate::events::EventBusHandle;
use crate::metadata::DeltaCatalog;
use crate::models::{
    AggregatedSide, AggregationFunction, DataCollection, GranularityConfig, JoinDefinition,
    JoinMetadata, JoinPreview, JoinType as DcJoinType, JoinValidation, JoinedTableMetadata,
    Project, Workflow,
};
use crate::storage::DeltaStore;

/// Column stamped onto every materialized table identifying the owning run.
/// When both sides of a join carry it, it participates in the join key so
/// rows from different runs never combine.
pub const DEPICTIO_RUN_ID: &str = "depictio_run_id";

pub(crate) fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect()
}

/// Resolve a DC reference to a data collection within the project.
///
/// Dotted tags (`workflow.tag`) name their workflow explicitly; bare tags
/// search the workflow named on the join if any, then project-level DCs,
/// then the project's workflows in declaration order.
pub fn find_data_collection_by_tag<'a>(
    project: &'a Project,
    tag: &str,
    workflow_name: Option<&str>,
) -> Option<(&'a DataCollection, Option<&'a Workflow>)> {
    if let Some((workflow_part, dc_part)) = tag.split_once('.') {
        let workflow = project.workflows.iter().find(|w| w.name == workflow_part)?;
        return workflow
            .data_collection_by_tag(dc_part)
            .map(|dc| (dc, Some(workflow)));
    }

    if let Some(name) = workflow_name {
        let workflow = project.workflows.iter().find(|w| w.name == name)?;
        return workflow
            .data_collection_by_tag(tag)
            .map(|dc| (dc, Some(workflow)));
    }

    if let Some(dc) = project
        .data_collections
        .iter()
        .find(|dc| dc.data_collection_tag == tag)
    {
        return Some((dc, None));
    }
    for workflow in &project.workflows {
        if let Some(dc) = workflow.data_collection_by_tag(tag) {
            return Some((dc, Some(workflow)));
        }
    }
    None
}

/// Cast join columns with mismatched dtypes to String on both sides.
///
/// Columns absent from either side are skipped; presence is validated
/// separately.
pub fn normalize_join_column_types(
    left: DataFrame,
    right: DataFrame,
    on_columns: &[String],
) -> Result<(DataFrame, DataFrame)> {
    let mut casts = Vec::new();
    for name in on_columns {
        let (Ok(left_col), Ok(right_col)) = (left.column(name), right.column(name)) else {
            continue;
        };
        if left_col.dtype() != right_col.dtype() {
            debug!(
                column = %name,
                left = %left_col.dtype(),
                right = %right_col.dtype(),
                "Join column dtypes differ, casting both sides to String"
            );
            casts.push(name.clone());
        }
    }
    if casts.is_empty() {
        return Ok((left, right));
    }

    let exprs: Vec<Expr> = casts
        .iter()
        .map(|name| col(name.as_str()).cast(DataType::String))
        .collect();
    let left = left.lazy().with_columns(exprs.clone()).collect()?;
    let right = right.lazy().with_columns(exprs).collect()?;
    Ok((left, right))
}

fn aggregation_expr(function: AggregationFunction, name: &str) -> Expr {
    let column = col(name);
    match function {
        AggregationFunction::Mean => column.mean(),
        AggregationFunction::Sum => column.sum(),
        AggregationFunction::Min => column.min(),
        AggregationFunction::Max => column.max(),
        AggregationFunction::Median => column.median(),
        AggregationFunction::First => column.first(),
        AggregationFunction::Last => column.last(),
        AggregationFunction::Count => column.count(),
    }
    .alias(name)
}

/// Collapse a frame to one row per group.
///
/// Per-column rule: explicit override > numeric_default for numeric dtypes
/// > categorical_default for everything else.
pub fn apply_aggregation(
    df: DataFrame,
    group_columns: &[String],
    config: &GranularityConfig,
) -> Result<DataFrame> {
    let schema = df.schema().clone();
    let mut aggs = Vec::new();
    for (name, dtype) in schema.iter() {
        if group_columns.iter().any(|g| g == name.as_str()) {
            continue;
        }
        let function = config
            .override_for(name.as_str())
            .unwrap_or(if dtype.is_numeric() {
                config.numeric_default
            } else {
                config.categorical_default
            });
        aggs.push(aggregation_expr(function, name.as_str()));
    }

    let group_exprs: Vec<Expr> = group_columns.iter().map(|name| col(name.as_str())).collect();
    let aggregated = df
        .lazy()
        .group_by(group_exprs)
        .agg(aggs)
        .sort(group_columns.to_vec(), SortMultipleOptions::default())
        .collect()?;
    Ok(aggregated)
}

fn has_duplicate_groups(df: &DataFrame, group_columns: &[String]) -> Result<bool> {
    if group_columns.is_empty() {
        return Ok(false);
    }
    let keys = df.select(group_columns.iter().map(String::as_str))?;
    let unique = keys
        .lazy()
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()?;
    Ok(unique.height() < df.height())
}

fn polars_join_type(how: DcJoinType) -> JoinType {
    match how {
        DcJoinType::Inner => JoinType::Inner,
        DcJoinType::Left => JoinType::Left,
        DcJoinType::Right => JoinType::Right,
        DcJoinType::Outer => JoinType::Full,
    }
}

/// Execute a join over two already-loaded frames.
///
/// Implements the full §join contract: column validation, automatic
/// `depictio_run_id` key, dtype normalization, optional granularity
/// aggregation, and left-wins duplicate-column policy.
pub fn join_frames(
    left: DataFrame,
    right: DataFrame,
    join: &JoinDefinition,
    apply_granularity: bool,
) -> Result<(DataFrame, JoinMetadata)> {
    join.validate()?;

    let left_columns = column_names(&left);
    let right_columns = column_names(&right);
    for name in &join.on_columns {
        if !left_columns.contains(name) {
            return Err(DepictioError::MissingJoinColumn {
                join: join.name.clone(),
                side: "left".to_string(),
                column: name.clone(),
            });
        }
        if !right_columns.contains(name) {
            return Err(DepictioError::MissingJoinColumn {
                join: join.name.clone(),
                side: "right".to_string(),
                column: name.clone(),
            });
        }
    }

    // Cross-run rows must not spuriously combine.
    let mut on_columns = join.on_columns.clone();
    if left_columns.iter().any(|c| c == DEPICTIO_RUN_ID)
        && right_columns.iter().any(|c| c == DEPICTIO_RUN_ID)
        && !on_columns.iter().any(|c| c == DEPICTIO_RUN_ID)
    {
        debug!(join = %join.name, "Adding depictio_run_id to join columns");
        on_columns.push(DEPICTIO_RUN_ID.to_string());
    }

    let (mut left, mut right) = normalize_join_column_types(left, right, &on_columns)?;

    // Granularity reconciliation: collapse the side whose rows are
    // non-unique over the grouping. When both are, the right (enrichment)
    // side is collapsed.
    let mut aggregation_applied = false;
    let mut aggregated_side = AggregatedSide::None;
    if apply_granularity {
        if let Some(config) = &join.granularity {
            if on_columns.iter().any(|c| c == &config.aggregate_to) {
                let group_left: Vec<String> = on_columns
                    .iter()
                    .filter(|c| column_names(&left).contains(c))
                    .cloned()
                    .collect();
                let group_right: Vec<String> = on_columns
                    .iter()
                    .filter(|c| column_names(&right).contains(c))
                    .cloned()
                    .collect();
                let left_needs = has_duplicate_groups(&left, &group_left)?;
                let right_needs = has_duplicate_groups(&right, &group_right)?;

                if right_needs {
                    right = apply_aggregation(right, &group_right, config)?;
                    aggregation_applied = true;
                    aggregated_side = AggregatedSide::Right;
                } else if left_needs {
                    left = apply_aggregation(left, &group_left, config)?;
                    aggregation_applied = true;
                    aggregated_side = AggregatedSide::Left;
                }
            } else {
                warn!(
                    join = %join.name,
                    aggregate_to = %config.aggregate_to,
                    "aggregate_to is not a join column, skipping aggregation"
                );
            }
        }
    }

    // Duplicate non-join columns: the left value wins, so the right copy is
    // dropped before joining.
    let left_names = column_names(&left);
    let right_names = column_names(&right);
    let keep_right: Vec<String> = right_names
        .into_iter()
        .filter(|name| on_columns.contains(name) || !left_names.contains(name))
        .collect();
    let right = right.select(keep_right.iter().map(String::as_str))?;

    let on_exprs: Vec<Expr> = on_columns.iter().map(|name| col(name.as_str())).collect();
    let mut args = JoinArgs::new(polars_join_type(join.how));
    if join.how == DcJoinType::Outer {
        args = args.with_coalesce(JoinCoalesce::CoalesceColumns);
    }
    let joined = left
        .lazy()
        .join(right.lazy(), on_exprs.clone(), on_exprs, args)
        .collect()?;

    let metadata = JoinMetadata {
        joined_rows: joined.height(),
        join_type: join.how,
        join_columns: on_columns,
        aggregation_applied,
        aggregated_side,
    };
    Ok((joined, metadata))
}

/// Count distinct join-key combinations present on both sides
fn matched_key_count(left: &DataFrame, right: &DataFrame, on_columns: &[String]) -> Result<usize> {
    let selector: Vec<&str> = on_columns.iter().map(String::as_str).collect();
    let left_keys = left
        .select(selector.clone())?
        .lazy()
        .unique_stable(None, UniqueKeepStrategy::First);
    let right_keys = right
        .select(selector)?
        .lazy()
        .unique_stable(None, UniqueKeepStrategy::First);
    let on_exprs: Vec<Expr> = on_columns.iter().map(|name| col(name.as_str())).collect();
    let matched = left_keys
        .join(
            right_keys,
            on_exprs.clone(),
            on_exprs,
            JoinArgs::new(JoinType::Inner),
        )
        .collect()?;
    Ok(matched.height())
}

/// Join engine wired to the object store and the delta catalog
pub struct JoinEngine {
    delta: Arc<DeltaStore>,
    meta: Arc<dyn DeltaCatalog>,
    events: Option<EventBusHandle>,
}

impl JoinEngine {
    pub fn new(delta: Arc<DeltaStore>, meta: Arc<dyn DeltaCatalog>) -> Self {
        Self {
            delta,
            meta,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBusHandle) -> Self {
        self.events = Some(events);
        self
    }

    async fn load_side(&self, dc: &DataCollection) -> Result<DataFrame> {
        let location = self
            .meta
            .get_delta_location(&dc.id.to_hex())
            .await?
            .ok_or_else(|| DepictioError::DcNotProcessed(dc.data_collection_tag.clone()))?;
        self.delta.read_dataframe(&location).await
    }

    /// Validate a join against project state without executing it
    pub async fn validate(&self, join: &JoinDefinition, project: &Project) -> JoinValidation {
        let mut result = JoinValidation::default();

        if let Err(e) = join.validate() {
            result.errors.push(e.to_string());
        }

        let workflow_name = join.workflow_name.as_deref();
        let left = find_data_collection_by_tag(project, &join.left_dc, workflow_name);
        let right = find_data_collection_by_tag(project, &join.right_dc, workflow_name);
        result.left_dc_exists = left.is_some();
        result.right_dc_exists = right.is_some();
        if left.is_none() {
            result
                .errors
                .push(format!("left data collection '{}' not found", join.left_dc));
        }
        if right.is_none() {
            result
                .errors
                .push(format!("right data collection '{}' not found", join.right_dc));
        }

        let mut frames = (None, None);
        if let Some((dc, _)) = left {
            match self.load_side(dc).await {
                Ok(df) => {
                    result.left_dc_processed = true;
                    frames.0 = Some(df);
                }
                Err(e) => result
                    .warnings
                    .push(format!("left data collection not processed: {e}")),
            }
        }
        if let Some((dc, _)) = right {
            match self.load_side(dc).await {
                Ok(df) => {
                    result.right_dc_processed = true;
                    frames.1 = Some(df);
                }
                Err(e) => result
                    .warnings
                    .push(format!("right data collection not processed: {e}")),
            }
        }

        if let Some(df) = &frames.0 {
            let names = column_names(df);
            for column in &join.on_columns {
                if !names.contains(column) {
                    result.missing_join_columns_left.push(column.clone());
                    result
                        .errors
                        .push(format!("join column '{column}' missing on left side"));
                }
            }
        }
        if let Some(df) = &frames.1 {
            let names = column_names(df);
            for column in &join.on_columns {
                if !names.contains(column) {
                    result.missing_join_columns_right.push(column.clone());
                    result
                        .errors
                        .push(format!("join column '{column}' missing on right side"));
                }
            }
        }

        result.is_valid = result.errors.is_empty();
        result
    }

    /// Execute the join and return the frame plus its metadata
    pub async fn execute(
        &self,
        join: &JoinDefinition,
        project: &Project,
        apply_granularity: bool,
    ) -> Result<(DataFrame, JoinMetadata)> {
        let workflow_name = join.workflow_name.as_deref();
        let (left_dc, _) = find_data_collection_by_tag(project, &join.left_dc, workflow_name)
            .ok_or_else(|| DepictioError::DcNotFound(join.left_dc.clone()))?;
        let (right_dc, _) = find_data_collection_by_tag(project, &join.right_dc, workflow_name)
            .ok_or_else(|| DepictioError::DcNotFound(join.right_dc.clone()))?;

        let left = self.load_side(left_dc).await?;
        let right = self.load_side(right_dc).await?;
        info!(
            join = %join.name,
            left_rows = left.height(),
            right_rows = right.height(),
            how = %join.how,
            "Executing join"
        );
        join_frames(left, right, join, apply_granularity)
    }

    /// Dry-run: statistics plus up to `sample_limit` result rows
    pub async fn preview(
        &self,
        join: &JoinDefinition,
        project: &Project,
        sample_limit: usize,
    ) -> Result<JoinPreview> {
        let workflow_name = join.workflow_name.as_deref();
        let (left_dc, _) = find_data_collection_by_tag(project, &join.left_dc, workflow_name)
            .ok_or_else(|| DepictioError::DcNotFound(join.left_dc.clone()))?;
        let (right_dc, _) = find_data_collection_by_tag(project, &join.right_dc, workflow_name)
            .ok_or_else(|| DepictioError::DcNotFound(join.right_dc.clone()))?;

        let left = self.load_side(left_dc).await?;
        let right = self.load_side(right_dc).await?;
        let left_rows = left.height();
        let right_rows = right.height();

        let mut warnings = Vec::new();
        let matched_keys = matched_key_count(&left, &right, &join.on_columns)?;
        if matched_keys == 0 {
            warnings.push("no join keys match between the two sides".to_string());
        }

        let (joined, metadata) = join_frames(left, right, join, true)?;
        let sample = joined.head(Some(sample_limit));
        let sample_rows = crate::query::filters::rows_to_json(&sample)?;

        Ok(JoinPreview {
            left_rows,
            right_rows,
            joined_rows: joined.height(),
            joined_columns: column_names(&joined),
            matched_keys,
            sample_rows,
            warnings,
            aggregation_applied: metadata.aggregation_applied,
        })
    }

    /// Execute the join and, when `persist` is set, materialize the result
    /// as a Delta table with a lineage record. Returns the updated
    /// definition (result ids, counts, timestamps; location and size only
    /// when persisted) plus the lineage document for persisted runs.
    ///
    /// Persist is atomic: the Delta commit is the visibility point, so a
    /// failed write leaves the previous result intact. A non-persisted
    /// execution assigns no Delta location and writes no lineage.
    pub async fn execute_and_persist(
        &self,
        join: &JoinDefinition,
        project: &Project,
    ) -> Result<(JoinDefinition, Option<JoinedTableMetadata>)> {
        let workflow_name = join.workflow_name.as_deref();
        let (left_dc, _) = find_data_collection_by_tag(project, &join.left_dc, workflow_name)
            .ok_or_else(|| DepictioError::DcNotFound(join.left_dc.clone()))?;
        let (right_dc, _) = find_data_collection_by_tag(project, &join.right_dc, workflow_name)
            .ok_or_else(|| DepictioError::DcNotFound(join.right_dc.clone()))?;

        let left = self.load_side(left_dc).await?;
        let right = self.load_side(right_dc).await?;
        let left_dc_row_count = left.height();
        let right_dc_row_count = right.height();

        let (joined, metadata) = join_frames(left, right, join, true)?;

        // The result id is the joined DC's stable identity, independent of
        // materialization; the location is owned by the persisted table.
        let result_dc_id = join.result_dc_id.unwrap_or_else(ObjectId::new);
        let now = Utc::now().format(crate::paths::TIME_FORMAT).to_string();

        let mut updated = join.clone();
        updated.result_dc_id = Some(result_dc_id);
        updated.result_dc_tag = Some(format!("joined_{}", join.name));
        updated.executed_at = Some(now.clone());
        updated.row_count = Some(joined.height());
        updated.column_count = Some(joined.width());
        updated.delta_location = None;
        updated.size_bytes = None;

        let lineage = if join.persist {
            let location = self
                .meta
                .get_or_assign_delta_location(&result_dc_id.to_hex(), self.delta.settings())
                .await?;
            self.delta.write_dataframe(&location, &joined, true).await?;
            let size_bytes = self.delta.table_size_bytes(&location).await.unwrap_or(0);

            updated.delta_location = Some(location.clone());
            updated.size_bytes = Some(size_bytes);

            let lineage = JoinedTableMetadata {
                id: ObjectId::new(),
                join_name: join.name.clone(),
                left_dc_id: left_dc.id,
                right_dc_id: right_dc.id,
                delta_table_location: location,
                row_count: joined.height(),
                column_count: joined.width(),
                size_bytes,
                left_dc_row_count,
                right_dc_row_count,
                join_config_snapshot: bson::to_document(join)?,
                created_at: now.clone(),
                updated_at: now,
            };
            self.meta.upsert_joined_table_metadata(&lineage).await?;
            Some(lineage)
        } else {
            None
        };

        if let Some(events) = &self.events {
            events.publish_join_completed(&join.name, result_dc_id).await;
        }
        info!(
            join = %join.name,
            rows = metadata.joined_rows,
            aggregated = metadata.aggregation_applied,
            persisted = join.persist,
            "Join complete"
        );
        Ok((updated, lineage))
    }
}
