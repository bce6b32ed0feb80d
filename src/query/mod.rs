//! Interactive query pipeline
//!
//! Combines dashboard filter state with the project's join graph to serve
//! paginated, sorted, filtered slices of one target DC. Cross-DC filters
//! reach the target either through a link (resolver-translated values) or
//! through the join graph — as a semi-join for single-DC targets (never
//! expanding target rows) or an iterative join for joined targets.

pub mod filters;
pub mod graph;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bson::oid::ObjectId;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{DepictioError, Result};
use crate::joins::column_names;
use crate::links::LinkEngine;
use crate::metadata::DeltaCatalog;
use crate::models::{DcLink, LinkResolutionRequest, Project};
use crate::storage::DeltaStore;

use filters::{ColumnFilter, SortSpec};
use graph::{member_dc_ids, JoinGraph};

/// Client page request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(rename = "startRow", default)]
    pub start_row: usize,
    #[serde(rename = "endRow", default)]
    pub end_row: usize,
    #[serde(rename = "filterModel", default)]
    pub filter_model: HashMap<String, ColumnFilter>,
    #[serde(rename = "sortModel", default)]
    pub sort_model: Vec<SortSpec>,
}

/// Page response: serialized rows plus the pre-pagination row count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(rename = "rowData")]
    pub row_data: Vec<serde_json::Map<String, Value>>,
    #[serde(rename = "rowCount")]
    pub row_count: usize,
}

/// Metadata of one active dashboard filter component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentMetadata {
    pub dc_id: String,
    pub column_name: String,
    pub interactive_component_type: String,
    #[serde(default)]
    pub column_type: Option<String>,
}

/// One active filter component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterComponent {
    pub index: String,
    pub value: Value,
    pub metadata: ComponentMetadata,
}

/// Outcome of the DC compatibility analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    /// Filters target the same DC set (or there are none)
    Direct,
    /// A join connects at least one target DC with at least one filter DC
    JoinBased,
    /// No relationship; interactive filters are dropped for this table
    Incompatible,
}

/// Classify the relationship between the target's DC set and the DCs
/// referenced by the filter components.
pub fn analyze_compatibility(
    target_ids: &HashSet<String>,
    filter_ids: &HashSet<String>,
    graph: &JoinGraph,
) -> Compatibility {
    if filter_ids.is_empty()
        || filter_ids.is_subset(target_ids)
        || target_ids.is_subset(filter_ids)
    {
        return Compatibility::Direct;
    }
    if graph.connecting_edge(target_ids, filter_ids).is_some() {
        return Compatibility::JoinBased;
    }
    Compatibility::Incompatible
}

fn json_scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_as_strings(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(json_scalar_to_string).collect(),
        Value::Null => Vec::new(),
        other => vec![json_scalar_to_string(other)],
    }
}

/// Predicate for one interactive component on a loaded frame.
///
/// Equality-style matches follow the cast-to-string coercion policy so a
/// select over a numeric column still filters correctly.
fn component_filter_expr(df: &DataFrame, component: &FilterComponent) -> Option<Expr> {
    let column = &component.metadata.column_name;
    let exists = df
        .get_column_names()
        .iter()
        .any(|c| c.as_str() == column.as_str());
    if !exists {
        warn!(column = %column, "Interactive filter references unknown column, skipping");
        return None;
    }
    let target = col(column.as_str());

    match component.metadata.interactive_component_type.as_str() {
        "slider" => component.value.as_f64().map(|v| target.eq(lit(v))),
        "range_slider" | "date_range" => {
            let Value::Array(bounds) = &component.value else {
                return None;
            };
            if bounds.len() != 2 {
                return None;
            }
            match (bounds[0].as_f64(), bounds[1].as_f64()) {
                (Some(low), Some(high)) => {
                    Some(target.clone().gt_eq(lit(low)).and(target.lt_eq(lit(high))))
                }
                _ => {
                    let low = json_scalar_to_string(&bounds[0]);
                    let high = json_scalar_to_string(&bounds[1]);
                    Some(target.clone().gt_eq(lit(low)).and(target.lt_eq(lit(high))))
                }
            }
        }
        "text_input" => component
            .value
            .as_str()
            .map(|v| target.str().contains_literal(lit(v.to_string()))),
        _ => {
            let values = value_as_strings(&component.value);
            if values.is_empty() {
                return None;
            }
            let series = Series::new("".into(), values);
            Some(target.cast(DataType::String).is_in(lit(series)))
        }
    }
}

/// Apply the given components' filters to a frame
pub fn apply_component_filters(
    df: DataFrame,
    components: &[&FilterComponent],
) -> Result<DataFrame> {
    let mut current = df;
    for component in components {
        if let Some(expr) = component_filter_expr(&current, component) {
            current = current.lazy().filter(expr).collect()?;
            debug!(
                column = %component.metadata.column_name,
                rows = current.height(),
                "Interactive filter applied"
            );
        }
    }
    Ok(current)
}

/// Filter `target` to rows whose `join_column` value appears in
/// `filter_side` — without emitting any filter-side columns, so target rows
/// are never duplicated beyond their original multiplicity.
pub fn semi_join_filter(
    target: DataFrame,
    filter_side: &DataFrame,
    join_column: &str,
) -> Result<DataFrame> {
    if !column_names(filter_side).iter().any(|c| c == join_column) {
        return Err(DepictioError::MissingJoinColumn {
            join: "semi-join".to_string(),
            side: "filter".to_string(),
            column: join_column.to_string(),
        });
    }
    if !column_names(&target).iter().any(|c| c == join_column) {
        return Err(DepictioError::MissingJoinColumn {
            join: "semi-join".to_string(),
            side: "target".to_string(),
            column: join_column.to_string(),
        });
    }

    let keys = filter_side
        .column(join_column)?
        .as_materialized_series()
        .unique()?
        .cast(&DataType::String)?;
    let before = target.height();
    let filtered = target
        .lazy()
        .filter(
            col(join_column)
                .cast(DataType::String)
                .is_in(lit(keys)),
        )
        .collect()?;
    debug!(
        join_column,
        before,
        after = filtered.height(),
        "Semi-join filter applied"
    );
    Ok(filtered)
}

/// Query pipeline wired to the object store and the delta catalog
pub struct QueryPipeline {
    delta: Arc<DeltaStore>,
    meta: Arc<dyn DeltaCatalog>,
    links: LinkEngine,
}

impl QueryPipeline {
    pub fn new(delta: Arc<DeltaStore>, meta: Arc<dyn DeltaCatalog>) -> Self {
        Self {
            delta,
            meta,
            links: LinkEngine::default(),
        }
    }

    async fn load_dc(&self, dc_id: &str) -> Result<DataFrame> {
        let location = self
            .meta
            .get_delta_location(dc_id)
            .await?
            .ok_or_else(|| DepictioError::DcNotProcessed(dc_id.to_string()))?;
        self.delta.read_dataframe(&location).await
    }

    /// Load the target's frame: the DC's own table, or the materialized
    /// join result for composite (`dc1--dc2`) targets.
    async fn load_target(&self, project: &Project, target_dc_id: &str) -> Result<DataFrame> {
        if !target_dc_id.contains("--") {
            return self.load_dc(target_dc_id).await;
        }

        let members = member_dc_ids(target_dc_id);
        let graph = JoinGraph::from_project(project);
        let mut member_iter = members.iter();
        let (Some(a), Some(b)) = (member_iter.next(), member_iter.next()) else {
            return Err(DepictioError::DcNotFound(target_dc_id.to_string()));
        };
        let join_name = graph
            .edge_between(a, b)
            .map(|edge| edge.join_name.clone())
            .ok_or_else(|| DepictioError::DcNotFound(target_dc_id.to_string()))?;

        let join = project
            .joins
            .iter()
            .find(|j| j.name == join_name)
            .ok_or_else(|| DepictioError::DcNotFound(join_name.clone()))?;
        let location = match &join.delta_location {
            Some(location) => location.clone(),
            None => {
                let lineage = self
                    .meta
                    .get_joined_table_metadata(&join.name)
                    .await?
                    .ok_or_else(|| DepictioError::DcNotProcessed(join.name.clone()))?;
                lineage.delta_table_location
            }
        };
        self.delta.read_dataframe(&location).await
    }

    /// Resolve a component's values through an enabled link to the target,
    /// if one exists. Returns the effective target column and the resolved
    /// values.
    fn resolve_link_values(
        &self,
        links: &[DcLink],
        component: &FilterComponent,
        target_ids: &HashSet<String>,
        target_known_values: Option<&[String]>,
    ) -> Option<(String, Vec<String>)> {
        let source_dc = ObjectId::parse_str(&component.metadata.dc_id).ok()?;
        for target_hex in target_ids {
            let target_dc = ObjectId::parse_str(target_hex).ok()?;
            let request = LinkResolutionRequest {
                source_dc_id: source_dc,
                source_column: component.metadata.column_name.clone(),
                filter_values: value_as_strings(&component.value),
                target_dc_id: target_dc,
            };
            let response = self
                .links
                .resolve(links, &request, target_known_values)
                .ok()
                .flatten();
            if let Some(response) = response {
                let link = LinkEngine::find_link(links, &request)?;
                let target_column = link
                    .link_config
                    .target_field
                    .clone()
                    .unwrap_or_else(|| component.metadata.column_name.clone());
                info!(
                    resolver = %response.resolver_used,
                    resolved = response.match_count,
                    unmapped = response.unmapped_values.len(),
                    "Link resolution applied to filter"
                );
                return Some((target_column, response.resolved_values));
            }
        }
        None
    }

    /// Serve one page for `target_dc_id` under the active filter state.
    pub async fn query(
        &self,
        project: &Project,
        target_dc_id: &str,
        request: &QueryRequest,
        components: &[FilterComponent],
    ) -> Result<QueryResponse> {
        let target_ids = member_dc_ids(target_dc_id);
        let filter_ids: HashSet<String> = components
            .iter()
            .map(|c| c.metadata.dc_id.clone())
            .collect();
        let graph = JoinGraph::from_project(project);
        let compatibility = analyze_compatibility(&target_ids, &filter_ids, &graph);
        info!(
            target = target_dc_id,
            components = components.len(),
            ?compatibility,
            "Query received"
        );

        let df = match compatibility {
            Compatibility::Direct => {
                let df = self.load_target(project, target_dc_id).await?;
                let applicable: Vec<&FilterComponent> = components
                    .iter()
                    .filter(|c| target_ids.contains(&c.metadata.dc_id))
                    .collect();
                apply_component_filters(df, &applicable)?
            }
            Compatibility::JoinBased => {
                if target_ids.len() == 1 {
                    self.semi_join_acquire(project, target_dc_id, &target_ids, components, &graph)
                        .await?
                } else {
                    self.iterative_join_acquire(project, target_dc_id, &target_ids, components, &graph)
                        .await?
                }
            }
            Compatibility::Incompatible => {
                warn!(
                    target = target_dc_id,
                    "No join links filter DCs to the target; interactive filters dropped"
                );
                self.load_target(project, target_dc_id).await?
            }
        };

        // Projection: client filter model, sort, pagination
        let df = filters::apply_filter_model(df, &request.filter_model, None)?;
        let df = filters::apply_sort_model(df, &request.sort_model)?;
        let (page, total) = filters::paginate(df, request.start_row, request.end_row)?;
        let (page, renamed) = filters::normalize_columns(page)?;
        if !renamed.is_empty() {
            debug!(count = renamed.len(), "Columns normalized for presentation");
        }

        Ok(QueryResponse {
            row_data: filters::rows_to_json(&page)?,
            row_count: total,
        })
    }

    /// Single-DC target filtered by cross-DC components: link resolution
    /// when a link exists, otherwise a semi-join through the join graph.
    async fn semi_join_acquire(
        &self,
        project: &Project,
        target_dc_id: &str,
        target_ids: &HashSet<String>,
        components: &[FilterComponent],
        graph: &JoinGraph,
    ) -> Result<DataFrame> {
        // A missing target table is fatal.
        let mut df = self.load_target(project, target_dc_id).await?;

        let (same_dc, cross_dc): (Vec<&FilterComponent>, Vec<&FilterComponent>) = components
            .iter()
            .partition(|c| target_ids.contains(&c.metadata.dc_id));
        df = apply_component_filters(df, &same_dc)?;

        for component in cross_dc {
            // Link pre-resolution takes precedence over the join graph.
            let target_known: Option<Vec<String>> = project
                .links
                .iter()
                .find(|l| l.enabled && l.source_dc_id.to_hex() == component.metadata.dc_id)
                .and_then(|link| link.link_config.target_field.as_ref())
                .and_then(|field| {
                    df.column(field).ok().and_then(|column| {
                        column
                            .as_materialized_series()
                            .cast(&DataType::String)
                            .ok()?
                            .str()
                            .ok()
                            .map(|ca| {
                                ca.into_iter()
                                    .flatten()
                                    .map(|v| v.to_string())
                                    .collect::<Vec<_>>()
                            })
                    })
                });

            if let Some((target_column, resolved)) = self.resolve_link_values(
                &project.links,
                component,
                target_ids,
                target_known.as_deref(),
            ) {
                if resolved.is_empty() {
                    continue;
                }
                let series = Series::new("".into(), resolved);
                df = df
                    .lazy()
                    .filter(
                        col(target_column.as_str())
                            .cast(DataType::String)
                            .is_in(lit(series)),
                    )
                    .collect()?;
                continue;
            }

            let Some(edge) = graph.edge_between(target_dc_id, &component.metadata.dc_id) else {
                warn!(
                    filter_dc = %component.metadata.dc_id,
                    "No join edge for cross-DC filter, skipping"
                );
                continue;
            };

            // A missing filter-side table downgrades to "no additional
            // filter".
            let filter_df = match self.load_dc(&component.metadata.dc_id).await {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(
                        filter_dc = %component.metadata.dc_id,
                        error = %e,
                        "Filter-side table unavailable, filter dropped"
                    );
                    continue;
                }
            };
            let filter_df = apply_component_filters(filter_df, &[component])?;
            df = semi_join_filter(df, &filter_df, &edge.on_columns[0])?;
        }
        Ok(df)
    }

    /// Joined target: traverse the join graph over every implied DC,
    /// applying per-DC filters during each step.
    async fn iterative_join_acquire(
        &self,
        project: &Project,
        target_dc_id: &str,
        target_ids: &HashSet<String>,
        components: &[FilterComponent],
        graph: &JoinGraph,
    ) -> Result<DataFrame> {
        let mut wanted: HashSet<String> = target_ids.clone();
        wanted.extend(components.iter().map(|c| c.metadata.dc_id.clone()));

        let start = target_ids
            .iter()
            .next()
            .ok_or_else(|| DepictioError::DcNotFound(target_dc_id.to_string()))?
            .clone();
        let Some(order) = graph.traversal(&start, &wanted) else {
            warn!(
                target = target_dc_id,
                "Join graph cannot cover all filter DCs, using materialized result"
            );
            return self.load_target(project, target_dc_id).await;
        };

        let components_by_dc = |dc_id: &str| -> Vec<&FilterComponent> {
            components
                .iter()
                .filter(|c| c.metadata.dc_id == dc_id)
                .collect()
        };

        let mut df = apply_component_filters(self.load_dc(&start).await?, &components_by_dc(&start))?;
        let mut joined_ids: HashSet<String> = HashSet::from([start]);

        for edge in order {
            let incoming = if joined_ids.contains(&edge.left_dc_id) {
                &edge.right_dc_id
            } else if joined_ids.contains(&edge.right_dc_id) {
                &edge.left_dc_id
            } else {
                continue;
            };
            if joined_ids.contains(incoming) || !wanted.contains(incoming) {
                continue;
            }

            let incoming_df =
                apply_component_filters(self.load_dc(incoming).await?, &components_by_dc(incoming))?;

            let on_exprs: Vec<Expr> = edge
                .on_columns
                .iter()
                .map(|name| col(name.as_str()))
                .collect();
            df = df
                .lazy()
                .join(
                    incoming_df.lazy(),
                    on_exprs.clone(),
                    on_exprs,
                    JoinArgs::new(JoinType::Inner),
                )
                .collect()?;
            joined_ids.insert(incoming.clone());
            debug!(dc = %incoming, rows = df.height(), "Iterative join step");
        }
        Ok(df)
    }
}
