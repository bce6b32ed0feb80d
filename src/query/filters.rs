//! Server-side filter model, sorting, pagination, and row serialization
//!
//! The filter model mirrors the grid client's wire format: a dictionary
//! keyed by column, each entry either a simple predicate or a two-condition
//! AND/OR composite. Predicates referencing unknown columns are logged and
//! skipped rather than failing the request.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One entry of the client's `sortModel`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortSpec {
    #[serde(rename = "colId")]
    pub col_id: String,
    pub sort: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Text,
    Number,
    Date,
    Set,
}

/// Simple predicate: `{filterType, type, filter, dateFrom?, dateTo?, values?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleFilter {
    #[serde(rename = "filterType")]
    pub filter_type: FilterKind,
    #[serde(rename = "type", default)]
    pub op: Option<String>,
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(rename = "dateFrom", default)]
    pub date_from: Option<String>,
    #[serde(rename = "dateTo", default)]
    pub date_to: Option<String>,
    #[serde(default)]
    pub values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompositeOperator {
    And,
    Or,
}

/// Two predicates combined with AND/OR
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeFilter {
    pub operator: CompositeOperator,
    pub condition1: SimpleFilter,
    pub condition2: SimpleFilter,
}

/// One column's filter: simple or composite
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnFilter {
    Composite(CompositeFilter),
    Simple(SimpleFilter),
}

fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(datetime) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(datetime);
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(datetime);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Build the polars predicate for a simple filter on `column`.
///
/// `None` when the operator is unknown or the value unusable; the caller
/// logs and skips.
fn simple_filter_expr(df: &DataFrame, column: &str, filter: &SimpleFilter) -> Option<Expr> {
    let target = col(column);
    match filter.filter_type {
        FilterKind::Text => {
            let value = filter.filter.as_ref()?.as_str()?.to_string();
            let op = filter.op.as_deref().unwrap_or("contains");
            match op {
                "contains" => Some(target.str().contains_literal(lit(value))),
                "notContains" => Some(target.str().contains_literal(lit(value)).not()),
                "equals" => Some(target.eq(lit(value))),
                "notEqual" => Some(target.neq(lit(value))),
                "startsWith" => Some(target.str().starts_with(lit(value))),
                "endsWith" => Some(target.str().ends_with(lit(value))),
                other => {
                    warn!(column, op = other, "Unknown text filter operator");
                    None
                }
            }
        }
        FilterKind::Number => {
            let value = filter.filter.as_ref()?.as_f64()?;
            let op = filter.op.as_deref().unwrap_or("equals");
            match op {
                "equals" => Some(target.eq(lit(value))),
                "notEqual" => Some(target.neq(lit(value))),
                "lessThan" | "lt" => Some(target.lt(lit(value))),
                "lessThanOrEqual" | "lte" => Some(target.lt_eq(lit(value))),
                "greaterThan" | "gt" => Some(target.gt(lit(value))),
                "greaterThanOrEqual" | "gte" => Some(target.gt_eq(lit(value))),
                other => {
                    warn!(column, op = other, "Unknown number filter operator");
                    None
                }
            }
        }
        FilterKind::Date => {
            let from = filter.date_from.as_deref().and_then(parse_datetime);
            let op = filter.op.as_deref().unwrap_or("equals");

            // String-typed date columns compare lexicographically in their
            // canonical form; true date columns compare against a literal.
            let is_string_column = df
                .column(column)
                .map(|c| c.dtype() == &DataType::String)
                .unwrap_or(false);
            let date_lit = |datetime: NaiveDateTime| {
                if is_string_column {
                    lit(datetime.format("%Y-%m-%d %H:%M:%S").to_string())
                } else {
                    lit(datetime)
                }
            };
            let comparable = if is_string_column {
                target.clone()
            } else {
                target.clone().cast(DataType::Datetime(TimeUnit::Microseconds, None))
            };

            match op {
                "inRange" => {
                    let from = from?;
                    let to = filter.date_to.as_deref().and_then(parse_datetime)?;
                    Some(
                        comparable
                            .clone()
                            .gt_eq(date_lit(from))
                            .and(comparable.lt_eq(date_lit(to))),
                    )
                }
                "equals" => Some(comparable.eq(date_lit(from?))),
                "notEqual" => Some(comparable.neq(date_lit(from?))),
                "lessThan" | "lt" => Some(comparable.lt(date_lit(from?))),
                "lessThanOrEqual" | "lte" => Some(comparable.lt_eq(date_lit(from?))),
                "greaterThan" | "gt" => Some(comparable.gt(date_lit(from?))),
                "greaterThanOrEqual" | "gte" => Some(comparable.gt_eq(date_lit(from?))),
                other => {
                    warn!(column, op = other, "Unknown date filter operator");
                    None
                }
            }
        }
        FilterKind::Set => {
            let values = filter.values.clone()?;
            let series = Series::new("".into(), values);
            Some(target.is_in(lit(series)))
        }
    }
}

fn apply_simple(df: DataFrame, column: &str, filter: &SimpleFilter) -> Result<DataFrame> {
    match simple_filter_expr(&df, column, filter) {
        Some(expr) => Ok(df.lazy().filter(expr).collect()?),
        None => Ok(df),
    }
}

/// Apply the client filter model.
///
/// OR composites are the unique union of both branches, deduplicated on
/// `key_columns` when provided (all columns otherwise).
pub fn apply_filter_model(
    mut df: DataFrame,
    model: &HashMap<String, ColumnFilter>,
    key_columns: Option<&[String]>,
) -> Result<DataFrame> {
    for (column, filter) in model {
        let known = df
            .get_column_names()
            .iter()
            .any(|c| c.as_str() == column.as_str());
        if !known {
            warn!(column = %column, "Filter references unknown column, skipping");
            continue;
        }
        df = match filter {
            ColumnFilter::Simple(simple) => apply_simple(df, column, simple)?,
            ColumnFilter::Composite(composite) => match composite.operator {
                CompositeOperator::And => {
                    let df = apply_simple(df, column, &composite.condition1)?;
                    apply_simple(df, column, &composite.condition2)?
                }
                CompositeOperator::Or => {
                    let first = apply_simple(df.clone(), column, &composite.condition1)?;
                    let second = apply_simple(df, column, &composite.condition2)?;
                    let subset = key_columns
                        .map(|columns| columns.iter().map(|c| c.as_str().into()).collect());
                    concat(
                        [first.lazy(), second.lazy()],
                        UnionArgs::default(),
                    )?
                    .unique_stable(subset, UniqueKeepStrategy::First)
                    .collect()?
                }
            },
        };
        debug!(column = %column, rows = df.height(), "Filter applied");
    }
    Ok(df)
}

/// Apply the sort model in order; ties are stable.
pub fn apply_sort_model(df: DataFrame, sorts: &[SortSpec]) -> Result<DataFrame> {
    let known: Vec<&SortSpec> = sorts
        .iter()
        .filter(|spec| {
            let exists = df
                .get_column_names()
                .iter()
                .any(|c| c.as_str() == spec.col_id);
            if !exists {
                warn!(column = %spec.col_id, "Sort references unknown column, skipping");
            }
            exists
        })
        .collect();
    if known.is_empty() {
        return Ok(df);
    }

    let columns: Vec<String> = known.iter().map(|spec| spec.col_id.clone()).collect();
    let descending: Vec<bool> = known
        .iter()
        .map(|spec| spec.sort == SortDirection::Desc)
        .collect();
    let options = SortMultipleOptions::default()
        .with_order_descending_multi(descending)
        .with_maintain_order(true);
    Ok(df.sort(columns, options)?)
}

/// Slice `[start_row, end_row)` and attach a monotonically increasing `ID`
/// column reflecting the absolute offset. Returns the page and the total
/// pre-slice row count.
pub fn paginate(df: DataFrame, start_row: usize, end_row: usize) -> Result<(DataFrame, usize)> {
    let total = df.height();
    let length = end_row.saturating_sub(start_row);
    let page = df.slice(start_row as i64, length);
    let page = page.with_row_index("ID".into(), Some(start_row as IdxSize))?;
    Ok((page, total))
}

/// Rewrite `.` in column names to `_` for client-side compatibility.
///
/// Returns the renamed frame plus `(presented, original)` pairs for the
/// names that changed, so the originals survive in metadata.
pub fn normalize_columns(mut df: DataFrame) -> Result<(DataFrame, Vec<(String, String)>)> {
    let renames: Vec<(String, String)> = df
        .get_column_names()
        .iter()
        .filter(|name| name.contains('.'))
        .map(|name| (name.replace('.', "_"), name.to_string()))
        .collect();
    for (presented, original) in &renames {
        df.rename(original, presented.as_str().into())?;
    }
    Ok((df, renames))
}

fn any_value_to_json(value: AnyValue) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(v) => Value::Bool(v),
        AnyValue::String(v) => Value::String(v.to_string()),
        AnyValue::StringOwned(v) => Value::String(v.to_string()),
        AnyValue::Int8(v) => Value::from(v),
        AnyValue::Int16(v) => Value::from(v),
        AnyValue::Int32(v) => Value::from(v),
        AnyValue::Int64(v) => Value::from(v),
        AnyValue::UInt8(v) => Value::from(v),
        AnyValue::UInt16(v) => Value::from(v),
        AnyValue::UInt32(v) => Value::from(v),
        AnyValue::UInt64(v) => Value::from(v),
        AnyValue::Float32(v) => serde_json::Number::from_f64(v as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AnyValue::Float64(v) => serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        other => Value::String(other.to_string()),
    }
}

/// Serialize rows as column-name → value dictionaries
pub fn rows_to_json(df: &DataFrame) -> Result<Vec<serde_json::Map<String, Value>>> {
    let columns = df.get_columns();
    let names: Vec<String> = columns.iter().map(|c| c.name().to_string()).collect();
    let mut rows = Vec::with_capacity(df.height());
    for row_idx in 0..df.height() {
        let mut row = serde_json::Map::with_capacity(columns.len());
        for (column, name) in columns.iter().zip(&names) {
            let value = column.get(row_idx).map_err(crate::error::DepictioError::from)?;
            row.insert(name.clone(), any_value_to_json(value));
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ages_df() -> DataFrame {
        df!(
            "person_id" => (0..100i64).collect::<Vec<_>>(),
            "age" => (0..100i64).map(|i| i % 90).collect::<Vec<_>>(),
            "name" => (0..100).map(|i| format!("person_{i}")).collect::<Vec<_>>(),
        )
        .unwrap()
    }

    fn number_filter(op: &str, value: f64) -> SimpleFilter {
        SimpleFilter {
            filter_type: FilterKind::Number,
            op: Some(op.to_string()),
            filter: Some(Value::from(value)),
            date_from: None,
            date_to: None,
            values: None,
        }
    }

    #[test]
    fn test_number_less_than() {
        let df = ages_df();
        let expected = df
            .column("age")
            .unwrap()
            .i64()
            .unwrap()
            .into_iter()
            .filter(|v| matches!(v, Some(a) if *a < 18))
            .count();

        let model = HashMap::from([(
            "age".to_string(),
            ColumnFilter::Simple(number_filter("lessThan", 18.0)),
        )]);
        let filtered = apply_filter_model(df, &model, None).unwrap();
        assert_eq!(filtered.height(), expected);
    }

    #[test]
    fn test_composite_or_is_deduplicated_union() {
        let df = ages_df();
        let ages = df.column("age").unwrap().i64().unwrap();
        let expected = ages
            .into_iter()
            .filter(|v| matches!(v, Some(a) if *a < 18 || *a > 65))
            .count();

        let model = HashMap::from([(
            "age".to_string(),
            ColumnFilter::Composite(CompositeFilter {
                operator: CompositeOperator::Or,
                condition1: number_filter("lt", 18.0),
                condition2: number_filter("gt", 65.0),
            }),
        )]);
        let key_columns = vec!["person_id".to_string()];
        let filtered = apply_filter_model(df, &model, Some(&key_columns)).unwrap();
        assert_eq!(filtered.height(), expected);
    }

    #[test]
    fn test_composite_and() {
        let df = ages_df();
        let model = HashMap::from([(
            "age".to_string(),
            ColumnFilter::Composite(CompositeFilter {
                operator: CompositeOperator::And,
                condition1: number_filter("gte", 10.0),
                condition2: number_filter("lt", 12.0),
            }),
        )]);
        let filtered = apply_filter_model(df, &model, None).unwrap();
        let ages: Vec<i64> = filtered
            .column("age")
            .unwrap()
            .i64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert!(ages.iter().all(|a| (10..12).contains(a)));
    }

    #[test]
    fn test_text_filters() {
        let df = df!(
            "sample" => ["S1_R1", "S1_R2", "S2_R1", "control"],
        )
        .unwrap();

        let model = HashMap::from([(
            "sample".to_string(),
            ColumnFilter::Simple(SimpleFilter {
                filter_type: FilterKind::Text,
                op: Some("startsWith".to_string()),
                filter: Some(Value::String("S1".to_string())),
                date_from: None,
                date_to: None,
                values: None,
            }),
        )]);
        let filtered = apply_filter_model(df, &model, None).unwrap();
        assert_eq!(filtered.height(), 2);
    }

    #[test]
    fn test_set_filter() {
        let df = df!(
            "sample" => ["a", "b", "c", "d"],
        )
        .unwrap();
        let model = HashMap::from([(
            "sample".to_string(),
            ColumnFilter::Simple(SimpleFilter {
                filter_type: FilterKind::Set,
                op: None,
                filter: None,
                date_from: None,
                date_to: None,
                values: Some(vec!["a".to_string(), "d".to_string()]),
            }),
        )]);
        let filtered = apply_filter_model(df, &model, None).unwrap();
        assert_eq!(filtered.height(), 2);
    }

    #[test]
    fn test_unknown_column_skipped() {
        let df = ages_df();
        let total = df.height();
        let model = HashMap::from([(
            "missing".to_string(),
            ColumnFilter::Simple(number_filter("lt", 18.0)),
        )]);
        let filtered = apply_filter_model(df, &model, None).unwrap();
        assert_eq!(filtered.height(), total);
    }

    #[test]
    fn test_sort_and_paginate() {
        let df = ages_df();
        let sorted = apply_sort_model(
            df,
            &[SortSpec {
                col_id: "age".to_string(),
                sort: SortDirection::Desc,
            }],
        )
        .unwrap();
        let first_age: i64 = sorted.column("age").unwrap().i64().unwrap().get(0).unwrap();
        assert_eq!(first_age, 89);

        let (page, total) = paginate(sorted, 10, 20).unwrap();
        assert_eq!(total, 100);
        assert_eq!(page.height(), 10);
        let first_id: u32 = page.column("ID").unwrap().u32().unwrap().get(0).unwrap();
        assert_eq!(first_id, 10);
    }

    #[test]
    fn test_normalize_columns() {
        let df = df!(
            "stats.mean" => [1.0, 2.0],
            "plain" => [1.0, 2.0],
        )
        .unwrap();
        let (renamed, mapping) = normalize_columns(df).unwrap();
        assert!(renamed.column("stats_mean").is_ok());
        assert_eq!(
            mapping,
            vec![("stats_mean".to_string(), "stats.mean".to_string())]
        );
    }

    #[test]
    fn test_rows_to_json() {
        let df = df!(
            "id" => [1i64, 2],
            "name" => ["a", "b"],
        )
        .unwrap();
        let rows = rows_to_json(&df).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], Value::from(1));
        assert_eq!(rows[1]["name"], Value::String("b".to_string()));
    }
}
