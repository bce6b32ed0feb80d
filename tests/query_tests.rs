//! Query pipeline tests — filter model composition, semi-joins, pagination

use std::collections::HashMap;

use polars::prelude::*;

use depictio::query::filters::{
    apply_filter_model, apply_sort_model, paginate, ColumnFilter, CompositeFilter,
    CompositeOperator, FilterKind, SimpleFilter, SortDirection, SortSpec,
};
use depictio::query::semi_join_filter;

fn number_filter(op: &str, value: f64) -> SimpleFilter {
    SimpleFilter {
        filter_type: FilterKind::Number,
        op: Some(op.to_string()),
        filter: Some(serde_json::Value::from(value)),
        date_from: None,
        date_to: None,
        values: None,
    }
}

/// 1000-row frame: ids 0..1000, ages cycling 0..100
fn people() -> DataFrame {
    df!(
        "person_id" => (0..1000i64).collect::<Vec<_>>(),
        "age" => (0..1000i64).map(|i| i % 100).collect::<Vec<_>>(),
    )
    .unwrap()
}

#[test]
fn test_composite_or_counts_both_branches_once() {
    let df = people();
    let under_18 = 1000 / 100 * 18;
    let over_65 = 1000 / 100 * 34; // ages 66..=99

    let model = HashMap::from([(
        "age".to_string(),
        ColumnFilter::Composite(CompositeFilter {
            operator: CompositeOperator::Or,
            condition1: number_filter("lt", 18.0),
            condition2: number_filter("gt", 65.0),
        }),
    )]);
    let keys = vec!["person_id".to_string()];
    let filtered = apply_filter_model(df, &model, Some(&keys)).unwrap();
    assert_eq!(filtered.height(), under_18 + over_65);
}

#[test]
fn test_filter_sort_paginate_pipeline() {
    let df = people();
    let model = HashMap::from([(
        "age".to_string(),
        ColumnFilter::Simple(number_filter("gte", 90.0)),
    )]);
    let filtered = apply_filter_model(df, &model, None).unwrap();
    assert_eq!(filtered.height(), 100);

    let sorted = apply_sort_model(
        filtered,
        &[
            SortSpec {
                col_id: "age".to_string(),
                sort: SortDirection::Desc,
            },
            SortSpec {
                col_id: "person_id".to_string(),
                sort: SortDirection::Asc,
            },
        ],
    )
    .unwrap();

    let (page, total) = paginate(sorted, 0, 25).unwrap();
    assert_eq!(total, 100);
    assert_eq!(page.height(), 25);

    // Highest age first, ties broken by ascending id, stable
    let first_age: i64 = page.column("age").unwrap().i64().unwrap().get(0).unwrap();
    assert_eq!(first_age, 99);
    let ids: Vec<u32> = page
        .column("ID")
        .unwrap()
        .u32()
        .unwrap()
        .into_no_null_iter()
        .collect();
    assert_eq!(ids[0], 0);
    assert_eq!(ids[24], 24);
}

#[test]
fn test_pagination_beyond_end_is_empty() {
    let df = people();
    let (page, total) = paginate(df, 2000, 2100).unwrap();
    assert_eq!(total, 1000);
    assert_eq!(page.height(), 0);
}

#[test]
fn test_semi_join_row_bound() {
    // Target: 100 samples × 10 rows each; filter selects 4 samples → ≤ 40
    // target rows, each with its original multiplicity.
    let samples: Vec<String> = (0..1000).map(|i| format!("s{}", i / 10)).collect();
    let target = df!(
        "sample" => samples,
        "reads" => (0..1000i64).collect::<Vec<_>>(),
    )
    .unwrap();

    let filter_side = df!(
        // Duplicated filter-side keys must not duplicate target rows
        "sample" => ["s1", "s1", "s2", "s3", "s4", "s4"],
        "condition" => ["a", "b", "a", "a", "b", "c"],
    )
    .unwrap();

    let filtered = semi_join_filter(target, &filter_side, "sample").unwrap();
    assert_eq!(filtered.height(), 40);

    let counts = filtered
        .lazy()
        .group_by([col("sample")])
        .agg([col("reads").count().alias("n")])
        .collect()
        .unwrap();
    let ns: Vec<u32> = counts
        .column("n")
        .unwrap()
        .u32()
        .unwrap()
        .into_no_null_iter()
        .collect();
    assert!(ns.iter().all(|n| *n == 10));
}

#[test]
fn test_semi_join_missing_column_is_error() {
    let target = df!("sample" => ["a"]).unwrap();
    let filter_side = df!("other" => ["a"]).unwrap();
    let err = semi_join_filter(target, &filter_side, "sample").unwrap_err();
    assert_eq!(err.kind(), "missing-join-column");
}

#[test]
fn test_date_in_range_filter() {
    let df = df!(
        "collected" => [
            "2025-01-01 00:00:00",
            "2025-02-15 12:00:00",
            "2025-03-20 08:30:00",
            "2025-06-01 00:00:00",
        ],
    )
    .unwrap();

    let model = HashMap::from([(
        "collected".to_string(),
        ColumnFilter::Simple(SimpleFilter {
            filter_type: FilterKind::Date,
            op: Some("inRange".to_string()),
            filter: None,
            date_from: Some("2025-02-01".to_string()),
            date_to: Some("2025-04-01".to_string()),
            values: None,
        }),
    )]);
    let filtered = apply_filter_model(df, &model, None).unwrap();
    assert_eq!(filtered.height(), 2);
}
