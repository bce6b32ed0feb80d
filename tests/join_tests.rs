//! Join engine tests — join types, type normalization, granularity

use bson::oid::ObjectId;
use polars::prelude::*;

use depictio::joins::{
    find_data_collection_by_tag, join_frames, normalize_join_column_types, DEPICTIO_RUN_ID,
};
use depictio::models::{
    AggregatedSide, AggregationFunction, ColumnAggregation, GranularityConfig, JoinDefinition,
    JoinType, Permission, Project, ProjectType,
};

fn join_def(name: &str, left: &str, right: &str, on: &[&str], how: JoinType) -> JoinDefinition {
    JoinDefinition {
        id: None,
        name: name.to_string(),
        left_dc: left.to_string(),
        right_dc: right.to_string(),
        on_columns: on.iter().map(|s| s.to_string()).collect(),
        how,
        description: None,
        granularity: None,
        persist: false,
        workflow_name: None,
        result_dc_id: None,
        result_dc_tag: None,
        delta_location: None,
        executed_at: None,
        row_count: None,
        column_count: None,
        size_bytes: None,
    }
}

fn granularity(aggregate_to: &str, numeric: AggregationFunction) -> GranularityConfig {
    GranularityConfig {
        aggregate_to: aggregate_to.to_string(),
        numeric_default: numeric,
        categorical_default: AggregationFunction::First,
        column_overrides: vec![],
    }
}

#[test]
fn test_inner_join_keeps_matching_rows() {
    let left = df!(
        "id" => [1i64, 2, 3],
        "name" => ["Alice", "Bob", "Charlie"],
    )
    .unwrap();
    let right = df!(
        "id" => [2i64, 3, 4],
        "age" => [25i64, 30, 35],
    )
    .unwrap();

    let (joined, metadata) =
        join_frames(left, right, &join_def("j", "l", "r", &["id"], JoinType::Inner), false).unwrap();
    assert_eq!(joined.height(), 2);
    assert_eq!(metadata.joined_rows, 2);
    assert_eq!(metadata.join_type, JoinType::Inner);
    assert_eq!(metadata.aggregated_side, AggregatedSide::None);
}

#[test]
fn test_left_join_fills_nulls() {
    let left = df!(
        "id" => [1i64, 2, 3],
        "name" => ["Alice", "Bob", "Charlie"],
    )
    .unwrap();
    let right = df!(
        "id" => [2i64, 3, 4],
        "age" => [25i64, 30, 35],
    )
    .unwrap();

    let (joined, _) =
        join_frames(left, right, &join_def("j", "l", "r", &["id"], JoinType::Left), false).unwrap();
    assert_eq!(joined.height(), 3);

    let unmatched = joined
        .clone()
        .lazy()
        .filter(col("id").eq(lit(1i64)))
        .collect()
        .unwrap();
    assert!(unmatched.column("age").unwrap().get(0).unwrap().is_null());
}

#[test]
fn test_outer_join_covers_both_sides() {
    let left = df!(
        "id" => [1i64, 2, 3],
        "name" => ["A", "B", "C"],
    )
    .unwrap();
    let right = df!(
        "id" => [2i64, 3, 4],
        "age" => [25i64, 30, 35],
    )
    .unwrap();

    let (joined, _) =
        join_frames(left, right, &join_def("j", "l", "r", &["id"], JoinType::Outer), false)
            .unwrap();
    assert_eq!(joined.height(), 4);
}

#[test]
fn test_mismatched_types_cast_to_string() {
    let left = df!(
        "id" => [1i64, 2, 3],
        "name" => ["A", "B", "C"],
    )
    .unwrap();
    let right = df!(
        "id" => ["2", "3", "4"],
        "age" => [25i64, 30, 35],
    )
    .unwrap();

    let (joined, _) =
        join_frames(left, right, &join_def("j", "l", "r", &["id"], JoinType::Inner), false)
            .unwrap();
    // Lexicographically equal keys match after coercion
    assert_eq!(joined.height(), 2);
    assert_eq!(joined.column("id").unwrap().dtype(), &DataType::String);
}

#[test]
fn test_normalize_preserves_matching_dtypes() {
    let left = df!("id" => [1i64, 2]).unwrap();
    let right = df!("id" => [2i64, 3]).unwrap();
    let (left, right) =
        normalize_join_column_types(left, right, &["id".to_string()]).unwrap();
    assert_eq!(left.column("id").unwrap().dtype(), &DataType::Int64);
    assert_eq!(right.column("id").unwrap().dtype(), &DataType::Int64);
}

#[test]
fn test_duplicate_non_join_columns_left_wins() {
    let left = df!(
        "id" => [1i64, 2, 3],
        "name" => ["A", "B", "C"],
        "value" => [10i64, 20, 30],
    )
    .unwrap();
    let right = df!(
        "id" => [2i64, 3, 4],
        "name" => ["X", "Y", "Z"],
        "value" => [100i64, 200, 300],
    )
    .unwrap();

    let (joined, _) =
        join_frames(left, right, &join_def("j", "l", "r", &["id"], JoinType::Inner), false)
            .unwrap();
    let row = joined
        .lazy()
        .filter(col("id").eq(lit(2i64)))
        .collect()
        .unwrap();
    assert_eq!(
        row.column("name").unwrap().get(0).unwrap(),
        AnyValue::String("B")
    );
    assert_eq!(
        row.column("value").unwrap().get(0).unwrap(),
        AnyValue::Int64(20)
    );
}

#[test]
fn test_depictio_run_id_auto_added() {
    let left = df!(
        "id" => [1i64, 1],
        "name" => ["A", "A2"],
        DEPICTIO_RUN_ID => ["run1", "run2"],
    )
    .unwrap();
    let right = df!(
        "id" => [1i64, 1],
        "score" => [10i64, 20],
        DEPICTIO_RUN_ID => ["run1", "run2"],
    )
    .unwrap();

    let (joined, metadata) =
        join_frames(left, right, &join_def("j", "l", "r", &["id"], JoinType::Inner), false)
            .unwrap();
    assert!(metadata.join_columns.contains(&DEPICTIO_RUN_ID.to_string()));
    // Without the run id in the key this would be a 2×2 cross per id
    assert_eq!(joined.height(), 2);
}

#[test]
fn test_missing_join_column_is_fatal() {
    let left = df!("other" => [1i64]).unwrap();
    let right = df!("id" => [1i64]).unwrap();

    let err = join_frames(left, right, &join_def("j", "l", "r", &["id"], JoinType::Inner), false)
        .unwrap_err();
    assert_eq!(err.kind(), "missing-join-column");
}

#[test]
fn test_granularity_aggregates_right_side() {
    // Spec scenario: left 3 rows, right has two rows per matching id
    let left = df!(
        "id" => [1i64, 2, 3],
        "name" => ["A", "B", "C"],
    )
    .unwrap();
    let right = df!(
        "id" => [2i64, 2, 3, 3],
        "score" => [100i64, 150, 200, 250],
    )
    .unwrap();

    let mut join = join_def("j", "l", "r", &["id"], JoinType::Inner);
    join.granularity = Some(granularity("id", AggregationFunction::Mean));

    let (joined, metadata) = join_frames(left, right, &join, true).unwrap();
    assert!(metadata.aggregation_applied);
    assert_eq!(metadata.aggregated_side, AggregatedSide::Right);
    assert_eq!(joined.height(), 2);

    let sorted = joined
        .sort(["id"], SortMultipleOptions::default())
        .unwrap();
    let scores: Vec<f64> = sorted
        .column("score")
        .unwrap()
        .f64()
        .unwrap()
        .into_no_null_iter()
        .collect();
    assert_eq!(scores, vec![125.0, 225.0]);
    let names: Vec<&str> = sorted
        .column("name")
        .unwrap()
        .str()
        .unwrap()
        .into_no_null_iter()
        .collect();
    assert_eq!(names, vec!["B", "C"]);
}

#[test]
fn test_granularity_aggregates_left_side() {
    let left = df!(
        "id" => [2i64, 2, 3, 3],
        "value" => [10i64, 20, 30, 40],
    )
    .unwrap();
    let right = df!(
        "id" => [2i64, 3, 4],
        "score" => [100i64, 200, 300],
    )
    .unwrap();

    let mut join = join_def("j", "l", "r", &["id"], JoinType::Inner);
    join.granularity = Some(granularity("id", AggregationFunction::Sum));

    let (joined, metadata) = join_frames(left, right, &join, true).unwrap();
    assert!(metadata.aggregation_applied);
    assert_eq!(metadata.aggregated_side, AggregatedSide::Left);
    assert_eq!(joined.height(), 2);

    let row = joined
        .lazy()
        .filter(col("id").eq(lit(2i64)))
        .collect()
        .unwrap();
    assert_eq!(
        row.column("value").unwrap().get(0).unwrap(),
        AnyValue::Int64(30)
    );
}

#[test]
fn test_granularity_column_override_beats_default() {
    let left = df!(
        "id" => [1i64, 2],
        "name" => ["A", "B"],
    )
    .unwrap();
    let right = df!(
        "id" => [1i64, 1, 2, 2],
        "value" => [10i64, 20, 30, 40],
    )
    .unwrap();

    let mut join = join_def("j", "l", "r", &["id"], JoinType::Inner);
    join.granularity = Some(GranularityConfig {
        aggregate_to: "id".to_string(),
        numeric_default: AggregationFunction::Mean,
        categorical_default: AggregationFunction::First,
        column_overrides: vec![ColumnAggregation {
            column: "value".to_string(),
            function: AggregationFunction::Max,
        }],
    });

    let (joined, _) = join_frames(left, right, &join, true).unwrap();
    let sorted = joined.sort(["id"], SortMultipleOptions::default()).unwrap();
    let values: Vec<i64> = sorted
        .column("value")
        .unwrap()
        .i64()
        .unwrap()
        .into_no_null_iter()
        .collect();
    assert_eq!(values, vec![20, 40]);
}

#[test]
fn test_unique_groups_skip_aggregation() {
    let left = df!(
        "id" => [1i64, 2],
        "name" => ["A", "B"],
    )
    .unwrap();
    let right = df!(
        "id" => [1i64, 2],
        "score" => [10i64, 20],
    )
    .unwrap();

    let mut join = join_def("j", "l", "r", &["id"], JoinType::Inner);
    join.granularity = Some(granularity("id", AggregationFunction::Mean));

    let (_, metadata) = join_frames(left, right, &join, true).unwrap();
    assert!(!metadata.aggregation_applied);
    assert_eq!(metadata.aggregated_side, AggregatedSide::None);
}

#[test]
fn test_empty_result_is_valid() {
    let left = df!(
        "id" => [1i64, 2],
        "name" => ["A", "B"],
    )
    .unwrap();
    let right = df!(
        "id" => [8i64, 9],
        "score" => [1i64, 2],
    )
    .unwrap();

    let (joined, metadata) =
        join_frames(left, right, &join_def("j", "l", "r", &["id"], JoinType::Inner), false)
            .unwrap();
    assert_eq!(joined.height(), 0);
    assert_eq!(metadata.joined_rows, 0);
}

// ─── DC resolution ───

mod resolution {
    use super::*;
    use depictio::models::data_collections::DataCollection;
    use depictio::models::workflows::{
        DataLocationStructure, Workflow, WorkflowDataLocation, WorkflowEngine,
    };

    fn joined_dc(tag: &str) -> DataCollection {
        use depictio::models::data_collections::*;
        DataCollection {
            id: ObjectId::new(),
            data_collection_tag: tag.to_string(),
            description: None,
            config: DataCollectionConfig {
                dc_type: DcType::Table,
                metatype: None,
                source: DcSource::Joined,
                scan: None,
                properties: DcSpecificProperties::Table(TableProperties {
                    format: TableFormat::Parquet,
                    polars_kwargs: PolarsReadOptions::default(),
                    keep_columns: None,
                }),
            },
        }
    }

    fn workflow(name: &str, dcs: Vec<DataCollection>) -> Workflow {
        Workflow {
            id: ObjectId::new(),
            name: name.to_string(),
            engine: WorkflowEngine {
                name: "snakemake".to_string(),
                version: None,
            },
            catalog: None,
            repository_url: None,
            data_location: WorkflowDataLocation {
                structure: DataLocationStructure::Flat,
                locations: vec!["/tmp/depictio-test".to_string()],
                runs_regex: None,
            },
            data_collections: dcs,
        }
    }

    fn project(workflows: Vec<Workflow>, dcs: Vec<DataCollection>) -> Project {
        Project {
            id: ObjectId::new(),
            name: "p".to_string(),
            description: None,
            project_type: ProjectType::Advanced,
            is_public: false,
            permissions: Permission::default(),
            joins: vec![],
            links: vec![],
            workflows,
            data_collections: dcs,
        }
    }

    #[test]
    fn test_bare_tag_within_named_workflow() {
        let p = project(vec![workflow("wf", vec![joined_dc("data")])], vec![]);
        let (dc, wf) = find_data_collection_by_tag(&p, "data", Some("wf")).unwrap();
        assert_eq!(dc.data_collection_tag, "data");
        assert_eq!(wf.unwrap().name, "wf");
    }

    #[test]
    fn test_dotted_tag_disambiguates_workflows() {
        let p = project(
            vec![
                workflow("wf1", vec![joined_dc("data")]),
                workflow("wf2", vec![joined_dc("data")]),
            ],
            vec![],
        );
        let expected = p.workflows[1].data_collections[0].id;
        let (dc, wf) = find_data_collection_by_tag(&p, "wf2.data", None).unwrap();
        assert_eq!(dc.id, expected);
        assert_eq!(wf.unwrap().name, "wf2");
    }

    #[test]
    fn test_project_level_dc_resolved() {
        let p = project(vec![], vec![joined_dc("flat_dc")]);
        let (dc, wf) = find_data_collection_by_tag(&p, "flat_dc", None).unwrap();
        assert_eq!(dc.data_collection_tag, "flat_dc");
        assert!(wf.is_none());
    }

    #[test]
    fn test_unknown_tag_yields_none() {
        let p = project(vec![workflow("wf", vec![joined_dc("data")])], vec![]);
        assert!(find_data_collection_by_tag(&p, "nope", None).is_none());
    }
}
