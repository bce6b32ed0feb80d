//! Scan engine integration tests — discovery, reconciliation, idempotence

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use bson::oid::ObjectId;
use tempfile::TempDir;

use depictio::hashing;
use depictio::metadata::ExistingFile;
use depictio::models::data_collections::{
    DataCollection, DataCollectionConfig, DcSource, DcSpecificProperties, DcType,
    PolarsReadOptions, RegexConfig, ScanConfig, TableFormat, TableProperties, Wildcard,
};
use depictio::models::{DataLocationStructure, Permission, ScanOutcome};
use depictio::scan::{enumerate_runs, scan_run_for_collections, scan_single_file, ScanParams};

fn csv_dc(tag: &str, pattern: &str, wildcards: Vec<Wildcard>) -> DataCollection {
    DataCollection {
        id: ObjectId::new(),
        data_collection_tag: tag.to_string(),
        description: None,
        config: DataCollectionConfig {
            dc_type: DcType::Table,
            metatype: None,
            source: DcSource::Scanned,
            scan: Some(ScanConfig::Recursive {
                regex_config: RegexConfig {
                    pattern: pattern.to_string(),
                    wildcards,
                },
            }),
            properties: DcSpecificProperties::Table(TableProperties {
                format: TableFormat::Csv,
                polars_kwargs: PolarsReadOptions::default(),
                keep_columns: None,
            }),
        },
    }
}

fn write_file(dir: &Path, name: &str, content: &str) {
    let mut file = std::fs::File::create(dir.join(name)).unwrap();
    write!(file, "{content}").unwrap();
}

fn existing_from(outcome: &depictio::scan::RunScanOutcome, tag: &str) -> HashMap<String, ExistingFile> {
    outcome.dc_outcomes[tag]
        .discovered
        .iter()
        .map(|f| {
            (
                f.file_location.clone(),
                ExistingFile {
                    id: f.id,
                    file_hash: f.file_hash.clone(),
                },
            )
        })
        .collect()
}

#[test]
fn test_flat_scan_first_time() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "a.csv", "sample,reads\ns1,10\n");

    let dc = csv_dc("counts", r".*\.csv", vec![]);
    let outcome = scan_run_for_collections(
        dir.path(),
        "rn",
        ObjectId::new(),
        &[&dc],
        &HashMap::new(),
        None,
        ScanParams::default(),
        &Permission::default(),
    )
    .unwrap();

    let dc_outcome = &outcome.dc_outcomes["counts"];
    assert_eq!(dc_outcome.stats.new_files, 1);
    assert_eq!(dc_outcome.stats.updated_files, 0);
    assert_eq!(dc_outcome.stats.missing_files, 0);

    let file = &dc_outcome.discovered[0];
    assert_eq!(file.filename, "a.csv");
    file.validate().unwrap();

    // The hash follows the documented formula over the recorded metadata
    let expected = hashing::file_hash(
        &file.filename,
        file.filesize,
        &file.creation_time,
        &file.modification_time,
    );
    assert_eq!(file.file_hash, expected);

    assert_eq!(outcome.run.run_tag, "rn");
    assert_eq!(outcome.run.files_id.len(), 1);
    assert_eq!(outcome.run.run_hash.len(), 64);
}

#[test]
fn test_recursive_scan_with_wildcards() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "run_2025-01-01.csv", "a,b\n1,2\n");
    write_file(dir.path(), "run_bad.csv", "a,b\n1,2\n");

    let dc = csv_dc(
        "runs",
        "run_{date}.csv",
        vec![Wildcard {
            name: "date".to_string(),
            wildcard_regex: r"\d{4}-\d{2}-\d{2}".to_string(),
            description: None,
        }],
    );
    let outcome = scan_run_for_collections(
        dir.path(),
        "rn",
        ObjectId::new(),
        &[&dc],
        &HashMap::new(),
        None,
        ScanParams::default(),
        &Permission::default(),
    )
    .unwrap();

    let dc_outcome = &outcome.dc_outcomes["runs"];
    assert_eq!(dc_outcome.stats.total_files, 1);
    assert_eq!(dc_outcome.discovered[0].filename, "run_2025-01-01.csv");
}

#[test]
fn test_duplicate_wildcards_abort_dc_only() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "a.csv", "a\n1\n");

    let broken = csv_dc(
        "broken",
        "run_{date}_{date}.csv",
        vec![
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
    );
    let healthy = csv_dc("healthy", r".*\.csv", vec![]);

    let outcome = scan_run_for_collections(
        dir.path(),
        "rn",
        ObjectId::new(),
        &[&broken, &healthy],
        &HashMap::new(),
        None,
        ScanParams::default(),
        &Permission::default(),
    )
    .unwrap();

    assert_eq!(outcome.dc_errors.len(), 1);
    assert_eq!(outcome.dc_errors[0].0, "broken");
    // The sibling DC still scanned
    assert_eq!(outcome.dc_outcomes["healthy"].stats.new_files, 1);
    assert!(!outcome.dc_outcomes.contains_key("broken"));
}

#[test]
fn test_rescan_unchanged_tree_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "a.csv", "a,b\n1,2\n");
    write_file(dir.path(), "b.csv", "a,b\n3,4\n");

    let dc = csv_dc("counts", r".*\.csv", vec![]);
    let workflow_id = ObjectId::new();
    let first = scan_run_for_collections(
        dir.path(),
        "rn",
        workflow_id,
        &[&dc],
        &HashMap::new(),
        None,
        ScanParams::default(),
        &Permission::default(),
    )
    .unwrap();

    let existing = HashMap::from([(dc.id, existing_from(&first, "counts"))]);
    let params = ScanParams {
        rescan: true,
        sync: true,
    };
    let second = scan_run_for_collections(
        dir.path(),
        "rn",
        workflow_id,
        &[&dc],
        &existing,
        Some(&first.run),
        params,
        &Permission::default(),
    )
    .unwrap();

    let stats = second.dc_outcomes["counts"].stats;
    assert_eq!(stats.new_files, 0);
    assert_eq!(stats.updated_files, 0);
    assert_eq!(stats.missing_files, 0);
    assert_eq!(stats.deleted_files, 0);
    assert_eq!(stats.skipped_files, 2);

    // Same tree, same hash, same file ids, no reported differences
    assert_eq!(second.run.run_hash, first.run.run_hash);
    assert_eq!(second.run.id, first.run.id);
    assert!(second.changed_fields.is_empty());
    let mut first_ids = first.run.files_id.clone();
    let mut second_ids = second.run.files_id.clone();
    first_ids.sort();
    second_ids.sort();
    assert_eq!(first_ids, second_ids);
}

#[test]
fn test_changed_file_is_updated_with_preserved_id() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "a.csv", "a,b\n1,2\n");

    let dc = csv_dc("counts", r".*\.csv", vec![]);
    let first = scan_run_for_collections(
        dir.path(),
        "rn",
        ObjectId::new(),
        &[&dc],
        &HashMap::new(),
        None,
        ScanParams::default(),
        &Permission::default(),
    )
    .unwrap();
    let original_id = first.dc_outcomes["counts"].discovered[0].id;

    // Grow the file so size (and hash) change
    write_file(dir.path(), "a.csv", "a,b\n1,2\n3,4\n5,6\n");

    let existing = HashMap::from([(dc.id, existing_from(&first, "counts"))]);
    let second = scan_run_for_collections(
        dir.path(),
        "rn",
        first.run.workflow_id,
        &[&dc],
        &existing,
        Some(&first.run),
        ScanParams {
            rescan: true,
            sync: true,
        },
        &Permission::default(),
    )
    .unwrap();

    let dc_outcome = &second.dc_outcomes["counts"];
    assert_eq!(dc_outcome.stats.updated_files, 1);
    assert_eq!(dc_outcome.stats.new_files, 0);
    assert_eq!(dc_outcome.discovered[0].id, original_id);
    assert_ne!(second.run.run_hash, first.run.run_hash);
    assert_eq!(second.changed_fields, vec!["files".to_string()]);
}

#[test]
fn test_missing_files_reported_or_deleted() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "a.csv", "a\n1\n");

    let dc = csv_dc("counts", r".*\.csv", vec![]);
    let vanished_id = ObjectId::new();
    let mut prior = HashMap::new();
    prior.insert(
        dir.path().join("gone.csv").to_string_lossy().to_string(),
        ExistingFile {
            id: vanished_id,
            file_hash: "0".repeat(64),
        },
    );
    let existing = HashMap::from([(dc.id, prior)]);

    // Without sync: bucketed as missing
    let outcome = scan_run_for_collections(
        dir.path(),
        "rn",
        ObjectId::new(),
        &[&dc],
        &existing,
        None,
        ScanParams::default(),
        &Permission::default(),
    )
    .unwrap();
    let stats = outcome.dc_outcomes["counts"].stats;
    assert_eq!(stats.missing_files, 1);
    assert_eq!(stats.deleted_files, 0);

    // With sync: scheduled for deletion
    let outcome = scan_run_for_collections(
        dir.path(),
        "rn",
        ObjectId::new(),
        &[&dc],
        &existing,
        None,
        ScanParams {
            rescan: false,
            sync: true,
        },
        &Permission::default(),
    )
    .unwrap();
    let dc_outcome = &outcome.dc_outcomes["counts"];
    assert_eq!(dc_outcome.stats.deleted_files, 1);
    assert_eq!(dc_outcome.to_delete, vec![vanished_id]);
}

#[test]
fn test_zero_size_file_rejected_as_other_failure() {
    let dir = TempDir::new().unwrap();
    std::fs::File::create(dir.path().join("empty.csv")).unwrap();
    write_file(dir.path(), "full.csv", "a\n1\n");

    let dc = csv_dc("counts", r".*\.csv", vec![]);
    let outcome = scan_run_for_collections(
        dir.path(),
        "rn",
        ObjectId::new(),
        &[&dc],
        &HashMap::new(),
        None,
        ScanParams::default(),
        &Permission::default(),
    )
    .unwrap();

    let stats = outcome.dc_outcomes["counts"].stats;
    assert_eq!(stats.new_files, 1);
    assert_eq!(stats.other_failure_files, 1);
}

#[test]
fn test_enumerate_sequencing_runs_filters_by_regex() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("run_A")).unwrap();
    std::fs::create_dir(dir.path().join("run_B")).unwrap();
    std::fs::create_dir(dir.path().join("scratch")).unwrap();
    write_file(dir.path(), "loose.csv", "a\n1\n");

    let regex = regex::Regex::new(r"run_[A-Z]").unwrap();
    let runs = enumerate_runs(
        &dir.path().to_string_lossy(),
        DataLocationStructure::SequencingRuns,
        Some(&regex),
    )
    .unwrap();

    let tags: Vec<&str> = runs.iter().map(|(_, tag)| tag.as_str()).collect();
    assert_eq!(tags, vec!["run_A", "run_B"]);
}

#[test]
fn test_enumerate_flat_uses_basename() {
    let dir = TempDir::new().unwrap();
    let runs = enumerate_runs(
        &dir.path().to_string_lossy(),
        DataLocationStructure::Flat,
        None,
    )
    .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(
        runs[0].1,
        dir.path().file_name().unwrap().to_string_lossy()
    );
}

#[test]
fn test_unreadable_location_is_scan_io_error() {
    let err = enumerate_runs(
        "/nonexistent/depictio-scan",
        DataLocationStructure::Flat,
        None,
    )
    .unwrap_err();
    assert_eq!(err.kind(), "scan-io-error");
}

#[test]
fn test_single_file_scan_without_regex() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "metrics.csv", "a\n1\n");

    let dc = csv_dc("metrics", r"unused", vec![]);
    let scan = scan_single_file(
        &dir.path().join("metrics.csv"),
        ObjectId::new(),
        "metrics-single-file-scan",
        &dc,
        &HashMap::new(),
        None,
        &Permission::default(),
    )
    .unwrap()
    .unwrap();

    assert_eq!(scan.outcome, ScanOutcome::Added);
    assert_eq!(scan.file.run_tag, "metrics-single-file-scan");
}

#[test]
fn test_run_hash_independent_of_discovery_order() {
    let hashes: Vec<String> = (0..4)
        .map(|i| {
            hashing::file_hash(
                &format!("f{i}.csv"),
                (i + 1) as u64,
                "2025-01-01 00:00:00",
                "2025-01-01 00:00:00",
            )
        })
        .collect();
    let mut reversed = hashes.clone();
    reversed.reverse();

    assert_eq!(
        hashing::run_hash("/r", "t", "t", &hashes),
        hashing::run_hash("/r", "t", "t", &reversed)
    );
}
