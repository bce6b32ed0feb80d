//! Scan engine — discover runs and files, reconcile against stored state
//!
//! The pure reconciliation core (`scan_single_file`,
//! `scan_run_for_collections`, `enumerate_runs`) operates on prefetched
//! state maps and filesystem trees only; [`ScanEngine`] wires it to the
//! metadata store and the event bus.
//!
//! Failure semantics: an unreadable location aborts that location only and
//! marks the scan partial; a malformed DC config aborts that DC only.

pub mod pattern;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use bson::oid::ObjectId;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{DepictioError, Result};
use crate::events::{DcOperation, EventBusHandle};
use crate::hashing;
use crate::metadata::{ExistingFile, MetadataStore};
use crate::models::workflows::ScanFileBuckets;
use crate::models::{
    DataCollection, File, FileScanOutcome, Permission, Project, ScanConfig, ScanOutcome,
    ScanStats, Workflow, WorkflowRun, WorkflowRunScan,
};
use crate::paths;

/// Caller-selected scan semantics
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanParams {
    /// Revisit runs already recorded in the store
    pub rescan: bool,
    /// Mirror deletions and re-write unchanged records (sync semantics)
    pub sync: bool,
}

/// Reconciliation outcome for one DC within one run
#[derive(Debug, Default)]
pub struct DcScanOutcome {
    pub stats: ScanStats,
    pub buckets: ScanFileBuckets,
    /// Files to create/update in the store
    pub to_upsert: Vec<File>,
    /// Previously recorded files to delete (sync only)
    pub to_delete: Vec<ObjectId>,
    /// All files discovered this scan (including unchanged ones)
    pub discovered: Vec<File>,
}

/// Reconciliation outcome for one run across all its DCs
#[derive(Debug)]
pub struct RunScanOutcome {
    pub run: WorkflowRun,
    /// Per-DC outcomes keyed by DC tag
    pub dc_outcomes: HashMap<String, DcScanOutcome>,
    /// DCs whose configuration was rejected, with the reason
    pub dc_errors: Vec<(String, String)>,
    /// Fields that changed relative to the stored run (rescan only)
    pub changed_fields: Vec<String>,
}

/// Per-workflow scan report
#[derive(Debug, Default)]
pub struct WorkflowScanReport {
    pub workflow_tag: String,
    pub runs_scanned: usize,
    pub runs_deleted: usize,
    pub stats: ScanStats,
    pub per_dc: HashMap<String, ScanStats>,
    /// True when at least one location or DC was skipped on error
    pub partial: bool,
    pub errors: Vec<String>,
}

/// Project-level scan report
#[derive(Debug, Default)]
pub struct ProjectScanReport {
    pub runs_scanned: usize,
    pub workflows: Vec<WorkflowScanReport>,
    pub partial: bool,
}

// ─── Pure core ───

/// Inspect a single file and classify its transition against the prior set.
///
/// Returns `Ok(None)` when the basename does not match the pattern. A
/// zero-size file or unreadable metadata is an `invalid-file` error the
/// caller buckets as other-failure.
pub fn scan_single_file(
    file_location: &Path,
    run_id: ObjectId,
    run_tag: &str,
    dc: &DataCollection,
    existing: &HashMap<String, ExistingFile>,
    full_regex: Option<&Regex>,
    permissions: &Permission,
) -> Result<Option<FileScanOutcome>> {
    let file_name = file_location
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if let Some(regex) = full_regex {
        if !pattern::regex_match(&file_name, regex) {
            return Ok(None);
        }
    }

    let location = file_location.to_string_lossy().to_string();
    let metadata = std::fs::metadata(file_location).map_err(|e| DepictioError::InvalidFile {
        location: location.clone(),
        detail: e.to_string(),
    })?;
    if metadata.len() == 0 {
        return Err(DepictioError::InvalidFile {
            location,
            detail: "filesize must be > 0".to_string(),
        });
    }

    let modified = metadata.modified().map_err(|e| DepictioError::InvalidFile {
        location: location.clone(),
        detail: e.to_string(),
    })?;
    // Creation time is unavailable on some filesystems; fall back to mtime.
    let created = metadata.created().unwrap_or(modified);
    let creation_time = paths::format_timestamp(created);
    let modification_time = paths::format_timestamp(modified);

    let file_hash = hashing::file_hash(&file_name, metadata.len(), &creation_time, &modification_time);

    let (id, outcome) = match existing.get(&location) {
        Some(prior) if prior.file_hash == file_hash => {
            debug!(file = %file_name, "File unchanged since last scan");
            (prior.id, ScanOutcome::Skipped)
        }
        Some(prior) => {
            debug!(file = %file_name, "File changed since last scan");
            (prior.id, ScanOutcome::Updated)
        }
        None => (ObjectId::new(), ScanOutcome::Added),
    };

    let file = File {
        id,
        filename: file_name,
        file_location: location,
        creation_time,
        modification_time,
        file_hash,
        filesize: metadata.len(),
        data_collection_id: dc.id,
        run_id,
        run_tag: run_tag.to_string(),
        permissions: permissions.clone(),
    };
    Ok(Some(FileScanOutcome { file, outcome }))
}

/// Recursively enumerate regular files under a directory.
///
/// An unreadable directory maps to `scan-io-error`, aborting the enclosing
/// location while siblings continue.
fn walk_files(root: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(root).map_err(|e| DepictioError::ScanIo {
        location: root.display().to_string(),
        detail: e.to_string(),
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| DepictioError::ScanIo {
            location: root.display().to_string(),
            detail: e.to_string(),
        })?;
        let path = entry.path();
        if path.is_dir() {
            walk_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Enumerate the runs under one configured location.
///
/// `flat` yields the location itself (`run_tag = basename`);
/// `sequencing-runs` yields each immediate subdirectory whose name matches
/// `runs_regex`; non-matching subdirectories are ignored.
pub fn enumerate_runs(
    location: &str,
    structure: crate::models::DataLocationStructure,
    runs_regex: Option<&Regex>,
) -> Result<Vec<(PathBuf, String)>> {
    use crate::models::DataLocationStructure::*;

    let root = Path::new(location);
    if !root.is_dir() {
        return Err(DepictioError::ScanIo {
            location: location.to_string(),
            detail: "not an existing directory".to_string(),
        });
    }

    match structure {
        Flat => Ok(vec![(root.to_path_buf(), paths::basename(location))]),
        SequencingRuns => {
            let regex = runs_regex.ok_or_else(|| {
                DepictioError::ConfigInvalid(
                    "runs_regex is required when structure is 'sequencing-runs'".to_string(),
                )
            })?;
            let mut runs = Vec::new();
            let entries = std::fs::read_dir(root).map_err(|e| DepictioError::ScanIo {
                location: location.to_string(),
                detail: e.to_string(),
            })?;
            for entry in entries.flatten() {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();
                if path.is_dir() && regex.is_match(&name) {
                    runs.push((path, name));
                }
            }
            runs.sort_by(|a, b| a.1.cmp(&b.1));
            Ok(runs)
        }
    }
}

/// Scan one run directory for all recursive-mode DCs in a single pass.
pub fn scan_run_for_collections(
    run_location: &Path,
    run_tag: &str,
    workflow_id: ObjectId,
    dcs: &[&DataCollection],
    all_existing: &HashMap<ObjectId, HashMap<String, ExistingFile>>,
    existing_run: Option<&WorkflowRun>,
    params: ScanParams,
    permissions: &Permission,
) -> Result<RunScanOutcome> {
    let location = run_location.to_string_lossy().to_string();
    let run_metadata = std::fs::metadata(run_location).map_err(|e| DepictioError::ScanIo {
        location: location.clone(),
        detail: e.to_string(),
    })?;
    let modified = run_metadata.modified().map_err(|e| DepictioError::ScanIo {
        location: location.clone(),
        detail: e.to_string(),
    })?;
    let created = run_metadata.created().unwrap_or(modified);
    let creation_time = paths::format_timestamp(created);
    let last_modification_time = paths::format_timestamp(modified);

    let run_id = existing_run.map(|r| r.id).unwrap_or_else(ObjectId::new);

    let mut files_in_run = Vec::new();
    walk_files(run_location, &mut files_in_run)?;
    debug!(run_tag, files = files_in_run.len(), "Run directory walked");

    let mut dc_outcomes: HashMap<String, DcScanOutcome> = HashMap::new();
    let mut dc_errors = Vec::new();

    for dc in dcs {
        let regex_config = match &dc.config.scan {
            Some(ScanConfig::Recursive { regex_config }) => regex_config,
            _ => continue,
        };
        let full_regex = match pattern::compile_full_regex(regex_config) {
            Ok(regex) => regex,
            Err(e) => {
                warn!(dc = %dc.data_collection_tag, error = %e, "DC config rejected");
                dc_errors.push((dc.data_collection_tag.clone(), e.to_string()));
                continue;
            }
        };

        let empty = HashMap::new();
        let existing = all_existing.get(&dc.id).unwrap_or(&empty);
        let mut outcome = DcScanOutcome::default();
        let mut seen_locations = HashSet::new();

        for file_path in &files_in_run {
            match scan_single_file(
                file_path,
                run_id,
                run_tag,
                dc,
                existing,
                Some(&full_regex),
                permissions,
            ) {
                Ok(None) => {}
                Ok(Some(scan)) => {
                    seen_locations.insert(scan.file.file_location.clone());
                    outcome.stats.total_files += 1;
                    match scan.outcome {
                        ScanOutcome::Added => {
                            outcome.stats.new_files += 1;
                            outcome.buckets.new_files.push(scan.file.id);
                            outcome.to_upsert.push(scan.file.clone());
                        }
                        ScanOutcome::Updated => {
                            outcome.stats.updated_files += 1;
                            outcome.buckets.updated_files.push(scan.file.id);
                            outcome.to_upsert.push(scan.file.clone());
                        }
                        ScanOutcome::Skipped => {
                            outcome.stats.skipped_files += 1;
                            outcome.buckets.skipped_files.push(scan.file.id);
                            // Sync re-writes unchanged records as no-ops.
                            if params.sync {
                                outcome.to_upsert.push(scan.file.clone());
                            }
                        }
                    }
                    outcome.discovered.push(scan.file);
                }
                Err(DepictioError::InvalidFile { location, detail }) => {
                    warn!(dc = %dc.data_collection_tag, %location, %detail, "File rejected");
                    outcome.stats.other_failure_files += 1;
                }
                Err(e) => return Err(e),
            }
        }

        // Previously recorded files under this run's location that were not
        // rediscovered. Files belonging to other runs of the same DC are out
        // of scope here.
        for (prior_location, prior) in existing {
            if !prior_location.starts_with(location.as_str()) {
                continue;
            }
            if !seen_locations.contains(prior_location) {
                if params.sync {
                    outcome.stats.deleted_files += 1;
                    outcome.to_delete.push(prior.id);
                } else {
                    outcome.stats.missing_files += 1;
                    outcome.buckets.missing_files.push(prior.id);
                }
            }
        }

        dc_outcomes.insert(dc.data_collection_tag.clone(), outcome);
    }

    // Assemble the run over the union of discovered files across DCs
    let mut files_id = Vec::new();
    let mut file_hashes = Vec::new();
    let mut aggregate = ScanStats::default();
    let mut dc_stats = HashMap::new();
    let mut buckets = ScanFileBuckets::default();
    for (tag, outcome) in &dc_outcomes {
        aggregate += outcome.stats;
        dc_stats.insert(tag.clone(), outcome.stats);
        for file in &outcome.discovered {
            files_id.push(file.id);
            file_hashes.push(file.file_hash.clone());
        }
        buckets.new_files.extend(outcome.buckets.new_files.iter());
        buckets
            .updated_files
            .extend(outcome.buckets.updated_files.iter());
        buckets
            .skipped_files
            .extend(outcome.buckets.skipped_files.iter());
        buckets
            .missing_files
            .extend(outcome.buckets.missing_files.iter());
    }

    let run_hash = hashing::run_hash(
        &location,
        &creation_time,
        &last_modification_time,
        &file_hashes,
    );

    let changed_fields = existing_run
        .map(|prev| {
            check_run_differences(prev, &location, &creation_time, &last_modification_time, &run_hash)
        })
        .unwrap_or_default();

    let scan_record = WorkflowRunScan {
        stats: aggregate,
        files: buckets,
        dc_stats,
        scan_time: paths::format_timestamp(std::time::SystemTime::now()),
    };

    let mut scan_results = existing_run.map(|r| r.scan_results.clone()).unwrap_or_default();
    scan_results.push(scan_record);

    let run = WorkflowRun {
        id: run_id,
        workflow_id,
        run_tag: run_tag.to_string(),
        run_location: location,
        creation_time,
        last_modification_time,
        registration_time: existing_run
            .map(|r| r.registration_time.clone())
            .unwrap_or_else(|| paths::format_timestamp(std::time::SystemTime::now())),
        run_hash,
        files_id,
        scan_results,
        permissions: permissions.clone(),
    };

    Ok(RunScanOutcome {
        run,
        dc_outcomes,
        dc_errors,
        changed_fields,
    })
}

/// Name the fields that changed relative to the stored run.
///
/// When the hash differs but none of location/ctime/mtime changed, the file
/// set must be the culprit.
pub fn check_run_differences(
    previous: &WorkflowRun,
    run_location: &str,
    creation_time: &str,
    last_modification_time: &str,
    new_run_hash: &str,
) -> Vec<String> {
    if previous.run_hash == new_run_hash {
        return Vec::new();
    }
    warn!(run = %previous.run_tag, "Run hash mismatch, identifying changes");

    let mut changed = Vec::new();
    if previous.run_location != run_location {
        changed.push("run_location".to_string());
    }
    if previous.creation_time != creation_time {
        changed.push("creation_time".to_string());
    }
    if previous.last_modification_time != last_modification_time {
        changed.push("last_modification_time".to_string());
    }
    if changed.is_empty() {
        changed.push("files".to_string());
    }
    for field in &changed {
        warn!(run = %previous.run_tag, field = %field, "Run field changed since last scan");
    }
    changed
}

// ─── Engine ───

/// Scan engine wired to the metadata store and (optionally) the event bus
pub struct ScanEngine {
    meta: std::sync::Arc<MetadataStore>,
    events: Option<EventBusHandle>,
}

impl ScanEngine {
    pub fn new(meta: std::sync::Arc<MetadataStore>) -> Self {
        Self { meta, events: None }
    }

    pub fn with_events(mut self, events: EventBusHandle) -> Self {
        self.events = Some(events);
        self
    }

    /// Scan a project, optionally restricted to one workflow and/or DC tag.
    pub async fn scan_project(
        &self,
        project: &Project,
        filter_workflow: Option<&str>,
        filter_dc_tag: Option<&str>,
        params: ScanParams,
    ) -> Result<ProjectScanReport> {
        info!(project = %project.name, rescan = params.rescan, sync = params.sync, "Scanning project");

        let workflows: Vec<&Workflow> = project
            .workflows
            .iter()
            .filter(|w| filter_workflow.map_or(true, |name| w.workflow_tag() == name || w.name == name))
            .collect();
        if let Some(name) = filter_workflow {
            if workflows.is_empty() {
                return Err(DepictioError::NotFound(format!(
                    "workflow '{name}' in project '{}'",
                    project.name
                )));
            }
        }

        let mut report = ProjectScanReport::default();
        for workflow in workflows {
            let dcs: Vec<&DataCollection> = workflow
                .data_collections
                .iter()
                .filter(|dc| filter_dc_tag.map_or(true, |tag| dc.data_collection_tag == tag))
                .collect();
            if dcs.is_empty() {
                if let Some(tag) = filter_dc_tag {
                    warn!(workflow = %workflow.workflow_tag(), dc_tag = tag, "Data collection not found in workflow");
                }
                continue;
            }

            let recursive: Vec<&DataCollection> = dcs
                .iter()
                .copied()
                .filter(|dc| matches!(dc.config.scan, Some(ScanConfig::Recursive { .. })))
                .collect();
            let single: Vec<&DataCollection> = dcs
                .iter()
                .copied()
                .filter(|dc| matches!(dc.config.scan, Some(ScanConfig::Single { .. })))
                .collect();

            if !recursive.is_empty() {
                let workflow_report = self.scan_workflow(project, workflow, &recursive, params).await?;
                report.runs_scanned += workflow_report.runs_scanned;
                report.partial |= workflow_report.partial;
                report.workflows.push(workflow_report);
            }
            for dc in single {
                let workflow_report = self.scan_dc_single(project, workflow, dc, params).await?;
                report.runs_scanned += workflow_report.runs_scanned;
                report.partial |= workflow_report.partial;
                report.workflows.push(workflow_report);
            }
        }
        Ok(report)
    }

    /// Scan all recursive-mode DCs of one workflow in a single pass over its
    /// runs.
    pub async fn scan_workflow(
        &self,
        project: &Project,
        workflow: &Workflow,
        dcs: &[&DataCollection],
        params: ScanParams,
    ) -> Result<WorkflowScanReport> {
        let permissions = project.permissions.clone();
        let mut report = WorkflowScanReport {
            workflow_tag: workflow.workflow_tag(),
            ..Default::default()
        };

        // Prefetch current state: files per DC, runs per workflow
        let mut all_existing = HashMap::new();
        for dc in dcs {
            all_existing.insert(dc.id, self.meta.files_by_dc(&dc.id).await?);
        }
        let existing_runs = self.meta.runs_by_workflow(&workflow.id).await?;

        let runs_regex = match &workflow.data_location.runs_regex {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                DepictioError::ConfigInvalid(format!("invalid runs_regex: {e}"))
            })?),
            None => None,
        };

        let mut scanned_runs: Vec<WorkflowRun> = Vec::new();
        let mut seen_run_tags: HashSet<String> = HashSet::new();

        for raw_location in &workflow.data_location.locations {
            let location = match paths::expand_path(raw_location) {
                Ok(location) => location,
                Err(e) => {
                    report.partial = true;
                    report.errors.push(e.to_string());
                    continue;
                }
            };

            let runs = match enumerate_runs(
                &location,
                workflow.data_location.structure,
                runs_regex.as_ref(),
            ) {
                Ok(runs) => runs,
                Err(e) => {
                    warn!(location = %location, error = %e, "Location skipped");
                    report.partial = true;
                    report.errors.push(e.to_string());
                    continue;
                }
            };

            for (run_path, run_tag) in runs {
                seen_run_tags.insert(run_tag.clone());
                let existing_run = existing_runs.get(&run_tag);
                if existing_run.is_some() && !params.rescan {
                    debug!(run_tag = %run_tag, "Skipping existing run");
                    continue;
                }

                let outcome = match scan_run_for_collections(
                    &run_path,
                    &run_tag,
                    workflow.id,
                    dcs,
                    &all_existing,
                    existing_run,
                    params,
                    &permissions,
                ) {
                    Ok(outcome) => outcome,
                    Err(e @ DepictioError::ScanIo { .. }) => {
                        warn!(run_tag = %run_tag, error = %e, "Run skipped");
                        report.partial = true;
                        report.errors.push(e.to_string());
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                self.apply_run_outcome(&outcome, dcs, params, &mut report).await?;
                scanned_runs.push(outcome.run);
            }
        }

        // A previously recorded run that disappeared is removed with its
        // files when rescanning. Skipped when any location failed to
        // enumerate, since its runs were never observed this pass.
        if params.rescan && report.errors.is_empty() {
            for (run_tag, run) in &existing_runs {
                if !seen_run_tags.contains(run_tag) {
                    info!(run_tag = %run_tag, "Run no longer present, deleting");
                    let deleted = self.meta.delete_files_by_run(&run.id).await?;
                    self.meta.delete_run(&run.id).await?;
                    report.runs_deleted += 1;
                    report.stats.deleted_files += deleted as usize;
                }
            }
        }

        if !scanned_runs.is_empty() {
            self.meta.upsert_runs(&scanned_runs).await?;
        }
        report.runs_scanned = scanned_runs.len();
        info!(
            workflow = %report.workflow_tag,
            runs = report.runs_scanned,
            partial = report.partial,
            "Workflow scan complete"
        );
        Ok(report)
    }

    /// Scan a single-file DC; the file gets a synthetic run of its own.
    pub async fn scan_dc_single(
        &self,
        project: &Project,
        workflow: &Workflow,
        dc: &DataCollection,
        params: ScanParams,
    ) -> Result<WorkflowScanReport> {
        let filename = match &dc.config.scan {
            Some(ScanConfig::Single { filename }) => filename,
            _ => {
                return Err(DepictioError::ConfigInvalid(format!(
                    "data collection '{}' is not single-file mode",
                    dc.data_collection_tag
                )))
            }
        };
        let file_path = PathBuf::from(paths::expand_path(filename)?);
        let run_tag = format!("{}-single-file-scan", dc.data_collection_tag);
        let run_location = file_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("/"));

        let existing = self.meta.files_by_dc(&dc.id).await?;
        let existing_runs = self.meta.runs_by_workflow(&workflow.id).await?;
        let existing_run = existing_runs.get(&run_tag);
        let run_id = existing_run.map(|r| r.id).unwrap_or_else(ObjectId::new);

        let scan = scan_single_file(
            &file_path,
            run_id,
            &run_tag,
            dc,
            &existing,
            None,
            &project.permissions,
        )?;

        let mut report = WorkflowScanReport {
            workflow_tag: workflow.workflow_tag(),
            ..Default::default()
        };

        let Some(scan) = scan else {
            return Ok(report);
        };

        let mut stats = ScanStats {
            total_files: 1,
            ..Default::default()
        };
        let mut to_upsert = Vec::new();
        match scan.outcome {
            ScanOutcome::Added => {
                stats.new_files = 1;
                to_upsert.push(scan.file.clone());
            }
            ScanOutcome::Updated => {
                stats.updated_files = 1;
                to_upsert.push(scan.file.clone());
            }
            ScanOutcome::Skipped => {
                stats.skipped_files = 1;
                if params.sync {
                    to_upsert.push(scan.file.clone());
                }
            }
        }

        if !to_upsert.is_empty() {
            self.meta.upsert_files(&to_upsert).await?;
        }

        let file_hashes = vec![scan.file.file_hash.clone()];
        let run = WorkflowRun {
            id: run_id,
            workflow_id: workflow.id,
            run_tag: run_tag.clone(),
            run_location: run_location.to_string_lossy().to_string(),
            creation_time: scan.file.creation_time.clone(),
            last_modification_time: scan.file.modification_time.clone(),
            registration_time: paths::format_timestamp(std::time::SystemTime::now()),
            run_hash: hashing::run_hash(
                &run_location.to_string_lossy(),
                &scan.file.creation_time,
                &scan.file.modification_time,
                &file_hashes,
            ),
            files_id: vec![scan.file.id],
            scan_results: Vec::new(),
            permissions: project.permissions.clone(),
        };
        self.meta.upsert_runs(std::slice::from_ref(&run)).await?;

        self.publish_dc_events(dc, &stats).await;
        report.runs_scanned = 1;
        report.stats = stats;
        report.per_dc.insert(dc.data_collection_tag.clone(), stats);
        Ok(report)
    }

    async fn apply_run_outcome(
        &self,
        outcome: &RunScanOutcome,
        dcs: &[&DataCollection],
        params: ScanParams,
        report: &mut WorkflowScanReport,
    ) -> Result<()> {
        for (tag, reason) in &outcome.dc_errors {
            report.partial = true;
            report.errors.push(format!("data collection '{tag}': {reason}"));
        }

        for dc in dcs {
            let Some(dc_outcome) = outcome.dc_outcomes.get(&dc.data_collection_tag) else {
                continue;
            };
            if !dc_outcome.to_upsert.is_empty() {
                self.meta.upsert_files(&dc_outcome.to_upsert).await?;
            }
            if params.sync && !dc_outcome.to_delete.is_empty() {
                let deleted = self.meta.delete_files(&dc_outcome.to_delete).await?;
                debug!(dc = %dc.data_collection_tag, deleted, "Missing files removed");
            }

            let entry = report
                .per_dc
                .entry(dc.data_collection_tag.clone())
                .or_default();
            *entry += dc_outcome.stats;
            report.stats += dc_outcome.stats;

            self.publish_dc_events(dc, &dc_outcome.stats).await;
        }
        Ok(())
    }

    async fn publish_dc_events(&self, dc: &DataCollection, stats: &ScanStats) {
        let Some(events) = &self.events else { return };
        if stats.new_files > 0 {
            events
                .publish_dc_updated(dc.id, &dc.data_collection_tag, DcOperation::Added)
                .await;
        }
        if stats.updated_files > 0 {
            events
                .publish_dc_updated(dc.id, &dc.data_collection_tag, DcOperation::Updated)
                .await;
        }
        if stats.deleted_files > 0 {
            events
                .publish_dc_updated(dc.id, &dc.data_collection_tag, DcOperation::Deleted)
                .await;
        }
    }
}
