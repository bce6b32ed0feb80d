//! depictio CLI — scan commands and infrastructure diagnostics
//!
//! Exit codes: 0 success, 1 configuration error, 2 I/O error, 3 partial
//! scan (some locations or DCs were skipped).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use bson::oid::ObjectId;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use depictio::scan::{ProjectScanReport, ScanParams};
use depictio::{DepictioError, MetadataStore, ScanEngine, Settings};

#[derive(Parser)]
#[command(
    name = "depictio",
    about = "Data-platform backend: scan filesystems, reconcile metadata, probe infrastructure",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover runs and files and reconcile them against the metadata store
    Scan {
        #[command(subcommand)]
        target: ScanTarget,
    },
    /// Run DNS/latency/resource/storage probes and print a JSON report
    Diagnostics {
        /// Internal endpoints to probe, as host:port
        #[arg(long = "endpoint")]
        endpoints: Vec<String>,
        /// Scratch directory for the I/O round-trip probe
        #[arg(long, default_value = "/tmp")]
        scratch: PathBuf,
    },
}

#[derive(Subcommand)]
enum ScanTarget {
    /// Scan a project's workflows
    Project {
        #[arg(long)]
        project_id: String,
        /// Restrict to one workflow (name or engine/name tag)
        #[arg(long)]
        workflow: Option<String>,
        /// Restrict to one data collection tag
        #[arg(long)]
        dc_tag: Option<String>,
        /// Revisit runs already recorded in the store
        #[arg(long)]
        rescan: bool,
        /// Mirror deletions and rewrite unchanged records
        #[arg(long)]
        sync: bool,
    },
    /// Scan one data collection by id
    Dc {
        #[arg(long)]
        dc_id: String,
        #[arg(long)]
        sync: bool,
    },
}

fn exit_code_for(error: &DepictioError) -> ExitCode {
    match error.kind() {
        "config-invalid" | "not-found" | "dc-not-found" | "invalid-time" | "invalid-file" => {
            ExitCode::from(1)
        }
        _ => ExitCode::from(2),
    }
}

fn exit_code_for_report(report: &ProjectScanReport) -> ExitCode {
    if report.partial {
        ExitCode::from(3)
    } else {
        ExitCode::SUCCESS
    }
}

async fn scan_project(
    settings: &Settings,
    project_id: &str,
    workflow: Option<&str>,
    dc_tag: Option<&str>,
    params: ScanParams,
) -> depictio::Result<ProjectScanReport> {
    let meta = Arc::new(MetadataStore::connect(settings).await?);
    let project_id = ObjectId::parse_str(project_id)?;
    let project = meta.get_project(&project_id).await?;
    project.validate()?;

    let engine = ScanEngine::new(meta);
    let report = engine.scan_project(&project, workflow, dc_tag, params).await?;
    for workflow_report in &report.workflows {
        println!(
            "{}: {} run(s) scanned, {} new / {} updated / {} skipped / {} missing / {} deleted",
            workflow_report.workflow_tag,
            workflow_report.runs_scanned,
            workflow_report.stats.new_files,
            workflow_report.stats.updated_files,
            workflow_report.stats.skipped_files,
            workflow_report.stats.missing_files,
            workflow_report.stats.deleted_files,
        );
        for problem in &workflow_report.errors {
            eprintln!("  warning: {problem}");
        }
    }
    Ok(report)
}

async fn scan_dc(
    settings: &Settings,
    dc_id: &str,
    params: ScanParams,
) -> depictio::Result<ProjectScanReport> {
    let meta = Arc::new(MetadataStore::connect(settings).await?);
    let dc_id = ObjectId::parse_str(dc_id)?;
    let project = meta.project_for_dc(&dc_id).await?;

    let dc_tag = project
        .all_data_collections()
        .find(|dc| dc.id == dc_id)
        .map(|dc| dc.data_collection_tag.clone())
        .ok_or_else(|| DepictioError::DcNotFound(dc_id.to_hex()))?;

    let engine = ScanEngine::new(meta);
    engine
        .scan_project(&project, None, Some(&dc_tag), params)
        .await
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command {
        Command::Scan { target } => {
            let result = match target {
                ScanTarget::Project {
                    project_id,
                    workflow,
                    dc_tag,
                    rescan,
                    sync,
                } => {
                    scan_project(
                        &settings,
                        &project_id,
                        workflow.as_deref(),
                        dc_tag.as_deref(),
                        ScanParams { rescan, sync },
                    )
                    .await
                }
                ScanTarget::Dc { dc_id, sync } => {
                    scan_dc(&settings, &dc_id, ScanParams { rescan: false, sync }).await
                }
            };
            match result {
                Ok(report) => exit_code_for_report(&report),
                Err(e) => {
                    error!(kind = e.kind(), error = %e, "Scan failed");
                    eprintln!("error ({}): {e}", e.kind());
                    exit_code_for(&e)
                }
            }
        }
        Command::Diagnostics { endpoints, scratch } => {
            let report =
                depictio::diagnostics::run_all(&endpoints, &scratch, settings.request_timeout)
                    .await;
            match serde_json::to_string_pretty(&report) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    ExitCode::from(2)
                }
            }
        }
    }
}
