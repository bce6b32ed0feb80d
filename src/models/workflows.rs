//! Workflows, data locations, runs, and scan records

use std::collections::HashMap;
use std::ops::AddAssign;

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::{DepictioError, Result};
use crate::paths;

use super::data_collections::DataCollection;
use super::projects::Permission;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataLocationStructure {
    /// The configured location is itself a single run
    Flat,
    /// Each matching subdirectory of the location is a run
    SequencingRuns,
}

/// Where a workflow's data lives on disk.
///
/// Locations may carry `{ENV_VAR}` placeholders; they are expanded at
/// ingestion time in client contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDataLocation {
    pub structure: DataLocationStructure,
    pub locations: Vec<String>,
    /// Required iff structure is `sequencing-runs`
    #[serde(default)]
    pub runs_regex: Option<String>,
}

impl WorkflowDataLocation {
    pub fn validate(&self) -> Result<()> {
        match self.structure {
            DataLocationStructure::SequencingRuns => match &self.runs_regex {
                None => Err(DepictioError::ConfigInvalid(
                    "runs_regex is required when structure is 'sequencing-runs'".to_string(),
                )),
                Some(pattern) => {
                    regex::Regex::new(pattern).map_err(|e| {
                        DepictioError::ConfigInvalid(format!("invalid runs_regex: {e}"))
                    })?;
                    Ok(())
                }
            },
            DataLocationStructure::Flat => Ok(()),
        }
    }

    /// Locations with `{ENV_VAR}` placeholders expanded.
    pub fn expanded_locations(&self) -> Result<Vec<String>> {
        self.locations.iter().map(|l| paths::expand_path(l)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEngine {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCatalog {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// A named processing pipeline within a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(rename = "_id", default = "ObjectId::new")]
    pub id: ObjectId,
    pub name: String,
    pub engine: WorkflowEngine,
    #[serde(default)]
    pub catalog: Option<WorkflowCatalog>,
    #[serde(default)]
    pub repository_url: Option<String>,
    pub data_location: WorkflowDataLocation,
    pub data_collections: Vec<DataCollection>,
}

impl Workflow {
    /// Computed display tag: `{engine}/{name}`, or `nf-core/{name}` when the
    /// workflow comes from the nf-core catalog.
    pub fn workflow_tag(&self) -> String {
        match &self.catalog {
            Some(catalog) if catalog.name == "nf-core" => format!("nf-core/{}", self.name),
            _ => format!("{}/{}", self.engine.name, self.name),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DepictioError::ConfigInvalid(
                "workflow name is required".to_string(),
            ));
        }
        self.data_location.validate()?;

        let mut tags = std::collections::HashSet::new();
        for dc in &self.data_collections {
            if !tags.insert(dc.data_collection_tag.as_str()) {
                return Err(DepictioError::ConfigInvalid(format!(
                    "workflow '{}': duplicate data collection tag '{}'",
                    self.name, dc.data_collection_tag
                )));
            }
            dc.validate()?;
        }
        Ok(())
    }

    pub fn data_collection_by_tag(&self, tag: &str) -> Option<&DataCollection> {
        self.data_collections
            .iter()
            .find(|dc| dc.data_collection_tag == tag)
    }
}

/// Per-scan counters, kept both per data collection and aggregated per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub total_files: usize,
    pub new_files: usize,
    pub updated_files: usize,
    pub skipped_files: usize,
    pub missing_files: usize,
    pub deleted_files: usize,
    pub other_failure_files: usize,
}

impl AddAssign for ScanStats {
    fn add_assign(&mut self, other: Self) {
        self.total_files += other.total_files;
        self.new_files += other.new_files;
        self.updated_files += other.updated_files;
        self.skipped_files += other.skipped_files;
        self.missing_files += other.missing_files;
        self.deleted_files += other.deleted_files;
        self.other_failure_files += other.other_failure_files;
    }
}

/// File-id buckets recorded alongside the stats of one scan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanFileBuckets {
    pub new_files: Vec<ObjectId>,
    pub updated_files: Vec<ObjectId>,
    pub skipped_files: Vec<ObjectId>,
    pub missing_files: Vec<ObjectId>,
    pub other_failure_files: Vec<ObjectId>,
}

/// One scan's outcome on a run: aggregate stats plus per-DC breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRunScan {
    pub stats: ScanStats,
    pub files: ScanFileBuckets,
    /// Per-data-collection stats keyed by DC tag
    pub dc_stats: HashMap<String, ScanStats>,
    pub scan_time: String,
}

/// One observed instance of a workflow's data being ingested
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    #[serde(rename = "_id", default = "ObjectId::new")]
    pub id: ObjectId,
    pub workflow_id: ObjectId,
    pub run_tag: String,
    pub run_location: String,
    pub creation_time: String,
    pub last_modification_time: String,
    pub registration_time: String,
    /// 64-hex digest over location, times, and contained file hashes;
    /// empty until first computed
    #[serde(default)]
    pub run_hash: String,
    #[serde(default)]
    pub files_id: Vec<ObjectId>,
    #[serde(default)]
    pub scan_results: Vec<WorkflowRunScan>,
    #[serde(default)]
    pub permissions: Permission,
}

impl WorkflowRun {
    pub fn validate(&self) -> Result<()> {
        if !self.run_hash.is_empty() && self.run_hash.len() != 64 {
            return Err(DepictioError::ConfigInvalid(format!(
                "run '{}': run_hash must be empty or 64 hex chars",
                self.run_tag
            )));
        }
        for value in [&self.creation_time, &self.last_modification_time] {
            paths::normalize_time(value)?;
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_tag_from_engine() {
        let workflow = test_support::flat_workflow("mapping", vec![]);
        assert_eq!(workflow.workflow_tag(), "snakemake/mapping");
    }

    #[test]
    fn test_workflow_tag_nf_core() {
        let mut workflow = test_support::flat_workflow("rnaseq", vec![]);
        workflow.catalog = Some(WorkflowCatalog {
            name: "nf-core".to_string(),
            url: Some("https://nf-co.re".to_string()),
        });
        assert_eq!(workflow.workflow_tag(), "nf-core/rnaseq");
    }

    #[test]
    fn test_sequencing_runs_requires_regex() {
        let location = WorkflowDataLocation {
            structure: DataLocationStructure::SequencingRuns,
            locations: vec!["/data".to_string()],
            runs_regex: None,
        };
        assert_eq!(location.validate().unwrap_err().kind(), "config-invalid");

        let location = WorkflowDataLocation {
            structure: DataLocationStructure::SequencingRuns,
            locations: vec!["/data".to_string()],
            runs_regex: Some(r"run_\d+".to_string()),
        };
        assert!(location.validate().is_ok());
    }

    #[test]
    fn test_invalid_runs_regex_rejected() {
        let location = WorkflowDataLocation {
            structure: DataLocationStructure::SequencingRuns,
            locations: vec!["/data".to_string()],
            runs_regex: Some("run_(".to_string()),
        };
        assert_eq!(location.validate().unwrap_err().kind(), "config-invalid");
    }
}
