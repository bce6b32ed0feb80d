//! Metadata store adapter — MongoDB
//!
//! All entity CRUD goes through this adapter. Writes are idempotent: runs
//! and files are upserted by their stable `_id`, and duplicate-key conflicts
//! on creation degrade to a retrieve of the existing document, so races
//! between concurrent scans converge to the same state.

use std::collections::HashMap;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Document};
use futures::stream::TryStreamExt;
use mongodb::{Client, Collection, Database};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{DepictioError, Result};
use crate::models::{File, JoinedTableMetadata, Project, WorkflowRun};

/// Catalog surface shared by the data-plane engines: Delta-table locations
/// and join lineage.
///
/// [`MetadataStore`] is the production implementation; tests substitute an
/// in-memory one so the join and query engines can run against a local
/// Delta store without a document database.
#[async_trait]
pub trait DeltaCatalog: Send + Sync {
    /// Delta-table URI recorded for a DC id, if one was ever assigned
    async fn get_delta_location(&self, dc_id: &str) -> Result<Option<String>>;

    /// Delta-table URI for a DC id, assigning it on first use. Assigned
    /// once, never rewritten.
    async fn get_or_assign_delta_location(
        &self,
        dc_id: &str,
        settings: &Settings,
    ) -> Result<String>;

    /// Upsert the lineage record of a persisted join result
    async fn upsert_joined_table_metadata(&self, metadata: &JoinedTableMetadata) -> Result<()>;

    async fn get_joined_table_metadata(
        &self,
        join_name: &str,
    ) -> Result<Option<JoinedTableMetadata>>;
}

pub const COLLECTION_PROJECTS: &str = "projects";
pub const COLLECTION_RUNS: &str = "runs";
pub const COLLECTION_FILES: &str = "files";
pub const COLLECTION_DELTATABLES: &str = "deltatables";

/// Collections included in backup/restore. `tokens` is intentionally
/// excluded to avoid dependency cycles with the identity provider.
pub const BACKUP_COLLECTIONS: &[&str] = &[
    COLLECTION_PROJECTS,
    COLLECTION_RUNS,
    COLLECTION_FILES,
    COLLECTION_DELTATABLES,
    "groups",
    "users",
    "dashboards",
];

/// Slim projection of a stored file used by scan reconciliation
#[derive(Debug, Clone)]
pub struct ExistingFile {
    pub id: ObjectId,
    pub file_hash: String,
}

/// MongoDB-backed metadata store.
///
/// Thread-safe: can be shared across tokio tasks via `Arc<MetadataStore>`.
pub struct MetadataStore {
    db: Database,
}

impl MetadataStore {
    /// Connect to the configured MongoDB instance
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let client = Client::with_uri_str(&settings.mongo_url).await?;
        let db = client.database(&settings.mongo_database);
        info!(database = %settings.mongo_database, "Metadata store connected");
        Ok(Self { db })
    }

    fn projects(&self) -> Collection<Project> {
        self.db.collection(COLLECTION_PROJECTS)
    }

    fn runs(&self) -> Collection<WorkflowRun> {
        self.db.collection(COLLECTION_RUNS)
    }

    fn files(&self) -> Collection<File> {
        self.db.collection(COLLECTION_FILES)
    }

    fn deltatables(&self) -> Collection<Document> {
        self.db.collection(COLLECTION_DELTATABLES)
    }

    // ─── Projects ───

    pub async fn get_project(&self, project_id: &ObjectId) -> Result<Project> {
        self.projects()
            .find_one(doc! {"_id": *project_id})
            .await?
            .ok_or_else(|| DepictioError::NotFound(format!("project {project_id}")))
    }

    /// Create a project; a duplicate-key conflict degrades to fetching the
    /// existing document by name.
    pub async fn create_project(&self, project: &Project) -> Result<Project> {
        match self.projects().insert_one(project).await {
            Ok(_) => Ok(project.clone()),
            Err(e) if is_duplicate_key(&e) => {
                warn!(name = %project.name, "Project already exists, returning stored copy");
                self.projects()
                    .find_one(doc! {"name": &project.name})
                    .await?
                    .ok_or_else(|| {
                        DepictioError::Conflict(format!("project '{}'", project.name))
                    })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn replace_project(&self, project: &Project) -> Result<()> {
        self.projects()
            .replace_one(doc! {"_id": project.id}, project)
            .upsert(true)
            .await?;
        Ok(())
    }

    /// Find the project that declares a given data collection.
    pub async fn project_for_dc(&self, dc_id: &ObjectId) -> Result<Project> {
        let filter = doc! {"$or": [
            {"workflows.data_collections._id": *dc_id},
            {"data_collections._id": *dc_id},
            {"joins.result_dc_id": *dc_id},
        ]};
        self.projects()
            .find_one(filter)
            .await?
            .ok_or_else(|| DepictioError::DcNotFound(dc_id.to_hex()))
    }

    // ─── Runs ───

    /// Current runs of a workflow keyed by run_tag
    pub async fn runs_by_workflow(
        &self,
        workflow_id: &ObjectId,
    ) -> Result<HashMap<String, WorkflowRun>> {
        let mut cursor = self.runs().find(doc! {"workflow_id": *workflow_id}).await?;
        let mut by_tag = HashMap::new();
        while let Some(run) = cursor.try_next().await? {
            by_tag.insert(run.run_tag.clone(), run);
        }
        Ok(by_tag)
    }

    /// Batched idempotent upsert of runs by `_id`
    pub async fn upsert_runs(&self, runs: &[WorkflowRun]) -> Result<()> {
        for run in runs {
            self.runs()
                .replace_one(doc! {"_id": run.id}, run)
                .upsert(true)
                .await?;
            debug!(run_tag = %run.run_tag, "Run upserted");
        }
        info!(count = runs.len(), "Runs upserted");
        Ok(())
    }

    pub async fn delete_run(&self, run_id: &ObjectId) -> Result<()> {
        self.runs().delete_one(doc! {"_id": *run_id}).await?;
        Ok(())
    }

    // ─── Files ───

    /// Current file set of a data collection keyed by file_location
    pub async fn files_by_dc(
        &self,
        dc_id: &ObjectId,
    ) -> Result<HashMap<String, ExistingFile>> {
        let mut cursor = self
            .files()
            .find(doc! {"data_collection_id": *dc_id})
            .await?;
        let mut by_location = HashMap::new();
        while let Some(file) = cursor.try_next().await? {
            by_location.insert(
                file.file_location.clone(),
                ExistingFile {
                    id: file.id,
                    file_hash: file.file_hash,
                },
            );
        }
        Ok(by_location)
    }

    /// Full file documents belonging to a data collection
    pub async fn file_documents_by_dc(&self, dc_id: &ObjectId) -> Result<Vec<File>> {
        let cursor = self
            .files()
            .find(doc! {"data_collection_id": *dc_id})
            .await?;
        Ok(cursor.try_collect().await?)
    }

    /// Batched create/update of files, idempotent on `_id`
    pub async fn upsert_files(&self, files: &[File]) -> Result<()> {
        for file in files {
            file.validate()?;
            self.files()
                .replace_one(doc! {"_id": file.id}, file)
                .upsert(true)
                .await?;
        }
        info!(count = files.len(), "Files upserted");
        Ok(())
    }

    pub async fn delete_file(&self, file_id: &ObjectId) -> Result<()> {
        self.files().delete_one(doc! {"_id": *file_id}).await?;
        Ok(())
    }

    pub async fn delete_files(&self, file_ids: &[ObjectId]) -> Result<u64> {
        if file_ids.is_empty() {
            return Ok(0);
        }
        let result = self
            .files()
            .delete_many(doc! {"_id": {"$in": file_ids.to_vec()}})
            .await?;
        Ok(result.deleted_count)
    }

    pub async fn delete_files_by_run(&self, run_id: &ObjectId) -> Result<u64> {
        let result = self.files().delete_many(doc! {"run_id": *run_id}).await?;
        Ok(result.deleted_count)
    }

    // ─── Delta locations & lineage ───

    /// Delta-table URI recorded for a DC id, if one was ever assigned
    pub async fn get_delta_location(&self, dc_id: &str) -> Result<Option<String>> {
        let record = self.deltatables().find_one(doc! {"_id": dc_id}).await?;
        Ok(record.and_then(|d| d.get_str("delta_location").ok().map(String::from)))
    }

    /// Delta-table URI for a DC id, assigning it on first use.
    ///
    /// The URI is written once and never rewritten; later calls return the
    /// recorded value even if the configured base URI has changed.
    pub async fn get_or_assign_delta_location(
        &self,
        dc_id: &str,
        settings: &Settings,
    ) -> Result<String> {
        let coll = self.deltatables();
        if let Some(existing) = coll.find_one(doc! {"_id": dc_id}).await? {
            if let Ok(location) = existing.get_str("delta_location") {
                return Ok(location.to_string());
            }
        }
        let location = settings.delta_table_uri(dc_id);
        let record = doc! {"_id": dc_id, "delta_location": &location};
        match coll.insert_one(record).await {
            Ok(_) => {
                debug!(dc_id, location = %location, "Delta location assigned");
                Ok(location)
            }
            // Lost a race to another writer: the stored value wins.
            Err(e) if is_duplicate_key(&e) => {
                let stored = coll
                    .find_one(doc! {"_id": dc_id})
                    .await?
                    .and_then(|d| d.get_str("delta_location").ok().map(String::from));
                stored.ok_or_else(|| DepictioError::Conflict(format!("delta location {dc_id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Upsert the lineage record of a persisted join result, keyed by join
    /// name so each JoinDefinition owns exactly one document.
    pub async fn upsert_joined_table_metadata(
        &self,
        metadata: &JoinedTableMetadata,
    ) -> Result<()> {
        let coll: Collection<JoinedTableMetadata> = self.db.collection(COLLECTION_DELTATABLES);
        let document = bson::to_document(metadata)?;
        coll.update_one(
            doc! {"join_name": &metadata.join_name},
            doc! {"$set": document},
        )
        .upsert(true)
        .await?;
        info!(join = %metadata.join_name, rows = metadata.row_count, "Join lineage recorded");
        Ok(())
    }

    pub async fn get_joined_table_metadata(
        &self,
        join_name: &str,
    ) -> Result<Option<JoinedTableMetadata>> {
        let coll: Collection<JoinedTableMetadata> = self.db.collection(COLLECTION_DELTATABLES);
        Ok(coll.find_one(doc! {"join_name": join_name}).await?)
    }
}

#[async_trait]
impl DeltaCatalog for MetadataStore {
    async fn get_delta_location(&self, dc_id: &str) -> Result<Option<String>> {
        MetadataStore::get_delta_location(self, dc_id).await
    }

    async fn get_or_assign_delta_location(
        &self,
        dc_id: &str,
        settings: &Settings,
    ) -> Result<String> {
        MetadataStore::get_or_assign_delta_location(self, dc_id, settings).await
    }

    async fn upsert_joined_table_metadata(&self, metadata: &JoinedTableMetadata) -> Result<()> {
        MetadataStore::upsert_joined_table_metadata(self, metadata).await
    }

    async fn get_joined_table_metadata(
        &self,
        join_name: &str,
    ) -> Result<Option<JoinedTableMetadata>> {
        MetadataStore::get_joined_table_metadata(self, join_name).await
    }
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        ErrorKind::BulkWrite(bulk) => bulk
            .write_errors
            .values()
            .any(|write_error| write_error.code == 11000),
        _ => false,
    }
}
