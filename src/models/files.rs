//! File records produced by the scan engine

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::{DepictioError, Result};

use super::projects::Permission;

/// One observed physical data file, owned by its run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    #[serde(rename = "_id", default = "ObjectId::new")]
    pub id: ObjectId,
    pub filename: String,
    /// Absolute path; the reconciliation key across scans
    pub file_location: String,
    pub creation_time: String,
    pub modification_time: String,
    /// SHA-256 over filename ⊕ size ⊕ ctime ⊕ mtime, 64 lowercase hex
    pub file_hash: String,
    pub filesize: u64,
    pub data_collection_id: ObjectId,
    pub run_id: ObjectId,
    pub run_tag: String,
    #[serde(default)]
    pub permissions: Permission,
}

impl File {
    pub fn validate(&self) -> Result<()> {
        if self.filesize == 0 {
            return Err(DepictioError::InvalidFile {
                location: self.file_location.clone(),
                detail: "filesize must be > 0".to_string(),
            });
        }
        if self.file_hash.len() != 64
            || !self
                .file_hash
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(DepictioError::InvalidFile {
                location: self.file_location.clone(),
                detail: "file_hash must be 64 lowercase hex chars".to_string(),
            });
        }
        Ok(())
    }
}

/// File state transition observed by one scan.
///
/// The full lifecycle across scans is
/// `absent → added → (unchanged|updated)* → missing → (deleted|re-added)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanOutcome {
    /// Not previously recorded; a new id was assigned
    Added,
    /// Previously recorded; hash changed (or sync requested), id preserved
    Updated,
    /// Previously recorded and unchanged
    Skipped,
}

/// A scanned file together with its transition
#[derive(Debug, Clone)]
pub struct FileScanOutcome {
    pub file: File,
    pub outcome: ScanOutcome,
}
