//! Object-store adapter — Delta Lake tables bridged to polars
//!
//! delta-rs owns the transaction log (atomic commits, overwrite semantics,
//! credential handling); polars is the compute engine. Reads resolve the
//! table's parquet file list from the Delta log and scan it lazily with
//! polars. Writes serialize the polars frame to an in-memory parquet buffer
//! and commit the resulting Arrow batches through delta-rs, so a partially
//! written table never replaces the previous version.

use std::collections::HashMap;
use std::path::Path;

use deltalake::arrow::array::RecordBatch;
use deltalake::operations::DeltaOps;
use deltalake::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use deltalake::protocol::SaveMode;
use deltalake::{open_table_with_storage_options, DeltaTable, DeltaTableError};
use polars::io::cloud::CloudOptions;
use polars::prelude::*;
use tracing::{debug, info};
use url::Url;

use crate::config::{S3Config, Settings};
use crate::error::{DepictioError, Result};

/// Core Delta Lake store — manages per-DC tables under the configured base URI.
///
/// Thread-safe: can be shared across tokio tasks via `Arc<DeltaStore>`.
pub struct DeltaStore {
    settings: Settings,
}

impl DeltaStore {
    pub fn new(settings: Settings) -> Self {
        if settings.s3.is_some() {
            // Registers the s3:// and s3a:// URL handlers with delta-rs.
            deltalake::aws::register_handlers(None);
        }
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Storage options handed to delta-rs (and polars' cloud reader)
    fn storage_options(&self) -> HashMap<String, String> {
        let mut options = HashMap::new();
        if let Some(S3Config {
            endpoint,
            region,
            access_key,
            secret_key,
            allow_http,
        }) = &self.settings.s3
        {
            options.insert("AWS_ENDPOINT_URL".to_string(), endpoint.clone());
            options.insert("AWS_REGION".to_string(), region.clone());
            options.insert("AWS_ACCESS_KEY_ID".to_string(), access_key.clone());
            options.insert("AWS_SECRET_ACCESS_KEY".to_string(), secret_key.clone());
            options.insert("AWS_ALLOW_HTTP".to_string(), allow_http.to_string());
        }
        options
    }

    /// Convert a table URI to a `Url` delta-rs accepts
    fn table_url(uri: &str) -> Result<Url> {
        if uri.contains("://") {
            Ok(Url::parse(uri)?)
        } else {
            Url::from_directory_path(Path::new(uri)).map_err(|_| {
                DepictioError::ConfigInvalid(format!("invalid table path: {uri}"))
            })
        }
    }

    /// Open an existing Delta table. Absence maps to `dc-not-processed`.
    pub async fn open(&self, uri: &str) -> Result<DeltaTable> {
        let url = Self::table_url(uri)?;
        match open_table_with_storage_options(url, self.storage_options()).await {
            Ok(table) => Ok(table),
            Err(DeltaTableError::NotATable(_)) | Err(DeltaTableError::InvalidTableLocation(_)) => {
                Err(DepictioError::DcNotProcessed(uri.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a Delta table has been materialized at `uri`
    pub async fn exists(&self, uri: &str) -> bool {
        self.open(uri).await.is_ok()
    }

    // ─── Read ───

    /// Read the current version of a Delta table into a polars DataFrame.
    ///
    /// The parquet files referenced by the Delta log are scanned lazily and
    /// concatenated; an empty table yields an empty frame.
    pub async fn read_dataframe(&self, uri: &str) -> Result<DataFrame> {
        let table = self.open(uri).await?;
        let file_uris: Vec<String> = table.get_file_uris()?.collect();
        if file_uris.is_empty() {
            debug!(uri, "Delta table is empty");
            return Ok(DataFrame::empty());
        }

        let cloud_options = self.polars_cloud_options(uri)?;
        let mut frames = Vec::with_capacity(file_uris.len());
        for file_uri in &file_uris {
            let mut args = ScanArgsParquet::default();
            args.cloud_options = cloud_options.clone();
            let path = file_uri.strip_prefix("file://").unwrap_or(file_uri);
            frames.push(LazyFrame::scan_parquet(path, args)?);
        }
        let df = concat(frames, UnionArgs::default())?.collect()?;

        debug!(uri, rows = df.height(), files = file_uris.len(), "Delta table read");
        Ok(df)
    }

    fn polars_cloud_options(&self, uri: &str) -> Result<Option<CloudOptions>> {
        if !uri.starts_with("s3://") && !uri.starts_with("s3a://") {
            return Ok(None);
        }
        let pairs: Vec<(String, String)> = self.storage_options().into_iter().collect();
        let options = CloudOptions::from_untyped_config(uri, pairs)
            .map_err(|e| DepictioError::ConfigInvalid(e.to_string()))?;
        Ok(Some(options))
    }

    // ─── Write ───

    /// Write a polars DataFrame as the new content of a Delta table.
    ///
    /// `overwrite = true` atomically replaces the previous version (the
    /// Delta commit is the visibility point); `false` appends. The table is
    /// created on first write. Returns the committed version.
    pub async fn write_dataframe(
        &self,
        uri: &str,
        df: &DataFrame,
        overwrite: bool,
    ) -> Result<i64> {
        let batches = dataframe_to_batches(df)?;
        let save_mode = if overwrite {
            SaveMode::Overwrite
        } else {
            SaveMode::Append
        };

        let url = Self::table_url(uri)?;
        let ops = DeltaOps::try_from_url_with_storage_options(url, self.storage_options())
            .await
            .map_err(DepictioError::from)?;
        let table = ops.write(batches).with_save_mode(save_mode).await?;
        let version = table.version().unwrap_or(0);

        info!(
            uri,
            rows = df.height(),
            columns = df.width(),
            version,
            overwrite,
            "Delta table written"
        );
        Ok(version)
    }

    /// Total size in bytes of the data files referenced by the current version
    pub async fn table_size_bytes(&self, uri: &str) -> Result<u64> {
        let table = self.open(uri).await?;
        let size: i64 = table
            .snapshot()
            .map_err(DepictioError::from)?
            .log_data()
            .iter()
            .map(|add| add.size())
            .sum();
        Ok(size.max(0) as u64)
    }
}

/// Serialize a polars frame to Arrow record batches via an in-memory
/// parquet buffer, so delta-rs and polars agree on the schema encoding.
fn dataframe_to_batches(df: &DataFrame) -> Result<Vec<RecordBatch>> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut frame = df.clone();
    ParquetWriter::new(&mut buffer).finish(&mut frame)?;

    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes::Bytes::from(buffer))
        .map_err(|e| DepictioError::DeltaTable(e.to_string()))?
        .build()
        .map_err(|e| DepictioError::DeltaTable(e.to_string()))?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| DepictioError::DeltaTable(e.to_string()))?;
    Ok(batches)
}
