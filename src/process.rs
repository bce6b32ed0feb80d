//! Table-DC materialization — scanned files → per-collection Delta table
//!
//! Each table DC owns one Delta table. Materialization reads every scanned
//! file in the DC's configured format, stamps rows with the owning run's
//! tag as `depictio_run_id`, concatenates, and atomically overwrites the
//! DC's table. The run-id column is what lets the join engine keep
//! cross-run rows apart.

use std::path::Path;
use std::sync::Arc;

use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{DepictioError, Result};
use crate::events::{DcOperation, EventBusHandle};
use crate::joins::DEPICTIO_RUN_ID;
use crate::metadata::MetadataStore;
use crate::models::{DataCollection, DcSpecificProperties, TableFormat, TableProperties};
use crate::storage::DeltaStore;

/// Summary of one materialization
#[derive(Debug, Clone, serde::Serialize)]
pub struct MaterializeReport {
    pub data_collection_tag: String,
    pub delta_location: String,
    pub row_count: usize,
    pub column_count: usize,
    pub files_read: usize,
    pub files_failed: usize,
}

/// Read one data file according to the DC's table properties
pub fn read_data_file(path: &Path, properties: &TableProperties) -> Result<DataFrame> {
    let options = &properties.polars_kwargs;
    let mut df = match properties.format {
        TableFormat::Csv | TableFormat::Tsv => {
            let default_separator = match properties.format {
                TableFormat::Tsv => '\t',
                _ => ',',
            };
            let separator = options.separator.unwrap_or(default_separator);
            CsvReadOptions::default()
                .with_has_header(options.has_header)
                .with_skip_rows(options.skip_rows)
                .with_parse_options(
                    CsvParseOptions::default().with_separator(separator as u8),
                )
                .try_into_reader_with_file_path(Some(path.to_path_buf()))?
                .finish()?
        }
        TableFormat::Parquet => {
            let file = std::fs::File::open(path)?;
            ParquetReader::new(file).finish()?
        }
    };

    if let Some(keep) = &properties.keep_columns {
        let present: Vec<&str> = keep
            .iter()
            .filter(|name| df.get_column_names().iter().any(|c| c.as_str() == name.as_str()))
            .map(String::as_str)
            .collect();
        df = df.select(present)?;
    }
    Ok(df)
}

/// Materializer wired to the metadata store and object store
pub struct Materializer {
    delta: Arc<DeltaStore>,
    meta: Arc<MetadataStore>,
    events: Option<EventBusHandle>,
}

impl Materializer {
    pub fn new(delta: Arc<DeltaStore>, meta: Arc<MetadataStore>) -> Self {
        Self {
            delta,
            meta,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBusHandle) -> Self {
        self.events = Some(events);
        self
    }

    /// Build (or rebuild) the Delta table of a table DC from its files.
    ///
    /// Per-file read failures are logged and skipped; the table is only
    /// replaced when at least one file was readable.
    pub async fn materialize_table_dc(&self, dc: &DataCollection) -> Result<MaterializeReport> {
        let DcSpecificProperties::Table(properties) = &dc.config.properties else {
            return Err(DepictioError::ConfigInvalid(format!(
                "data collection '{}' is not a table",
                dc.data_collection_tag
            )));
        };

        let files = self.meta.file_documents_by_dc(&dc.id).await?;
        if files.is_empty() {
            return Err(DepictioError::NotFound(format!(
                "no files recorded for data collection '{}'",
                dc.data_collection_tag
            )));
        }

        let mut frames = Vec::new();
        let mut files_failed = 0usize;
        for file in &files {
            match read_data_file(Path::new(&file.file_location), properties) {
                Ok(df) => {
                    let stamped = df
                        .lazy()
                        .with_columns([lit(file.run_tag.as_str()).alias(DEPICTIO_RUN_ID)])
                        .collect()?;
                    frames.push(stamped.lazy());
                }
                Err(e) => {
                    warn!(
                        file = %file.file_location,
                        error = %e,
                        "File unreadable, excluded from materialization"
                    );
                    files_failed += 1;
                }
            }
        }
        if frames.is_empty() {
            return Err(DepictioError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "no readable files for data collection '{}'",
                    dc.data_collection_tag
                ),
            )));
        }

        let combined = concat(
            frames,
            UnionArgs {
                diagonal: true,
                ..Default::default()
            },
        )?
        .collect()?;
        debug!(
            dc = %dc.data_collection_tag,
            rows = combined.height(),
            "Files combined"
        );

        let location = self
            .meta
            .get_or_assign_delta_location(&dc.id.to_hex(), self.delta.settings())
            .await?;
        self.delta.write_dataframe(&location, &combined, true).await?;

        if let Some(events) = &self.events {
            events
                .publish_dc_updated(dc.id, &dc.data_collection_tag, DcOperation::Updated)
                .await;
        }
        info!(
            dc = %dc.data_collection_tag,
            rows = combined.height(),
            location = %location,
            "Data collection materialized"
        );

        Ok(MaterializeReport {
            data_collection_tag: dc.data_collection_tag.clone(),
            delta_location: location,
            row_count: combined.height(),
            column_count: combined.width(),
            files_read: files.len() - files_failed,
            files_failed,
        })
    }
}
