//! Metadata entity models
//!
//! Every entity carries an immutable 96-bit [`bson::oid::ObjectId`]
//! (rendered as 24 lowercase hex). Projects embed workflows which embed data
//! collections; all cross-references (joins, links, run/file ownership) are
//! by id to keep the document graph acyclic.

pub mod data_collections;
pub mod files;
pub mod joins;
pub mod links;
pub mod projects;
pub mod workflows;

pub use data_collections::{
    DataCollection, DataCollectionConfig, DcSource, DcSpecificProperties, DcType, RegexConfig,
    ScanConfig, TableFormat, TableProperties, Wildcard,
};
pub use files::{File, FileScanOutcome, ScanOutcome};
pub use joins::{
    AggregatedSide, AggregationFunction, ColumnAggregation, GranularityConfig, JoinDefinition,
    JoinMetadata, JoinPreview, JoinType, JoinValidation, JoinedTableMetadata,
};
pub use links::{
    DcLink, LinkConfig, LinkResolutionRequest, LinkResolutionResponse, LinkTargetType,
    ResolverKind,
};
pub use projects::{Permission, Project, ProjectType};
pub use workflows::{
    DataLocationStructure, ScanStats, Workflow, WorkflowCatalog, WorkflowDataLocation,
    WorkflowEngine, WorkflowRun, WorkflowRunScan,
};
