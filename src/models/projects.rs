//! Project — the top-level container

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::{DepictioError, Result};

use super::data_collections::DataCollection;
use super::joins::JoinDefinition;
use super::links::DcLink;
use super::workflows::Workflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Basic,
    Advanced,
}

/// Permission set referencing users by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default)]
    pub owners: Vec<ObjectId>,
    #[serde(default)]
    pub editors: Vec<ObjectId>,
    #[serde(default)]
    pub viewers: Vec<ObjectId>,
}

impl Permission {
    pub fn owned_by(user_id: ObjectId) -> Self {
        Self {
            owners: vec![user_id],
            ..Default::default()
        }
    }
}

/// Top-level container grouping workflows, data collections, joins, and links.
///
/// Basic projects hold a flat list of data collections; advanced projects
/// hold workflows that own their data collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "_id", default = "ObjectId::new")]
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub project_type: ProjectType,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub permissions: Permission,
    /// Ordered project-level join definitions
    #[serde(default)]
    pub joins: Vec<JoinDefinition>,
    /// Ordered cross-DC links
    #[serde(default)]
    pub links: Vec<DcLink>,
    /// Workflows (advanced projects)
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    /// Flat data collections (basic projects)
    #[serde(default)]
    pub data_collections: Vec<DataCollection>,
}

impl Project {
    /// Validate cross-field invariants: unique workflow names, unique DC tags
    /// within each workflow, unique join names, and per-entity rules.
    pub fn validate(&self) -> Result<()> {
        let mut workflow_names = std::collections::HashSet::new();
        for workflow in &self.workflows {
            if !workflow_names.insert(workflow.name.as_str()) {
                return Err(DepictioError::ConfigInvalid(format!(
                    "project '{}': duplicate workflow name '{}'",
                    self.name, workflow.name
                )));
            }
            workflow.validate()?;
        }

        for dc in &self.data_collections {
            dc.validate()?;
        }

        let mut join_names = std::collections::HashSet::new();
        for join in &self.joins {
            if !join_names.insert(join.name.as_str()) {
                return Err(DepictioError::ConfigInvalid(format!(
                    "project '{}': duplicate join name '{}'",
                    self.name, join.name
                )));
            }
            join.validate()?;
        }

        for link in &self.links {
            link.link_config.validate()?;
        }

        Ok(())
    }

    /// All data collections, workflow-owned and project-level.
    pub fn all_data_collections(&self) -> impl Iterator<Item = &DataCollection> {
        self.workflows
            .iter()
            .flat_map(|w| w.data_collections.iter())
            .chain(self.data_collections.iter())
    }

    /// Look up a data collection anywhere in the project by id.
    pub fn data_collection_by_id(&self, dc_id: &ObjectId) -> Option<&DataCollection> {
        self.all_data_collections().find(|dc| &dc.id == dc_id)
    }
}
