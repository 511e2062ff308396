use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Core packaging metadata fields a stage recognizes by default.
pub const DEFAULT_METADATA_KEYS: &[&str] = &[
    "metadata_version",
    "name",
    "version",
    "platform",
    "supported_platform",
    "summary",
    "description",
    "description_content_type",
    "keywords",
    "home_page",
    "download_url",
    "author",
    "author_email",
    "maintainer",
    "maintainer_email",
    "license",
    "classifiers",
    "requires_dist",
    "provides_dist",
    "obsoletes_dist",
    "requires_python",
    "requires_external",
    "project_urls",
    "provides_extras",
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    #[default]
    Local,
    Mirror,
}

impl StageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Local => "local",
            StageKind::Mirror => "mirror",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("[PXM400] stage {0} no longer exists")]
    StageGone(String),
    #[error("[PXM401] {stage}: unknown project {project}")]
    UnknownProject { stage: String, project: String },
    #[error("[PXM402] {stage}: {project} has no version {version}")]
    UnknownVersion {
        stage: String,
        project: String,
        version: String,
    },
}

/// One index (`user/index`) as seen by the indexer.
///
/// Project-level calls take PEP 503 normalized names.
pub trait Stage: Send + Sync {
    fn user(&self) -> &str;
    fn index(&self) -> &str;

    fn name(&self) -> String {
        format!("{}/{}", self.user(), self.index())
    }

    fn kind(&self) -> StageKind;
    fn list_projects(&self) -> Result<Vec<String>, ModelError>;

    /// Whether a mirror has fetched the project's metadata yet. Local stages
    /// always hold what they list.
    fn is_project_cached(&self, project: &str) -> Result<bool, ModelError>;

    /// Toggle upstream access; returns the previous setting.
    fn set_offline(&self, offline: bool) -> bool;

    fn list_versions(&self, project: &str) -> Result<Vec<String>, ModelError>;
    fn version_data(&self, project: &str, version: &str)
        -> Result<Map<String, Value>, ModelError>;
    fn doczip_links(&self, project: &str, version: &str) -> Result<Vec<String>, ModelError>;
    fn doczip_exists(&self, project: &str, version: &str) -> Result<bool, ModelError>;
    fn metadata_keys(&self) -> Vec<String>;
}

/// Registry of users and their stages.
pub trait Model: Send + Sync {
    fn usernames(&self) -> Vec<String>;
    fn user_indexes(&self, user: &str) -> Vec<String>;

    /// `None` when the stage was deleted after it was listed.
    fn get_stage(&self, user: &str, index: &str) -> Option<Arc<dyn Stage>>;
}
