//! [`Model`] backed by a JSON snapshot of users, indexes and project metadata.
//!
//! ```json
//! {"users": {"root": {"indexes": {"pypi": {
//!     "type": "mirror",
//!     "projects": {"Foo": {"cached": true, "versions": {
//!         "1.0": {"metadata": {"summary": "x"}, "doczip": ["Foo-1.0.doc.zip"]}
//!     }}}
//! }}}}}
//! ```

use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    indexing::normalize_name,
    model::{Model, ModelError, Stage, StageKind, DEFAULT_METADATA_KEYS},
};

#[derive(Debug, Default, Deserialize)]
struct Snapshot {
    #[serde(default)]
    users: BTreeMap<String, UserSnapshot>,
}

#[derive(Debug, Default, Deserialize)]
struct UserSnapshot {
    #[serde(default)]
    indexes: BTreeMap<String, IndexSnapshot>,
}

#[derive(Debug, Default, Deserialize)]
struct IndexSnapshot {
    #[serde(rename = "type", default)]
    kind: StageKind,
    #[serde(default)]
    metadata_keys: Option<Vec<String>>,
    #[serde(default)]
    projects: BTreeMap<String, ProjectSnapshot>,
}

#[derive(Debug, Deserialize)]
struct ProjectSnapshot {
    #[serde(default = "cached_by_default")]
    cached: bool,
    #[serde(default)]
    versions: BTreeMap<String, VersionSnapshot>,
}

fn cached_by_default() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct VersionSnapshot {
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    doczip: Vec<String>,
    #[serde(default)]
    doczip_exists: Option<bool>,
}

#[derive(Debug)]
struct JsonProject {
    listed_name: String,
    snapshot: ProjectSnapshot,
}

#[derive(Debug)]
struct JsonStage {
    user: String,
    index: String,
    kind: StageKind,
    metadata_keys: Vec<String>,
    projects: BTreeMap<String, JsonProject>,
    offline: AtomicBool,
    gone: AtomicBool,
}

impl JsonStage {
    fn check_alive(&self) -> Result<(), ModelError> {
        if self.gone.load(Ordering::SeqCst) {
            Err(ModelError::StageGone(self.name()))
        } else {
            Ok(())
        }
    }

    fn project(&self, project: &str) -> Result<&ProjectSnapshot, ModelError> {
        self.check_alive()?;
        self.projects
            .get(project)
            .map(|entry| &entry.snapshot)
            .ok_or_else(|| ModelError::UnknownProject {
                stage: self.name(),
                project: project.to_string(),
            })
    }

    fn version(&self, project: &str, version: &str) -> Result<&VersionSnapshot, ModelError> {
        self.project(project)?
            .versions
            .get(version)
            .ok_or_else(|| ModelError::UnknownVersion {
                stage: self.name(),
                project: project.to_string(),
                version: version.to_string(),
            })
    }
}

impl Stage for JsonStage {
    fn user(&self) -> &str {
        &self.user
    }

    fn index(&self) -> &str {
        &self.index
    }

    fn kind(&self) -> StageKind {
        self.kind
    }

    fn list_projects(&self) -> Result<Vec<String>, ModelError> {
        self.check_alive()?;
        Ok(self
            .projects
            .values()
            .map(|project| project.listed_name.clone())
            .collect())
    }

    fn is_project_cached(&self, project: &str) -> Result<bool, ModelError> {
        self.check_alive()?;
        Ok(self
            .projects
            .get(project)
            .is_some_and(|entry| entry.snapshot.cached))
    }

    fn set_offline(&self, offline: bool) -> bool {
        self.offline.swap(offline, Ordering::SeqCst)
    }

    fn list_versions(&self, project: &str) -> Result<Vec<String>, ModelError> {
        Ok(self.project(project)?.versions.keys().cloned().collect())
    }

    fn version_data(
        &self,
        project: &str,
        version: &str,
    ) -> Result<Map<String, Value>, ModelError> {
        Ok(self.version(project, version)?.metadata.clone())
    }

    fn doczip_links(&self, project: &str, version: &str) -> Result<Vec<String>, ModelError> {
        Ok(self.version(project, version)?.doczip.clone())
    }

    fn doczip_exists(&self, project: &str, version: &str) -> Result<bool, ModelError> {
        let version = self.version(project, version)?;
        Ok(version
            .doczip_exists
            .unwrap_or(!version.doczip.is_empty()))
    }

    fn metadata_keys(&self) -> Vec<String> {
        self.metadata_keys.clone()
    }
}

/// In-memory model loaded from a JSON snapshot.
///
/// User and index listings are fixed at load time; stages can be removed
/// afterwards, which is how a concurrent deletion is observed by a scan.
#[derive(Debug, Default)]
pub struct JsonModel {
    users: BTreeMap<String, Vec<String>>,
    stages: RwLock<BTreeMap<(String, String), Arc<JsonStage>>>,
}

impl JsonModel {
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid snapshot.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read model snapshot {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("invalid model snapshot {}", path.display()))
    }

    /// # Errors
    ///
    /// Returns an error if `raw` is not a valid snapshot.
    pub fn from_json(raw: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(raw)?;
        let mut users = BTreeMap::new();
        let mut stages = BTreeMap::new();
        for (user, user_snapshot) in snapshot.users {
            let mut indexes = Vec::new();
            for (index, index_snapshot) in user_snapshot.indexes {
                let metadata_keys = index_snapshot.metadata_keys.unwrap_or_else(|| {
                    DEFAULT_METADATA_KEYS
                        .iter()
                        .map(|key| (*key).to_string())
                        .collect()
                });
                let projects = index_snapshot
                    .projects
                    .into_iter()
                    .map(|(listed_name, snapshot)| {
                        (
                            normalize_name(&listed_name),
                            JsonProject {
                                listed_name,
                                snapshot,
                            },
                        )
                    })
                    .collect();
                let stage = JsonStage {
                    user: user.clone(),
                    index: index.clone(),
                    kind: index_snapshot.kind,
                    metadata_keys,
                    projects,
                    offline: AtomicBool::new(false),
                    gone: AtomicBool::new(false),
                };
                stages.insert((user.clone(), index.clone()), Arc::new(stage));
                indexes.push(index);
            }
            users.insert(user, indexes);
        }
        Ok(Self {
            users,
            stages: RwLock::new(stages),
        })
    }

    /// Delete a stage; handles already given out start failing with
    /// [`ModelError::StageGone`]. Returns whether the stage existed.
    pub fn remove_stage(&self, user: &str, index: &str) -> bool {
        let removed = self
            .stages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(user.to_string(), index.to_string()));
        match removed {
            Some(stage) => {
                stage.gone.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Current offline flag of a live stage.
    #[must_use]
    pub fn is_offline(&self, user: &str, index: &str) -> Option<bool> {
        self.stages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(user.to_string(), index.to_string()))
            .map(|stage| stage.offline.load(Ordering::SeqCst))
    }
}

impl Model for JsonModel {
    fn usernames(&self) -> Vec<String> {
        self.users.keys().cloned().collect()
    }

    fn user_indexes(&self, user: &str) -> Vec<String> {
        self.users.get(user).cloned().unwrap_or_default()
    }

    fn get_stage(&self, user: &str, index: &str) -> Option<Arc<dyn Stage>> {
        let stages = self.stages.read().unwrap_or_else(PoisonError::into_inner);
        let stage = stages.get(&(user.to_string(), index.to_string()))?;
        Some(Arc::clone(stage) as Arc<dyn Stage>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_snapshot_with_defaults() -> Result<()> {
        let model = JsonModel::from_json(
            r#"{"users": {"alice": {"indexes": {"dev": {"projects": {"My_Pkg": {}}}}}}}"#,
        )?;
        assert_eq!(model.usernames(), vec!["alice"]);
        assert_eq!(model.user_indexes("alice"), vec!["dev"]);
        assert!(model.user_indexes("bob").is_empty());
        let stage = model.get_stage("alice", "dev").expect("stage");
        assert_eq!(stage.kind(), StageKind::Local);
        assert_eq!(stage.name(), "alice/dev");
        assert_eq!(stage.list_projects()?, vec!["My_Pkg"]);
        assert!(stage.is_project_cached("my-pkg")?);
        assert!(stage.metadata_keys().iter().any(|key| key == "summary"));
        Ok(())
    }

    #[test]
    fn removed_stage_is_gone_for_existing_handles() -> Result<()> {
        let model = JsonModel::from_json(
            r#"{"users": {"root": {"indexes": {"pypi": {"type": "mirror"}}}}}"#,
        )?;
        let stage = model.get_stage("root", "pypi").expect("stage");
        assert!(model.remove_stage("root", "pypi"));
        assert!(!model.remove_stage("root", "pypi"));
        assert!(model.get_stage("root", "pypi").is_none());
        assert!(matches!(
            stage.list_projects(),
            Err(ModelError::StageGone(name)) if name == "root/pypi"
        ));
        Ok(())
    }

    #[test]
    fn doczip_exists_defaults_to_link_presence() -> Result<()> {
        let model = JsonModel::from_json(
            r#"{"users": {"u": {"indexes": {"i": {"projects": {"p": {"versions": {
                "1.0": {"doczip": ["p-1.0.doc.zip"]},
                "2.0": {"doczip": ["p-2.0.doc.zip"], "doczip_exists": false},
                "3.0": {}
            }}}}}}}}"#,
        )?;
        let stage = model.get_stage("u", "i").expect("stage");
        assert!(stage.doczip_exists("p", "1.0")?);
        assert!(!stage.doczip_exists("p", "2.0")?);
        assert!(!stage.doczip_exists("p", "3.0")?);
        assert!(matches!(
            stage.version_data("p", "9.9"),
            Err(ModelError::UnknownVersion { .. })
        ));
        Ok(())
    }

    #[test]
    fn load_reports_missing_file() {
        let err = JsonModel::load(Path::new("/nonexistent/model.json")).expect_err("missing");
        assert!(err.to_string().contains("failed to read model snapshot"));
    }
}
