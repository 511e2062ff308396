//! Project enumeration and per-project document building for search indexing.

use std::{
    fmt,
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
    vec,
};

use pep440_rs::Version;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::model::{Model, ModelError, Stage, StageKind};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(3);
const UNKNOWN_SENTINEL: &str = "UNKNOWN";

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(
        "[PXM410] {project}: version {version} has no doc link after doc_version {doc_version} was recorded"
    )]
    DocOrder {
        project: String,
        version: String,
        doc_version: String,
    },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// A project to index, bound to the stage it was listed from.
#[derive(Clone)]
pub struct ProjectIndexingInfo {
    pub stage: Arc<dyn Stage>,
    pub name: String,
}

impl ProjectIndexingInfo {
    #[must_use]
    pub fn indexname(&self) -> String {
        self.stage.name()
    }

    #[must_use]
    pub fn is_from_mirror(&self) -> bool {
        self.stage.kind() == StageKind::Mirror
    }
}

impl fmt::Debug for ProjectIndexingInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectIndexingInfo")
            .field("stage", &self.stage.name())
            .field("name", &self.name)
            .finish()
    }
}

/// Handle on the documentation archive of one project version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Docs {
    pub stage: String,
    pub project: String,
    pub version: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProjectDocument {
    pub fields: Map<String, Value>,
    pub docs: Option<Docs>,
}

impl ProjectDocument {
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.fields.get("name").and_then(Value::as_str)
    }

    /// Flatten into one JSON object, docs under `+doczip`.
    #[must_use]
    pub fn into_value(self) -> Value {
        let mut fields = self.fields;
        if let Some(docs) = self.docs {
            fields.insert(
                "+doczip".to_string(),
                serde_json::to_value(docs).unwrap_or(Value::Null),
            );
        }
        Value::Object(fields)
    }
}

/// Lazy walk over users, then their stages, then each stage's projects.
///
/// Stages that disappear while the walk is in progress are skipped.
pub struct ProjectIter<'a> {
    model: &'a dyn Model,
    users: vec::IntoIter<String>,
    user: String,
    indexes: vec::IntoIter<String>,
    current: Option<(Arc<dyn Stage>, vec::IntoIter<String>)>,
    count: usize,
    last_progress: Instant,
}

/// Start a fresh scan over `model`.
#[must_use]
pub fn iter_projects(model: &dyn Model) -> ProjectIter<'_> {
    ProjectIter {
        model,
        users: model.usernames().into_iter(),
        user: String::new(),
        indexes: Vec::new().into_iter(),
        current: None,
        count: 0,
        last_progress: Instant::now(),
    }
}

impl ProjectIter<'_> {
    fn next_in_stage(&mut self) -> Option<ProjectIndexingInfo> {
        let (stage, names) = self.current.as_mut()?;
        let Some(name) = names.next() else {
            self.current = None;
            return None;
        };
        let info = ProjectIndexingInfo {
            stage: Arc::clone(stage),
            name,
        };
        self.count += 1;
        let now = Instant::now();
        if now.duration_since(self.last_progress) > PROGRESS_INTERVAL {
            debug!(count = self.count, "currently search-indexed");
            self.last_progress = now;
        }
        Some(info)
    }

    fn next_stage(&mut self) -> Option<Option<Arc<dyn Stage>>> {
        loop {
            if let Some(index) = self.indexes.next() {
                let stage = self.model.get_stage(&self.user, &index);
                if stage.is_none() {
                    debug!(user = %self.user, %index, "stage vanished before indexing");
                }
                return Some(stage);
            }
            self.user = self.users.next()?;
            self.indexes = self.model.user_indexes(&self.user).into_iter();
        }
    }
}

impl Iterator for ProjectIter<'_> {
    type Item = Result<ProjectIndexingInfo, ModelError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(info) = self.next_in_stage() {
                return Some(Ok(info));
            }
            let Some(stage) = self.next_stage()? else {
                continue;
            };
            info!(stage = %stage.name(), "search-indexing");
            match stage.list_projects() {
                Ok(names) => {
                    self.count = 0;
                    self.current = Some((stage, names.into_iter()));
                }
                Err(ModelError::StageGone(name)) => {
                    debug!(stage = %name, "stage vanished while listing projects");
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Restores a stage's previous offline setting on drop.
struct OfflineGuard<'a> {
    stage: &'a dyn Stage,
    previous: bool,
}

impl<'a> OfflineGuard<'a> {
    fn engage(stage: &'a dyn Stage) -> Self {
        let previous = stage.set_offline(true);
        Self { stage, previous }
    }
}

impl Drop for OfflineGuard<'_> {
    fn drop(&mut self) {
        self.stage.set_offline(self.previous);
    }
}

/// Expand an indexing record into the document fed to the search index.
///
/// # Errors
///
/// Propagates stage lookups that fail, and returns [`IndexError::DocOrder`]
/// if versions are visited out of order.
pub fn preprocess_project(info: &ProjectIndexingInfo) -> Result<ProjectDocument, IndexError> {
    let stage = info.stage.as_ref();
    let name = normalize_name(&info.name);
    let user = stage.user().to_string();
    let index = stage.index().to_string();

    if stage.kind() == StageKind::Mirror && !stage.is_project_cached(&name)? {
        let mut fields = Map::new();
        fields.insert("name".to_string(), Value::String(name));
        fields.insert("user".to_string(), Value::String(user));
        fields.insert("index".to_string(), Value::String(index));
        return Ok(ProjectDocument { fields, docs: None });
    }

    let _offline = OfflineGuard::engage(stage);
    let versions = sorted_versions(stage.list_versions(&name)?);
    let mut fields = Map::new();
    fields.insert("name".to_string(), Value::String(name.clone()));
    let mut docs: Option<Docs> = None;
    for (position, version) in versions.iter().enumerate() {
        if position == 0 {
            fields.extend(stage.version_data(&name, version)?);
        }
        if !stage.doczip_links(&name, version)?.is_empty() {
            if stage.doczip_exists(&name, version)? {
                fields.insert("doc_version".to_string(), Value::String(version.clone()));
                docs = Some(Docs {
                    stage: stage.name(),
                    project: name.clone(),
                    version: version.clone(),
                });
            }
            break;
        }
        if let Some(found) = &docs {
            return Err(IndexError::DocOrder {
                project: name,
                version: version.clone(),
                doc_version: found.version.clone(),
            });
        }
    }

    fields.insert("user".to_string(), Value::String(user));
    fields.insert("index".to_string(), Value::String(index));
    for key in stage.metadata_keys() {
        if fields.get(&key).is_some_and(is_blank) {
            fields.remove(&key);
        }
    }
    Ok(ProjectDocument { fields, docs })
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty() || text == UNKNOWN_SENTINEL,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// PEP 503 name normalization.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut in_separator = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            if !in_separator {
                normalized.push('-');
                in_separator = true;
            }
        } else {
            normalized.push(ch.to_ascii_lowercase());
            in_separator = false;
        }
    }
    normalized
}

/// Newest first by PEP 440; versions that do not parse go last.
#[must_use]
pub fn sorted_versions(versions: Vec<String>) -> Vec<String> {
    let mut parsed: Vec<(Version, String)> = Vec::with_capacity(versions.len());
    let mut invalid = Vec::new();
    for raw in versions {
        match Version::from_str(&raw) {
            Ok(version) => parsed.push((version, raw)),
            Err(_) => invalid.push(raw),
        }
    }
    parsed.sort_by(|a, b| b.0.cmp(&a.0));
    invalid.sort_by(|a, b| b.cmp(a));
    parsed
        .into_iter()
        .map(|(_, raw)| raw)
        .chain(invalid)
        .collect()
}
