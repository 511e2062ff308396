//! Search-indexing feed over the users/stages/projects of a package index.

mod indexing;
mod json_model;
mod model;

pub use indexing::{
    iter_projects, normalize_name, preprocess_project, sorted_versions, Docs, IndexError,
    ProjectDocument, ProjectIndexingInfo, ProjectIter,
};
pub use json_model::JsonModel;
pub use model::{Model, ModelError, Stage, StageKind, DEFAULT_METADATA_KEYS};
