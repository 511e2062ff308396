use std::path::{Path, PathBuf};

/// Errors surfaced by the keyfs substrate.
#[derive(Debug, thiserror::Error)]
pub enum KeyFsError {
    #[error("[PXM100] write attempted in a read-only transaction")]
    ReadOnly,
    #[error("[PXM101] keyfs index error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("[PXM102] keyfs i/o failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("[PXM103] keyfs record {key} is not valid json: {source}")]
    Record {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("[PXM104] keyfs serial is corrupt: '{0}'")]
    CorruptSerial(String),
    #[error("[PXM105] relpath '{0}' does not name a file under +files")]
    InvalidRelpath(String),
}

impl KeyFsError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
