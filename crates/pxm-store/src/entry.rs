use std::{
    collections::BTreeMap,
    hash::{Hash, Hasher},
    path::PathBuf,
};

use pxm_keyfs::{KeyFsError, Transaction};
use serde::{Deserialize, Serialize};
use time::{macros::format_description, OffsetDateTime};

use crate::hash::{HashAlgo, HashSpec};

/// keyfs key namespace for file entry records.
pub const FILES_PREFIX: &str = "+files/";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FileRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) hash_spec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) eggfragment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) content_length: Option<String>,
}

/// Handle on one cached artifact: its metadata record plus its blob.
///
/// Every read and write goes through the caller's [`Transaction`]; nothing is
/// visible to other transactions until that transaction commits. Two entries
/// are equal when their `relpath`s are.
#[derive(Debug, Clone)]
pub struct FileEntry {
    relpath: String,
    pub(crate) record: FileRecord,
    pub(crate) default_algo: HashAlgo,
}

impl PartialEq for FileEntry {
    fn eq(&self, other: &Self) -> bool {
        self.relpath == other.relpath
    }
}

impl Eq for FileEntry {}

impl Hash for FileEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.relpath.hash(state);
    }
}

impl FileEntry {
    pub(crate) fn new(relpath: String, default_algo: HashAlgo) -> Self {
        Self {
            relpath,
            record: FileRecord::default(),
            default_algo,
        }
    }

    pub(crate) fn load(
        tx: &Transaction,
        relpath: &str,
        default_algo: HashAlgo,
    ) -> Result<Option<Self>, KeyFsError> {
        let key = record_key(relpath);
        let Some(value) = tx.get(&key)? else {
            return Ok(None);
        };
        let record = serde_json::from_value(value).map_err(|source| KeyFsError::Record {
            key: key.clone(),
            source,
        })?;
        Ok(Some(Self {
            relpath: relpath.to_string(),
            record,
            default_algo,
        }))
    }

    pub(crate) fn persist(&self, tx: &mut Transaction) -> Result<(), KeyFsError> {
        let key = record_key(&self.relpath);
        let value = serde_json::to_value(&self.record)
            .map_err(|source| KeyFsError::Record { key: key.clone(), source })?;
        tx.set(&key, value)
    }

    #[must_use]
    pub fn relpath(&self) -> &str {
        &self.relpath
    }

    #[must_use]
    pub fn basename(&self) -> &str {
        self.relpath
            .rsplit_once('/')
            .map_or(self.relpath.as_str(), |(_, name)| name)
    }

    #[must_use]
    pub fn hash_spec(&self) -> Option<&str> {
        self.record.hash_spec.as_deref()
    }

    /// The declared hash, if it parses.
    #[must_use]
    pub fn hash(&self) -> Option<HashSpec> {
        self.hash_spec().and_then(|raw| raw.parse().ok())
    }

    /// Algorithm of the declared hash, falling back to the store default.
    #[must_use]
    pub fn hash_algo(&self) -> HashAlgo {
        self.hash().map_or(self.default_algo, |spec| spec.algo())
    }

    #[must_use]
    pub fn hash_value(&self) -> Option<String> {
        self.hash().map(|spec| spec.value().to_string())
    }

    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.record.url.as_deref()
    }

    #[must_use]
    pub fn eggfragment(&self) -> Option<&str> {
        self.record.eggfragment.as_deref()
    }

    #[must_use]
    pub fn last_modified(&self) -> Option<&str> {
        self.record.last_modified.as_deref()
    }

    pub fn set_hash_spec(
        &mut self,
        tx: &mut Transaction,
        spec: Option<&HashSpec>,
    ) -> Result<(), KeyFsError> {
        self.record.hash_spec = spec.map(ToString::to_string);
        self.persist(tx)
    }

    pub fn set_url(&mut self, tx: &mut Transaction, url: &str) -> Result<(), KeyFsError> {
        self.record.url = Some(url.to_string());
        self.persist(tx)
    }

    pub fn set_last_modified(
        &mut self,
        tx: &mut Transaction,
        last_modified: &str,
    ) -> Result<(), KeyFsError> {
        self.record.last_modified = Some(last_modified.to_string());
        self.persist(tx)
    }

    /// Location the blob occupies once committed.
    pub fn file_path(&self, tx: &Transaction) -> Result<PathBuf, KeyFsError> {
        tx.io_file_path(&self.relpath)
    }

    #[must_use]
    pub fn file_exists(&self, tx: &Transaction) -> bool {
        tx.io_file_exists(&self.relpath)
    }

    pub fn file_get_content(&self, tx: &Transaction) -> Result<Option<Vec<u8>>, KeyFsError> {
        tx.io_file_get(&self.relpath)
    }

    pub fn file_size(&self, tx: &Transaction) -> Result<Option<u64>, KeyFsError> {
        tx.io_file_size(&self.relpath)
    }

    pub fn file_set_content(
        &mut self,
        tx: &mut Transaction,
        content: Vec<u8>,
    ) -> Result<(), KeyFsError> {
        self.set_content(tx, content, None)
    }

    pub(crate) fn set_content(
        &mut self,
        tx: &mut Transaction,
        content: Vec<u8>,
        last_modified: Option<String>,
    ) -> Result<(), KeyFsError> {
        self.record.size = Some(content.len() as u64);
        self.record.last_modified = Some(last_modified.unwrap_or_else(http_date_now));
        tx.io_file_set(&self.relpath, content)?;
        self.persist(tx)
    }

    /// Mark the blob absent; the metadata record stays, minus the size
    /// fields that described the blob.
    pub fn file_delete(&mut self, tx: &mut Transaction) -> Result<(), KeyFsError> {
        tx.io_file_delete(&self.relpath)?;
        self.record.size = None;
        self.record.content_length = None;
        self.persist(tx)
    }

    /// Remove both the metadata record and the blob.
    pub fn delete(&mut self, tx: &mut Transaction) -> Result<(), KeyFsError> {
        tx.delete(&record_key(&self.relpath))?;
        tx.io_file_delete(&self.relpath)
    }

    /// Response headers to serve the cached blob with.
    #[must_use]
    pub fn gethttpheaders(&self) -> BTreeMap<&'static str, String> {
        let mut headers = BTreeMap::new();
        let content_type = self.record.content_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(self.basename())
                .first_or_octet_stream()
                .to_string()
        });
        headers.insert("content-type", content_type);
        if let Some(length) = self
            .record
            .content_length
            .clone()
            .or_else(|| self.record.size.map(|size| size.to_string()))
        {
            headers.insert("content-length", length);
        }
        if let Some(last_modified) = &self.record.last_modified {
            headers.insert("last-modified", last_modified.clone());
        }
        headers
    }
}

pub(crate) fn record_key(relpath: &str) -> String {
    format!("{FILES_PREFIX}{relpath}")
}

pub(crate) fn http_date_now() -> String {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_default()
}
