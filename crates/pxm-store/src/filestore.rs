use pxm_keyfs::{KeyFs, KeyFsError, Transaction};
use tracing::{debug, info};

use crate::{
    config::{Config, StoreConfig},
    entry::{FileEntry, FILES_PREFIX},
    hash::HashAlgo,
    link::Link,
    path::{derive_relpath, is_plain_segment, upload_relpath},
};

/// Factory and registry for [`FileEntry`] handles.
#[derive(Debug, Clone)]
pub struct FileStore {
    keyfs: KeyFs,
    hash_algo: HashAlgo,
}

impl FileStore {
    #[must_use]
    pub fn new(keyfs: KeyFs, config: StoreConfig) -> Self {
        Self {
            keyfs,
            hash_algo: config.hash_algo,
        }
    }

    /// Open the keyfs under the configured server directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyfs cannot be initialized.
    pub fn open(config: &Config) -> Result<Self, KeyFsError> {
        let keyfs = KeyFs::open(config.serverdir().path.clone())?;
        Ok(Self::new(keyfs, *config.store()))
    }

    #[must_use]
    pub fn keyfs(&self) -> &KeyFs {
        &self.keyfs
    }

    /// Digest used for content ingested through [`FileStore::store`].
    #[must_use]
    pub fn hash_algo(&self) -> HashAlgo {
        self.hash_algo
    }

    /// Map an upstream link onto its cache entry without fetching anything.
    ///
    /// The record is created (or refreshed) only when `tx` is writable; in a
    /// read transaction the returned entry simply reflects the derived state.
    pub fn maplink(&self, tx: &mut Transaction, link: &Link) -> Result<FileEntry, KeyFsError> {
        let relpath = derive_relpath(link);
        let (mut entry, mut dirty) = match FileEntry::load(tx, &relpath, self.hash_algo)? {
            Some(entry) => (entry, false),
            None => (FileEntry::new(relpath, self.hash_algo), true),
        };
        if let Some(spec) = link.hash_spec() {
            let spec = spec.to_string();
            if entry.record.hash_spec.as_deref() != Some(spec.as_str()) {
                entry.record.hash_spec = Some(spec);
                dirty = true;
            }
        }
        if let Some(egg) = link.eggfragment() {
            if entry.record.eggfragment.as_deref() != Some(egg) {
                entry.record.eggfragment = Some(egg.to_string());
                dirty = true;
            }
        }
        if entry.record.url.is_none() {
            entry.record.url = Some(link.url_nofrag());
            dirty = true;
        }
        if dirty && tx.is_write() {
            entry.persist(tx)?;
        }
        debug!(relpath = %entry.relpath(), url = %link, "maplink");
        Ok(entry)
    }

    /// Re-hydrate an entry from its record, if one is visible to `tx`.
    pub fn get_file_entry(
        &self,
        tx: &Transaction,
        relpath: &str,
    ) -> Result<Option<FileEntry>, KeyFsError> {
        FileEntry::load(tx, relpath, self.hash_algo)
    }

    /// Ingest uploaded `content` for `user/index`, hashing it with the store
    /// algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`KeyFsError::InvalidRelpath`] when `user`, `index` or
    /// `basename` is not a plain path component.
    pub fn store(
        &self,
        tx: &mut Transaction,
        user: &str,
        index: &str,
        basename: &str,
        content: Vec<u8>,
    ) -> Result<FileEntry, KeyFsError> {
        if ![user, index, basename].into_iter().all(is_plain_segment) {
            return Err(KeyFsError::InvalidRelpath(format!("{user}/{index}/{basename}")));
        }
        let spec = self.hash_algo.spec_for(&content);
        let relpath = upload_relpath(user, index, &spec, basename);
        let mut entry = match FileEntry::load(tx, &relpath, self.hash_algo)? {
            Some(entry) => entry,
            None => FileEntry::new(relpath, self.hash_algo),
        };
        entry.record.hash_spec = Some(spec.to_string());
        let size = content.len();
        entry.set_content(tx, content, None)?;
        info!(relpath = %entry.relpath(), size, "stored upload");
        Ok(entry)
    }

    /// Relpaths of every entry record visible to `tx`.
    pub fn iter_entries(&self, tx: &Transaction) -> Result<Vec<String>, KeyFsError> {
        Ok(tx
            .keys_with_prefix(FILES_PREFIX)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(FILES_PREFIX).map(ToOwned::to_owned))
            .collect())
    }
}
