use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    io::{ErrorKind, Write},
    path::{Component, Path, PathBuf},
};

use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::{read_serial, KeyFs, KeyFsError, Result, META_KEY_SERIAL};

/// A unit of work over the keyfs.
///
/// Reads observe the snapshot taken at `begin` plus this transaction's own
/// pending writes. Record and blob changes are buffered until [`commit`];
/// dropping the transaction without committing discards them.
///
/// [`commit`]: Transaction::commit
pub struct Transaction {
    keyfs: KeyFs,
    conn: rusqlite::Connection,
    write: bool,
    serial: u64,
    records: BTreeMap<String, Option<Value>>,
    files: BTreeMap<String, Option<Vec<u8>>>,
    finished: bool,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("root", &self.keyfs.root())
            .field("write", &self.write)
            .field("serial", &self.serial)
            .field("pending_records", &self.records.len())
            .field("pending_files", &self.files.len())
            .finish()
    }
}

impl Transaction {
    pub(crate) fn begin(keyfs: KeyFs, write: bool) -> Result<Self> {
        let conn = keyfs.connection()?;
        conn.execute_batch(if write { "BEGIN IMMEDIATE" } else { "BEGIN" })?;
        // The first read pins the WAL snapshot for the rest of the transaction.
        let serial = read_serial(&conn)?;
        debug!(serial, write, "keyfs transaction started");
        Ok(Self {
            keyfs,
            conn,
            write,
            serial,
            records: BTreeMap::new(),
            files: BTreeMap::new(),
            finished: false,
        })
    }

    #[must_use]
    pub fn is_write(&self) -> bool {
        self.write
    }

    /// Commit serial visible to this transaction.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    #[must_use]
    pub fn keyfs(&self) -> &KeyFs {
        &self.keyfs
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(pending) = self.records.get(key) {
            return Ok(pending.clone());
        }
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM records WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|text| {
            serde_json::from_str(&text).map_err(|source| KeyFsError::Record {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.ensure_writable()?;
        self.records.insert(key.to_string(), Some(value));
        Ok(())
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.ensure_writable()?;
        self.records.insert(key.to_string(), None);
        Ok(())
    }

    /// Keys starting with `prefix`, in sorted order, as seen by this
    /// transaction.
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM records WHERE substr(key, 1, length(?1)) = ?1")?;
        let mut keys = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        for (key, value) in self.records.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if value.is_some() {
                keys.insert(key.clone());
            } else {
                keys.remove(key);
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// Location of `relpath` under `+files/`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyFsError::InvalidRelpath`] unless every component of
    /// `relpath` is a plain file or directory name.
    pub fn io_file_path(&self, relpath: &str) -> Result<PathBuf> {
        Ok(self.keyfs.files_root().join(checked_relpath(relpath)?))
    }

    /// Whether the blob is visible to this transaction. Invalid relpaths and
    /// index failures read as absent.
    #[must_use]
    pub fn io_file_exists(&self, relpath: &str) -> bool {
        if let Some(pending) = self.files.get(relpath) {
            return pending.is_some();
        }
        match self.committed_blob_path(relpath) {
            Ok(path) => path.is_some_and(|path| path.is_file()),
            Err(err) => {
                warn!(relpath, %err, "blob lookup failed");
                false
            }
        }
    }

    pub fn io_file_get(&self, relpath: &str) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.files.get(relpath) {
            return Ok(pending.clone());
        }
        let Some(path) = self.committed_blob_path(relpath)? else {
            return Ok(None);
        };
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(KeyFsError::io(&path, err)),
        }
    }

    pub fn io_file_size(&self, relpath: &str) -> Result<Option<u64>> {
        if let Some(pending) = self.files.get(relpath) {
            return Ok(pending.as_ref().map(|bytes| bytes.len() as u64));
        }
        let Some(path) = self.committed_blob_path(relpath)? else {
            return Ok(None);
        };
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(KeyFsError::io(&path, err)),
        }
    }

    pub fn io_file_set(&mut self, relpath: &str, content: Vec<u8>) -> Result<()> {
        self.ensure_writable()?;
        checked_relpath(relpath)?;
        self.files.insert(relpath.to_string(), Some(content));
        Ok(())
    }

    pub fn io_file_delete(&mut self, relpath: &str) -> Result<()> {
        self.ensure_writable()?;
        checked_relpath(relpath)?;
        self.files.insert(relpath.to_string(), None);
        Ok(())
    }

    /// Path of a blob committed as of this transaction's snapshot.
    fn committed_blob_path(&self, relpath: &str) -> Result<Option<PathBuf>> {
        let path = self.io_file_path(relpath)?;
        let committed = self
            .conn
            .query_row(
                "SELECT 1 FROM blobs WHERE relpath = ?1",
                params![relpath],
                |_| Ok(()),
            )
            .optional()?;
        Ok(committed.map(|()| path))
    }

    /// Commit pending changes and return the resulting serial.
    ///
    /// # Errors
    ///
    /// Returns an error if the index update or blob persistence fails; the
    /// index is left untouched when staging blobs fails.
    pub fn commit(mut self) -> Result<u64> {
        self.commit_in_place()
    }

    /// Discard every pending change.
    pub fn rollback(mut self) -> Result<()> {
        self.rollback_in_place()
    }

    /// Commit this transaction and continue in a fresh write transaction.
    pub fn restart_as_write(&mut self) -> Result<()> {
        if self.write {
            self.commit_in_place()?;
        } else {
            self.rollback_in_place()?;
        }
        *self = self.keyfs.begin_write()?;
        Ok(())
    }

    /// Drop pending state and continue in a fresh read transaction.
    pub fn restart_as_read(&mut self) -> Result<()> {
        self.rollback_in_place()?;
        *self = self.keyfs.begin_read()?;
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.write {
            Ok(())
        } else {
            Err(KeyFsError::ReadOnly)
        }
    }

    fn commit_in_place(&mut self) -> Result<u64> {
        if self.records.is_empty() && self.files.is_empty() {
            self.conn.execute_batch("COMMIT")?;
            self.finished = true;
            return Ok(self.serial);
        }

        let staged = self.stage_files()?;
        let serial = self.serial + 1;
        for (key, value) in &self.records {
            match value {
                Some(value) => {
                    self.conn.execute(
                        "INSERT OR REPLACE INTO records(key, value) VALUES (?1, ?2)",
                        params![key, value.to_string()],
                    )?;
                }
                None => {
                    self.conn
                        .execute("DELETE FROM records WHERE key = ?1", params![key])?;
                }
            }
        }
        for (relpath, content) in &self.files {
            match content {
                Some(bytes) => {
                    self.conn.execute(
                        "INSERT OR REPLACE INTO blobs(relpath, size, serial) VALUES (?1, ?2, ?3)",
                        params![relpath, bytes.len() as i64, serial as i64],
                    )?;
                }
                None => {
                    self.conn
                        .execute("DELETE FROM blobs WHERE relpath = ?1", params![relpath])?;
                }
            }
        }
        self.conn.execute(
            "UPDATE meta SET value = ?1 WHERE key = ?2",
            params![serial.to_string(), META_KEY_SERIAL],
        )?;

        // New blobs stay invisible to other snapshots until their rows commit.
        for (tmp, dest) in staged {
            tmp.persist(&dest)
                .map_err(|err| KeyFsError::io(&dest, err.error))?;
        }
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;

        for (relpath, content) in &self.files {
            if content.is_none() {
                let Ok(path) = self.io_file_path(relpath) else {
                    continue;
                };
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => warn!(path = %path.display(), %err, "failed to remove blob"),
                }
            }
        }
        debug!(
            serial,
            records = self.records.len(),
            files = self.files.len(),
            "keyfs commit"
        );
        self.serial = serial;
        self.records.clear();
        self.files.clear();
        Ok(serial)
    }

    fn stage_files(&self) -> Result<Vec<(NamedTempFile, PathBuf)>> {
        let mut staged = Vec::new();
        for (relpath, content) in &self.files {
            let Some(bytes) = content else {
                continue;
            };
            let dest = self.io_file_path(relpath)?;
            let parent = dest.parent().unwrap_or_else(|| Path::new("."));
            fs::create_dir_all(parent).map_err(|err| KeyFsError::io(parent, err))?;
            let mut tmp =
                NamedTempFile::new_in(parent).map_err(|err| KeyFsError::io(parent, err))?;
            tmp.write_all(bytes)
                .map_err(|err| KeyFsError::io(tmp.path(), err))?;
            staged.push((tmp, dest));
        }
        Ok(staged)
    }

    fn rollback_in_place(&mut self) -> Result<()> {
        self.records.clear();
        self.files.clear();
        if !self.finished {
            self.finished = true;
            self.conn.execute_batch("ROLLBACK")?;
            debug!(serial = self.serial, "keyfs rollback");
        }
        Ok(())
    }
}

/// `relpath` as a path whose components are all plain names, so joining it
/// under `+files/` can never leave that directory.
fn checked_relpath(relpath: &str) -> Result<&Path> {
    let path = Path::new(relpath);
    let plain = !relpath.is_empty()
        && !relpath.contains(['\\', '\0'])
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if plain {
        Ok(path)
    } else {
        Err(KeyFsError::InvalidRelpath(relpath.to_string()))
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}
