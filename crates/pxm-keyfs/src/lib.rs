//! Transactional key/value substrate for the mirror file store.
//!
//! Records live in a SQLite index (`keyfs.sqlite`, WAL mode); blobs live under
//! `+files/` and are only touched when a write transaction commits. The
//! `blobs` table tracks which blobs each commit made visible, so blob reads
//! follow the same snapshot as record reads.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use rusqlite::{params, Connection, OptionalExtension};

mod error;
mod tx;

pub use error::KeyFsError;
pub use tx::Transaction;

pub const FILES_DIR: &str = "+files";
const INDEX_FILENAME: &str = "keyfs.sqlite";
const META_KEY_SERIAL: &str = "serial";

pub type Result<T> = std::result::Result<T, KeyFsError>;

/// Handle on a keyfs directory. Cheap to clone; every transaction opens its
/// own connection.
#[derive(Debug, Clone)]
pub struct KeyFs {
    root: PathBuf,
}

impl KeyFs {
    /// Open (or initialize) the keyfs rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created or the index
    /// schema cannot be initialized.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let files = root.join(FILES_DIR);
        fs::create_dir_all(&files).map_err(|source| KeyFsError::io(&files, source))?;
        let keyfs = Self { root };
        let conn = keyfs.connection()?;
        init_schema(&conn)?;
        Ok(keyfs)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn files_root(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    /// Start a read-only transaction pinned to the latest committed snapshot.
    pub fn begin_read(&self) -> Result<Transaction> {
        Transaction::begin(self.clone(), false)
    }

    /// Start a write transaction. Only one write transaction runs at a time;
    /// others wait on the index busy timeout.
    pub fn begin_write(&self) -> Result<Transaction> {
        Transaction::begin(self.clone(), true)
    }

    /// Serial of the most recent commit.
    pub fn current_serial(&self) -> Result<u64> {
        read_serial(&self.connection()?)
    }

    pub(crate) fn connection(&self) -> Result<Connection> {
        let path = self.root.join(INDEX_FILENAME);
        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(conn)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS records (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS blobs (
            relpath TEXT PRIMARY KEY,
            size INTEGER NOT NULL,
            serial INTEGER NOT NULL
        );
        "#,
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params![META_KEY_SERIAL, "0"],
    )?;
    Ok(())
}

pub(crate) fn read_serial(conn: &Connection) -> Result<u64> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![META_KEY_SERIAL],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(value) => value
            .parse()
            .map_err(|_| KeyFsError::CorruptSerial(value.clone())),
        None => Ok(0),
    }
}
