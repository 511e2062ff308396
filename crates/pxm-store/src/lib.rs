//! Mirror file store: deterministic cache paths for upstream artifacts,
//! verified fetches, and transactional blob storage on top of `pxm-keyfs`.

mod config;
mod entry;
mod fetch;
mod filestore;
mod hash;
mod link;
mod path;

pub use config::{Config, EnvSnapshot, NetworkConfig, ServerDir, StoreConfig};
pub use entry::{FileEntry, FILES_PREFIX};
pub use fetch::{FetchError, HttpClient, HttpGet, RemoteResponse, ResponseHeaders};
pub use filestore::FileStore;
pub use hash::{HashAlgo, HashSpec, Hasher};
pub use link::{Link, LinkError};
pub use path::{derive_relpath, hashdir_relpath, upload_relpath};
pub use pxm_keyfs::{KeyFs, KeyFsError, Transaction};
