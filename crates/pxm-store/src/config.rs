use std::{collections::HashMap, env, path::PathBuf, time::Duration};

use anyhow::{anyhow, Context, Result};
use dirs_next::{data_dir, home_dir};

use crate::hash::HashAlgo;

pub(crate) const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    #[must_use]
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    #[must_use]
    pub fn flag_is_enabled(&self, key: &str) -> bool {
        matches!(self.vars.get(key).map(String::as_str), Some("1"))
    }

    #[must_use]
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) serverdir: ServerDir,
    pub(crate) store: StoreConfig,
    pub(crate) network: NetworkConfig,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if a variable holds an invalid value or no server
    /// directory can be resolved.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    /// # Errors
    /// Returns an error if a variable holds an invalid value or no server
    /// directory can be resolved.
    pub fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let serverdir = match snapshot.var("PXM_SERVERDIR") {
            Some(path) if !path.is_empty() => ServerDir {
                path: absolutize(PathBuf::from(path))?,
                source: "PXM_SERVERDIR",
            },
            _ => default_serverdir()?,
        };
        let hash_algo = match snapshot.var("PXM_HASH_TYPE") {
            Some(value) => value
                .parse::<HashAlgo>()
                .with_context(|| format!("PXM_HASH_TYPE={value} is not a supported digest"))?,
            None => HashAlgo::Sha256,
        };
        let fetch_timeout = match snapshot.var("PXM_FETCH_TIMEOUT") {
            Some(value) => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("PXM_FETCH_TIMEOUT={value} is not a number"))?;
                if secs == 0 {
                    return Err(anyhow!("PXM_FETCH_TIMEOUT must be positive"));
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_FETCH_TIMEOUT,
        };
        Ok(Self {
            serverdir,
            store: StoreConfig { hash_algo },
            network: NetworkConfig {
                offline: snapshot.flag_is_enabled("PXM_OFFLINE"),
                fetch_timeout,
            },
        })
    }

    #[must_use]
    pub fn serverdir(&self) -> &ServerDir {
        &self.serverdir
    }

    #[must_use]
    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    #[must_use]
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Replace the resolved server directory (command-line override).
    #[must_use]
    pub fn with_serverdir(mut self, path: PathBuf) -> Self {
        self.serverdir = ServerDir {
            path,
            source: "--serverdir",
        };
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServerDir {
    pub path: PathBuf,
    pub source: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub hash_algo: HashAlgo,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hash_algo: HashAlgo::Sha256,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkConfig {
    pub offline: bool,
    pub fetch_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            offline: false,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

fn default_serverdir() -> Result<ServerDir> {
    if let Some(base) = data_dir() {
        return Ok(ServerDir {
            path: base.join("pxm"),
            source: "data dir",
        });
    }
    let home = home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
    Ok(ServerDir {
        path: home.join(".pxm"),
        source: "~/.pxm",
    })
}

fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_overrides_from_snapshot() -> Result<()> {
        let snapshot = EnvSnapshot::testing(&[
            ("PXM_SERVERDIR", "/srv/pxm"),
            ("PXM_HASH_TYPE", "md5"),
            ("PXM_FETCH_TIMEOUT", "5"),
            ("PXM_OFFLINE", "1"),
        ]);
        let config = Config::from_snapshot(&snapshot)?;
        assert_eq!(config.serverdir().path, PathBuf::from("/srv/pxm"));
        assert_eq!(config.serverdir().source, "PXM_SERVERDIR");
        assert_eq!(config.store().hash_algo, HashAlgo::Md5);
        assert_eq!(config.network().fetch_timeout, Duration::from_secs(5));
        assert!(config.network().offline);
        Ok(())
    }

    #[test]
    fn defaults_without_overrides() -> Result<()> {
        let config = Config::from_snapshot(&EnvSnapshot::testing(&[(
            "PXM_SERVERDIR",
            "/srv/pxm",
        )]))?;
        assert_eq!(config.store().hash_algo, HashAlgo::Sha256);
        assert_eq!(config.network().fetch_timeout, DEFAULT_FETCH_TIMEOUT);
        assert!(!config.network().offline);
        Ok(())
    }

    #[test]
    fn rejects_invalid_values() {
        for pairs in [
            [("PXM_SERVERDIR", "/srv/pxm"), ("PXM_HASH_TYPE", "crc32")],
            [("PXM_SERVERDIR", "/srv/pxm"), ("PXM_FETCH_TIMEOUT", "soon")],
            [("PXM_SERVERDIR", "/srv/pxm"), ("PXM_FETCH_TIMEOUT", "0")],
        ] {
            assert!(
                Config::from_snapshot(&EnvSnapshot::testing(&pairs)).is_err(),
                "expected {pairs:?} to be rejected"
            );
        }
    }

    #[test]
    fn relative_serverdir_is_absolutized() -> Result<()> {
        let config =
            Config::from_snapshot(&EnvSnapshot::testing(&[("PXM_SERVERDIR", "relative/dir")]))?;
        assert!(config.serverdir().path.is_absolute());
        assert!(config.serverdir().path.ends_with("relative/dir"));
        Ok(())
    }
}
