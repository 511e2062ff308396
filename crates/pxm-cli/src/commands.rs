use std::{fs, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use pxm_index::{iter_projects, preprocess_project, JsonModel};
use pxm_store::{Config, FileStore, HttpClient, Link};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::cli::CommandKind;

/// What a command hands back for printing.
#[derive(Debug)]
pub enum Outcome {
    Message { message: String, details: Value },
    Bytes(Vec<u8>),
    Lines(Vec<Value>),
}

pub fn execute(config: &Config, command: &CommandKind) -> Result<Outcome> {
    match command {
        CommandKind::Fetch { url } => fetch(config, url),
        CommandKind::Upload { target, file } => upload(config, target, file),
        CommandKind::Cat { relpath } => cat(config, relpath),
        CommandKind::Rm { relpath } => remove(config, relpath),
        CommandKind::Ls => list(config),
        CommandKind::Index { model } => index(model),
    }
}

fn fetch(config: &Config, url: &str) -> Result<Outcome> {
    let link = Link::parse(url)?;
    let store = FileStore::open(config)?;
    let http = HttpClient::new(*config.network())?;
    let mut tx = store.keyfs().begin_write()?;
    let mut entry = store.maplink(&mut tx, &link)?;
    if let Err(err) = entry.cache_remote_file(&mut tx, &http) {
        tx.rollback()?;
        return Err(err.into());
    }
    let size = entry.file_size(&tx)?.unwrap_or_default();
    let serial = tx.commit()?;
    info!(relpath = %entry.relpath(), size, serial, "fetch committed");
    Ok(Outcome::Message {
        message: format!("cached {} ({size} bytes)", entry.relpath()),
        details: json!({
            "relpath": entry.relpath(),
            "size": size,
            "hash_spec": entry.hash_spec(),
            "serial": serial,
        }),
    })
}

fn upload(config: &Config, target: &str, file: &Path) -> Result<Outcome> {
    let (user, index) = target
        .split_once('/')
        .filter(|(user, index)| !user.is_empty() && !index.is_empty() && !index.contains('/'))
        .ok_or_else(|| anyhow!("expected USER/INDEX, got {target:?}"))?;
    let basename = file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", file.display()))?;
    let content =
        fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let store = FileStore::open(config)?;
    let mut tx = store.keyfs().begin_write()?;
    let entry = store.store(&mut tx, user, index, basename, content)?;
    let serial = tx.commit()?;
    Ok(Outcome::Message {
        message: format!("stored {}", entry.relpath()),
        details: json!({
            "relpath": entry.relpath(),
            "hash_spec": entry.hash_spec(),
            "serial": serial,
        }),
    })
}

fn cat(config: &Config, relpath: &str) -> Result<Outcome> {
    let store = FileStore::open(config)?;
    let tx = store.keyfs().begin_read()?;
    let entry = store
        .get_file_entry(&tx, relpath)?
        .ok_or_else(|| anyhow!("no entry recorded at {relpath}"))?;
    match entry.file_get_content(&tx)? {
        Some(content) => Ok(Outcome::Bytes(content)),
        None => bail!("{relpath} is recorded but not cached"),
    }
}

fn remove(config: &Config, relpath: &str) -> Result<Outcome> {
    let store = FileStore::open(config)?;
    let mut tx = store.keyfs().begin_write()?;
    let Some(mut entry) = store.get_file_entry(&tx, relpath)? else {
        bail!("no entry recorded at {relpath}");
    };
    entry.delete(&mut tx)?;
    let serial = tx.commit()?;
    Ok(Outcome::Message {
        message: format!("removed {relpath}"),
        details: json!({ "relpath": relpath, "serial": serial }),
    })
}

fn list(config: &Config) -> Result<Outcome> {
    let store = FileStore::open(config)?;
    let tx = store.keyfs().begin_read()?;
    let mut rows = Vec::new();
    let mut lines = Vec::new();
    for relpath in store.iter_entries(&tx)? {
        let Some(entry) = store.get_file_entry(&tx, &relpath)? else {
            continue;
        };
        let size = entry.file_size(&tx)?;
        lines.push(match size {
            Some(size) => format!("{relpath}  {size}"),
            None => format!("{relpath}  -"),
        });
        rows.push(json!({
            "relpath": relpath,
            "size": size,
            "hash_spec": entry.hash_spec(),
            "url": entry.url(),
        }));
    }
    let message = if lines.is_empty() {
        "no entries".to_string()
    } else {
        lines.join("\n")
    };
    Ok(Outcome::Message {
        message,
        details: json!({ "entries": rows }),
    })
}

fn index(model: &Path) -> Result<Outcome> {
    let model = JsonModel::load(model)?;
    let mut documents = Vec::new();
    for item in iter_projects(&model) {
        let info = match item {
            Ok(info) => info,
            Err(err) => {
                warn!(error = %err, "skipping stage");
                continue;
            }
        };
        let document = preprocess_project(&info)
            .with_context(|| format!("failed to index {} in {}", info.name, info.indexname()))?;
        documents.push(document.into_value());
    }
    Ok(Outcome::Lines(documents))
}
