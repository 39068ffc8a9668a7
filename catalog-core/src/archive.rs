//! Archive object store.
//!
//! Objects are zstd-compressed files under `<root>/<database guid>/`. Their
//! identities are derived from (database guid, job id), so tooling can check
//! that job X produced checkpoint object Y without another lookup. Writes go
//! through a temp file and a rename, so an object is either absent or whole.

use crate::utils::errors::{CatalogError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const OBJECT_EXT: &str = "zst";

/// `<guid>_checkpoint_<job>`; zero padding keeps lexical order equal to
/// creation order for a database.
pub fn checkpoint_object_id(database_guid: &str, job_id: i64) -> String {
    format!("{database_guid}_checkpoint_{job_id:012}")
}

/// Explicit (non job-phase) checkpoints carry the captured end time so that
/// several of them can hang off the same cycle-opening job.
pub fn explicit_checkpoint_object_id(database_guid: &str, job_id: i64, end_time: i64) -> String {
    format!("{}_{end_time}", checkpoint_object_id(database_guid, job_id))
}

pub fn job_metadata_object_id(database_guid: &str, job_id: i64) -> String {
    format!("{database_guid}_jobmeta_{job_id:012}")
}

pub fn is_checkpoint_object(object_id: &str) -> bool {
    object_id.contains("_checkpoint_")
}

#[derive(Debug, Clone)]
pub struct ArchiveStore {
    root: PathBuf,
    compression_level: i32,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>, compression_level: i32) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            compression_level,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, object_id: &str) -> Result<PathBuf> {
        if object_id.is_empty() || object_id.contains(['/', '\\']) || object_id.starts_with('.') {
            return Err(CatalogError::InvalidInput(format!("bad object id '{object_id}'")));
        }
        let shard = object_id
            .split_once('_')
            .map(|(guid, _)| guid)
            .unwrap_or("misc");
        Ok(self
            .root
            .join(shard)
            .join(format!("{object_id}.{OBJECT_EXT}")))
    }

    /// Store `bytes` under `object_id`, replacing any previous content.
    /// Returns the compressed size.
    pub fn put(&self, object_id: &str, bytes: &[u8]) -> Result<u64> {
        let compressed = zstd::encode_all(bytes, self.compression_level)?;
        let path = self.object_path(object_id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension(format!("{OBJECT_EXT}.tmp"));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&compressed)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(compressed.len() as u64)
    }

    pub fn put_file(&self, object_id: &str, src: &Path) -> Result<u64> {
        let bytes = fs::read(src)?;
        self.put(object_id, &bytes)
    }

    pub fn get(&self, object_id: &str) -> Result<Vec<u8>> {
        let path = self.object_path(object_id)?;
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CatalogError::ObjectNotFound(object_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(zstd::decode_all(file)?)
    }

    /// Decompress an object into a file at `dest`.
    pub fn restore_to(&self, object_id: &str, dest: &Path) -> Result<()> {
        let bytes = self.get(object_id)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, bytes)?;
        Ok(())
    }

    pub fn exists(&self, object_id: &str) -> bool {
        self.object_path(object_id)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Remove an object; absent objects are not an error.
    pub fn delete(&self, object_id: &str) -> Result<bool> {
        let path = self.object_path(object_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All object ids in the store, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| {
                CatalogError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if let Some(id) = name.strip_suffix(&format!(".{OBJECT_EXT}")) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn list_for_database(&self, database_guid: &str) -> Result<Vec<String>> {
        let prefix = format!("{database_guid}_");
        Ok(self
            .list()?
            .into_iter()
            .filter(|id| id.starts_with(&prefix))
            .collect())
    }
}
