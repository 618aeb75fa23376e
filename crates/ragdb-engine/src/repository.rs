//! On-disk collection layout under `<data_dir>/collections/<name>/`:
//!
//! - `info.json`: `CollectionMeta`
//! - `chunks.json`: chunk table, embeddings included
//! - `vectors.json`: brute-force vectors
//! - `lance/`: approximate backend table
//!
//! The lexical index is not persisted; it is rebuilt from `chunks.json`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use ragdb_core::collection::{BackendKind, CollectionMeta};
use ragdb_core::config::EngineConfig;
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::VectorStore;
use ragdb_core::types::DocumentChunk;

use crate::collection::Collection;

pub const COLLECTIONS_DIR: &str = "collections";
pub const BACKUPS_DIR: &str = "backups";
pub const INFO_FILE: &str = "info.json";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const VECTORS_FILE: &str = "vectors.json";

pub struct CollectionRepository {
    data_dir: PathBuf,
}

fn check_name(name: &str) -> Result<()> {
    let bad = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if bad {
        return Err(Error::InvalidConfig(format!("invalid collection name '{name}'")));
    }
    Ok(())
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> Result<u64> {
    let mut files = 0;
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| Error::Storage(format!("walking {}: {e}", from.display())))?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| Error::Storage(e.to_string()))?;
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            files += 1;
        }
    }
    Ok(files)
}

impl CollectionRepository {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(cfg.data_dir())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn root(&self) -> PathBuf {
        self.data_dir.join(COLLECTIONS_DIR)
    }

    pub fn collection_dir(&self, name: &str) -> PathBuf {
        self.root().join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        check_name(name).is_ok() && self.collection_dir(name).join(INFO_FILE).is_file()
    }

    pub fn create(&self, meta: CollectionMeta) -> Result<Collection> {
        check_name(&meta.name)?;
        if self.exists(&meta.name) {
            return Err(Error::InvalidConfig(format!("collection '{}' already exists", meta.name)));
        }
        let dir = self.collection_dir(&meta.name);
        fs::create_dir_all(&dir)?;
        let collection = Collection::open(meta, &dir)?;
        self.save(&collection)?;
        tracing::info!(collection = %collection.name(), backend = %collection.meta().backend.kind(), "collection created");
        Ok(collection)
    }

    pub fn load(&self, name: &str) -> Result<Collection> {
        check_name(name)?;
        let dir = self.collection_dir(name);
        let info = dir.join(INFO_FILE);
        if !info.is_file() {
            return Err(Error::NotFound(format!("collection '{name}'")));
        }
        let meta: CollectionMeta = serde_json::from_slice(&fs::read(&info)?)?;
        let chunks: Vec<DocumentChunk> = match fs::read(dir.join(CHUNKS_FILE)) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let kind = meta.backend.kind();
        let collection = Collection::open(meta, &dir)?;
        let store = collection.store();
        let vectors = dir.join(VECTORS_FILE);
        store.load(&vectors)?;
        let restored = collection.restore_chunks(chunks)?;
        if kind == BackendKind::BruteForce && !vectors.is_file() && restored > 0 {
            let replayed = collection.reload_vectors()?;
            tracing::warn!(collection = name, replayed, "vectors.json missing, vectors rebuilt from chunks");
        }
        tracing::debug!(collection = name, chunks = restored, vectors = store.backend().len(), "collection loaded");
        Ok(collection)
    }

    pub fn save(&self, collection: &Collection) -> Result<()> {
        let meta = collection.meta();
        check_name(&meta.name)?;
        let dir = self.collection_dir(&meta.name);
        fs::create_dir_all(&dir)?;
        write_json_atomic(&dir.join(INFO_FILE), &meta)?;
        write_json_atomic(&dir.join(CHUNKS_FILE), &collection.chunks())?;
        collection.store().save(&dir.join(VECTORS_FILE))?;
        Ok(())
    }

    /// Names of directories holding an `info.json`, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let root = self.root();
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if entry.path().join(INFO_FILE).is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        check_name(name)?;
        let dir = self.collection_dir(name);
        if !dir.is_dir() {
            return Err(Error::NotFound(format!("collection '{name}'")));
        }
        fs::remove_dir_all(&dir)?;
        tracing::info!(collection = name, "collection deleted");
        Ok(())
    }

    /// Copy the collection directory into `<dest>/<name>-<timestamp>`;
    /// `dest` defaults to `<data_dir>/backups`.
    pub fn backup(&self, name: &str, dest: Option<&Path>) -> Result<PathBuf> {
        check_name(name)?;
        let src = self.collection_dir(name);
        if !src.is_dir() {
            return Err(Error::NotFound(format!("collection '{name}'")));
        }
        let parent = dest.map_or_else(|| self.data_dir.join(BACKUPS_DIR), Path::to_path_buf);
        let stamp = Utc::now().format("%Y%m%d-%H%M%S%.3f");
        let target = parent.join(format!("{name}-{stamp}"));
        let files = copy_tree(&src, &target)?;
        tracing::info!(collection = name, files, path = %target.display(), "backup written");
        Ok(target)
    }
}
