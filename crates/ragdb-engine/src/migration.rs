use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;

use ragdb_core::cancel::CancellationToken;
use ragdb_core::collection::{BackendConfig, BackendKind, CollectionMeta};
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::VectorStore;
use ragdb_core::types::VectorData;
use ragdb_hybrid::HybridStore;
use ragdb_vector::backend::approximate_path;
use ragdb_vector::VectorBackend;

use crate::collection::{store_config, Collection};
use crate::repository::{CollectionRepository, VECTORS_FILE};

const REPLAY_BATCH: usize = 100;
const VERIFY_K: usize = 5;

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub create_backup: bool,
    /// Parent directory of the backup; `<data_dir>/backups` when `None`.
    pub backup_path: Option<PathBuf>,
    pub verify: bool,
    pub delete_old_data: bool,
    pub cancel: Option<CancellationToken>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self { create_backup: true, backup_path: None, verify: true, delete_old_data: false, cancel: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub migrated: usize,
    pub from: BackendKind,
    pub to: BackendKind,
    pub backup_path: Option<PathBuf>,
    pub verified: bool,
    pub deleted_old_data: bool,
}

/// Moves a collection's vectors from its current backend to another one.
pub struct MigrationService<'a> {
    repo: &'a CollectionRepository,
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::with_draw_target(Some(len as u64), ProgressDrawTarget::stderr());
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} vectors ({percent}%)")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Remote targets without a collection name take the local collection's name.
fn resolve_target(target: BackendConfig, meta: &CollectionMeta) -> BackendConfig {
    match target {
        BackendConfig::Qdrant(mut q) if q.collection_name.trim().is_empty() => {
            q.collection_name.clone_from(&meta.name);
            BackendConfig::Qdrant(q)
        }
        other => other,
    }
}

impl<'a> MigrationService<'a> {
    pub fn new(repo: &'a CollectionRepository) -> Self {
        Self { repo }
    }

    /// Load `name`, migrate it, and return the migrated collection.
    pub fn migrate_named(
        &self,
        name: &str,
        target: BackendConfig,
        options: &MigrationOptions,
    ) -> Result<(Collection, MigrationReport)> {
        let collection = self.repo.load(name)?;
        let report = self.migrate(&collection, target, options)?;
        Ok((collection, report))
    }

    pub fn migrate(&self, collection: &Collection, target: BackendConfig, options: &MigrationOptions) -> Result<MigrationReport> {
        let old_meta = collection.meta();
        let name = old_meta.name.clone();
        let from = old_meta.backend.kind();
        let target = resolve_target(target, &old_meta);
        let to = target.kind();
        if from == to {
            return Err(Error::Migration(format!("collection '{name}' already uses the {to} backend")));
        }
        tracing::info!(collection = %name, %from, %to, "starting migration");

        let backup_path = if options.create_backup {
            match self.repo.backup(&name, options.backup_path.as_deref()) {
                Ok(path) => Some(path),
                Err(err) => {
                    tracing::warn!(collection = %name, error = %err, "backup failed, continuing without one");
                    None
                }
            }
        } else {
            None
        };

        let data = collection.vector_data();
        tracing::info!(collection = %name, vectors = data.len(), "extracted vectors");

        let dir = self.repo.collection_dir(&name);
        let mut new_meta = old_meta.clone().with_backend(target);
        new_meta.touch();
        let fresh_target_dir = match &new_meta.backend {
            BackendConfig::Approximate { path } => {
                let p = approximate_path(path.as_deref(), &dir);
                (!p.exists()).then_some(p)
            }
            _ => None,
        };
        let new_store = Arc::new(
            HybridStore::open(&store_config(&new_meta, &dir))
                .map_err(|e| Error::Migration(format!("opening {to} backend: {e}")))?,
        );

        let stale = new_store.backend().len();
        if stale > 0 {
            tracing::warn!(collection = %name, %to, stale, "target backend already holds vectors, clearing it");
            if let Err(err) = new_store.clear() {
                release_target(&new_store, fresh_target_dir.as_ref());
                return Err(Error::Migration(format!("clearing {to} backend: {err}")));
            }
        }

        if let Err(err) = replay(&data, &new_store, options.cancel.as_ref()) {
            release_target(&new_store, fresh_target_dir.as_ref());
            return Err(err);
        }

        let old_store = collection.swap_store(Arc::clone(&new_store));
        collection.set_meta(new_meta);

        let restore = |err: Error| -> Error {
            collection.swap_store(Arc::clone(&old_store));
            collection.set_meta(old_meta.clone());
            release_target(&new_store, fresh_target_dir.as_ref());
            tracing::error!(collection = %name, error = %err, "migration rolled back");
            err
        };

        let verified = if options.verify {
            match verify(&new_store, &data) {
                Ok(checked) => checked,
                Err(err) => return Err(restore(err)),
            }
        } else {
            false
        };

        if let Err(err) = self.repo.save(collection) {
            let err = restore(Error::Migration(format!("saving migrated collection: {err}")));
            if let Err(again) = self.repo.save(collection) {
                tracing::error!(collection = %name, error = %again, "rewriting previous collection state failed");
            }
            return Err(err);
        }

        let deleted_old_data = options.delete_old_data && delete_old_data(&old_store, &old_meta.backend, &dir);
        if let Err(err) = old_store.close() {
            tracing::warn!(collection = %name, error = %err, "closing previous backend failed");
        }

        tracing::info!(collection = %name, migrated = data.len(), %from, %to, verified, "migration finished");
        Ok(MigrationReport { migrated: data.len(), from, to, backup_path, verified, deleted_old_data })
    }
}

/// Writes go out `REPLAY_BATCH` items at a time; cancellation is checked
/// before every item.
fn replay(data: &[VectorData], store: &HybridStore, cancel: Option<&CancellationToken>) -> Result<()> {
    let pb = progress_bar(data.len());
    let mut start = 0;
    for i in 0..data.len() {
        if let Some(token) = cancel {
            if let Err(err) = token.check() {
                pb.abandon();
                return Err(err);
            }
        }
        if i - start == REPLAY_BATCH {
            write_batch(store, &data[start..i], &pb)?;
            tracing::info!(done = i, total = data.len(), "migration progress");
            start = i;
        }
    }
    write_batch(store, &data[start..], &pb)?;
    pb.finish_and_clear();
    tracing::info!(total = data.len(), "all vectors transferred");
    Ok(())
}

fn write_batch(store: &HybridStore, batch: &[VectorData], pb: &ProgressBar) -> Result<()> {
    let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
        return Ok(());
    };
    if let Err(err) = store.add_documents(batch) {
        pb.abandon();
        return Err(Error::Migration(format!("failed to add vectors {}..{}: {err}", first.id, last.id)));
    }
    pb.inc(batch.len() as u64);
    Ok(())
}

/// Search for the first migrated vector; it must come back among the top hits.
/// Returns `false` when there was nothing to check.
fn verify(store: &HybridStore, data: &[VectorData]) -> Result<bool> {
    let Some(sample) = data.first() else {
        tracing::warn!("no vectors migrated, verification skipped");
        return Ok(false);
    };
    let hits = store.search(&sample.vector, VERIFY_K);
    if hits.iter().any(|h| h.id == sample.id) {
        tracing::info!(id = %sample.id, "verification found sample vector");
        Ok(true)
    } else {
        Err(Error::Migration(format!("verification could not find vector {}", sample.id)))
    }
}

fn release_target(store: &HybridStore, fresh_dir: Option<&PathBuf>) {
    if let Err(err) = store.close() {
        tracing::warn!(error = %err, "closing target backend failed");
    }
    if let Some(dir) = fresh_dir {
        if let Err(err) = fs::remove_dir_all(dir) {
            tracing::warn!(path = %dir.display(), error = %err, "removing partial target data failed");
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)?;
    } else if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

fn delete_old_data(old: &HybridStore, backend: &BackendConfig, dir: &Path) -> bool {
    let outcome = match (backend, old.backend()) {
        (BackendConfig::BruteForce, _) => remove_if_present(&dir.join(VECTORS_FILE)),
        (BackendConfig::Approximate { path }, _) => {
            old.close().and_then(|()| remove_if_present(&approximate_path(path.as_deref(), dir)))
        }
        (BackendConfig::Qdrant(_), VectorBackend::Qdrant(remote)) => remote.delete_collection(),
        (BackendConfig::Qdrant(_), _) => Ok(()),
    };
    match outcome {
        Ok(()) => {
            tracing::info!(backend = %backend.kind(), "old backend data deleted");
            true
        }
        Err(err) => {
            tracing::warn!(backend = %backend.kind(), error = %err, "deleting old backend data failed");
            false
        }
    }
}
