//! Repo lifecycle and read/write mediation.
//!
//! The manager owns one handle per registered repo under a reader-writer
//! lock. A handle is a capability rather than an open connection: it carries
//! the repo's registration, its cached [`RepoMetadata`], and the store path,
//! and readers open short-lived read-only connections through it. Reloading
//! after an upload re-reads both, so subsequent readers observe the
//! post-commit state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use index_store::{Layout, RepoMeta, RepoMetadata, RepoSource, Store};

use crate::config::ConfigRepo;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("repo {0:?} already exists")]
    AlreadyExists(String),

    #[error("repo {0:?} not found")]
    NotFound(String),

    #[error("repo {0:?} is registered from configuration and cannot be modified")]
    ConfigRepoImmutable(String),

    #[error(transparent)]
    Store(#[from] index_store::Error),
}

pub struct RepoHandle {
    meta: RwLock<RepoMeta>,
    metadata: RwLock<RepoMetadata>,
    db_path: PathBuf,
}

impl RepoHandle {
    fn open(meta: RepoMeta, db_path: PathBuf) -> Self {
        let metadata = load_metadata(&db_path);
        Self {
            meta: RwLock::new(meta),
            metadata: RwLock::new(metadata),
            db_path,
        }
    }

    pub fn meta(&self) -> RepoMeta {
        self.meta.read().unwrap().clone()
    }

    pub fn metadata(&self) -> RepoMetadata {
        self.metadata.read().unwrap().clone()
    }

    pub fn source(&self) -> RepoSource {
        self.meta.read().unwrap().source
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Open a fresh read-only store. Callers move it onto the blocking pool
    /// and drop it at request end.
    pub fn open_read(&self) -> index_store::Result<Store> {
        Store::open_read(&self.db_path)
    }

    fn refresh(&self, meta: Option<RepoMeta>) {
        if let Some(meta) = meta {
            *self.meta.write().unwrap() = meta;
        }
        *self.metadata.write().unwrap() = load_metadata(&self.db_path);
    }
}

/// Metadata loading is best-effort: a repo whose store is missing or broken
/// still lists, with defaulted fields.
fn load_metadata(db_path: &PathBuf) -> RepoMetadata {
    match Store::open_read(db_path) {
        Ok(store) => store.load_metadata(),
        Err(err) => {
            tracing::debug!(path = %db_path.display(), %err, "store not readable; using default metadata");
            RepoMetadata::default()
        }
    }
}

pub struct RepoManager {
    layout: Layout,
    repos: RwLock<HashMap<String, Arc<RepoHandle>>>,
}

impl RepoManager {
    /// Build the handle map from the data directory's uploaded repos plus
    /// the configured read-only ones.
    pub fn new(layout: Layout, config_repos: &[ConfigRepo]) -> anyhow::Result<Self> {
        let mut repos = HashMap::new();

        for meta in layout.list_repos()? {
            let db_path = layout.db_path(&meta.id);
            repos.insert(meta.id.clone(), Arc::new(RepoHandle::open(meta, db_path)));
        }

        for config_repo in config_repos {
            let db_path = config_repo.path.join(".ckb").join("ckb.db");
            if !db_path.is_file() {
                tracing::warn!(
                    repo = config_repo.id,
                    path = %db_path.display(),
                    "config repo has no index database yet",
                );
            }
            let now = Utc::now();
            let meta = RepoMeta {
                id: config_repo.id.clone(),
                name: if config_repo.name.is_empty() {
                    config_repo.id.clone()
                } else {
                    config_repo.name.clone()
                },
                description: config_repo.description.clone(),
                created_at: now,
                updated_at: now,
                last_upload_at: None,
                source: RepoSource::Config,
            };
            repos.insert(
                config_repo.id.clone(),
                Arc::new(RepoHandle::open(meta, db_path)),
            );
        }

        tracing::info!(repos = repos.len(), "repo manager initialized");
        Ok(Self {
            layout,
            repos: RwLock::new(repos),
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn get_repo(&self, id: &str) -> Option<Arc<RepoHandle>> {
        self.repos.read().unwrap().get(id).cloned()
    }

    pub fn list_repos(&self) -> Vec<Arc<RepoHandle>> {
        let mut handles: Vec<_> = self.repos.read().unwrap().values().cloned().collect();
        handles.sort_by(|a, b| a.meta().id.cmp(&b.meta().id));
        handles
    }

    pub fn get_repo_commit(&self, id: &str) -> Option<String> {
        self.get_repo(id).map(|handle| handle.metadata().commit)
    }

    pub fn is_uploaded_repo(&self, id: &str) -> bool {
        self.get_repo(id)
            .map(|handle| handle.source() == RepoSource::Uploaded)
            .unwrap_or(false)
    }

    pub fn create_uploaded_repo(
        &self,
        id: &str,
        name: &str,
        description: &str,
    ) -> Result<Arc<RepoHandle>, ManagerError> {
        let mut repos = self.repos.write().unwrap();
        if repos.contains_key(id) || self.layout.repo_exists(id) {
            return Err(ManagerError::AlreadyExists(id.to_string()));
        }

        let meta = RepoMeta::new_uploaded(id, name, description);
        self.layout.create_repo(&meta)?;
        let handle = Arc::new(RepoHandle::open(meta, self.layout.db_path(id)));
        repos.insert(id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Delete an uploaded repo and its on-disk subtree. Config repos are
    /// refused.
    pub fn remove_repo(&self, id: &str) -> Result<(), ManagerError> {
        let mut repos = self.repos.write().unwrap();
        let handle = repos.get(id).ok_or_else(|| ManagerError::NotFound(id.to_string()))?;
        if handle.source() == RepoSource::Config {
            return Err(ManagerError::ConfigRepoImmutable(id.to_string()));
        }
        repos.remove(id);
        self.layout.delete_repo(id)?;
        Ok(())
    }

    /// Record a completed upload on the repo's durable registration.
    pub fn note_upload(&self, id: &str) -> Result<(), ManagerError> {
        let mut meta = self
            .layout
            .load_meta(id)
            .map_err(|_| ManagerError::NotFound(id.to_string()))?;
        let now = Utc::now();
        meta.updated_at = now;
        meta.last_upload_at = Some(now);
        self.layout.save_meta(&meta)?;
        Ok(())
    }

    /// Re-read a repo's registration and cached metadata so readers observe
    /// freshly ingested data. Safe to call for a repo that has no handle
    /// yet, as on the first upload into an auto-created repo.
    pub fn reload_repo(&self, id: &str) -> Result<(), ManagerError> {
        let existing = self.get_repo(id);
        match existing {
            Some(handle) => {
                let meta = self.layout.load_meta(id).ok();
                handle.refresh(meta);
                Ok(())
            }
            None => {
                let meta = self
                    .layout
                    .load_meta(id)
                    .map_err(|_| ManagerError::NotFound(id.to_string()))?;
                let handle = Arc::new(RepoHandle::open(meta, self.layout.db_path(id)));
                self.repos
                    .write()
                    .unwrap()
                    .insert(id.to_string(), handle);
                Ok(())
            }
        }
    }
}
