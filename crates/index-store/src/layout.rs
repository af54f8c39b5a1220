//! On-disk layout of the server data directory:
//!
//! ```text
//! data_dir/
//!   uploads/<uuid>.scip           scratch files for in-flight uploads
//!   repos/<sanitized_id>/
//!       meta.json                 RepoMeta
//!       ckb.db                    per-repo embedded store
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const REPOS_DIR: &str = "repos";
const UPLOADS_DIR: &str = "uploads";
const META_FILE: &str = "meta.json";
const DB_FILE: &str = "ckb.db";

pub const MAX_REPO_ID_LEN: usize = 256;

/// Origin of a repo's registration. Only `uploaded` repos may be mutated or
/// deleted through the API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoSource {
    Config,
    Uploaded,
}

/// Durable repo registration, persisted as `meta.json`. Evolves by field
/// addition only; unknown fields are ignored on read.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RepoMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_upload_at: Option<DateTime<Utc>>,
    pub source: RepoSource,
}

impl RepoMeta {
    pub fn new_uploaded(id: &str, name: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: if name.is_empty() { id } else { name }.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
            last_upload_at: None,
            source: RepoSource::Uploaded,
        }
    }
}

/// Validate a repo id: at most 256 characters of `[A-Za-z0-9/._-]`, with no
/// leading or trailing slash and no empty path segment.
pub fn validate_repo_id(id: &str) -> Result<()> {
    let invalid = |reason| Error::InvalidRepoId {
        id: id.to_string(),
        reason,
    };

    if id.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if id.len() > MAX_REPO_ID_LEN {
        return Err(invalid("longer than 256 characters"));
    }
    if id.starts_with('/') || id.ends_with('/') {
        return Err(invalid("must not begin or end with '/'"));
    }
    if id.contains("//") {
        return Err(invalid("must not contain empty path segments"));
    }
    if id
        .chars()
        .any(|c| !c.is_ascii_alphanumeric() && !matches!(c, '/' | '.' | '_' | '-'))
    {
        return Err(invalid("contains characters outside [A-Za-z0-9/._-]"));
    }
    Ok(())
}

/// Directory name for a repo id. Slashes collapse to dashes, which is
/// unambiguous enough because the authoritative id lives in `meta.json`.
pub fn sanitize_id(id: &str) -> String {
    id.replace('/', "-")
}

/// Handle on the server data directory.
#[derive(Clone, Debug)]
pub struct Layout {
    data_dir: PathBuf,
}

impl Layout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Create the directory skeleton if it is missing.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(self.repos_root())?;
        fs::create_dir_all(self.uploads_root())?;
        Ok(())
    }

    pub fn repos_root(&self) -> PathBuf {
        self.data_dir.join(REPOS_DIR)
    }

    pub fn uploads_root(&self) -> PathBuf {
        self.data_dir.join(UPLOADS_DIR)
    }

    pub fn repo_dir(&self, id: &str) -> PathBuf {
        self.repos_root().join(sanitize_id(id))
    }

    pub fn db_path(&self, id: &str) -> PathBuf {
        self.repo_dir(id).join(DB_FILE)
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.repo_dir(id).join(META_FILE)
    }

    pub fn repo_exists(&self, id: &str) -> bool {
        self.meta_path(id).is_file()
    }

    /// Register a new repo directory with its `meta.json`. The repo must not
    /// already exist.
    pub fn create_repo(&self, meta: &RepoMeta) -> Result<()> {
        validate_repo_id(&meta.id)?;
        if self.repo_exists(&meta.id) {
            return Err(Error::RepoExists(meta.id.clone()));
        }
        fs::create_dir_all(self.repo_dir(&meta.id))?;
        self.save_meta(meta)
    }

    /// Remove the repo's whole subtree.
    pub fn delete_repo(&self, id: &str) -> Result<()> {
        let dir = self.repo_dir(id);
        if !dir.is_dir() {
            return Err(Error::RepoNotFound(id.to_string()));
        }
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    pub fn load_meta(&self, id: &str) -> Result<RepoMeta> {
        let path = self.meta_path(id);
        if !path.is_file() {
            return Err(Error::RepoNotFound(id.to_string()));
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save_meta(&self, meta: &RepoMeta) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(meta)?;
        fs::write(self.meta_path(&meta.id), bytes)?;
        Ok(())
    }

    /// Enumerate every registered repo by reading each `meta.json`.
    /// Directories without a readable meta file are skipped with a warning.
    pub fn list_repos(&self) -> Result<Vec<RepoMeta>> {
        let mut repos = Vec::new();
        let root = self.repos_root();
        if !root.is_dir() {
            return Ok(repos);
        }
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let meta_path = entry.path().join(META_FILE);
            match fs::read(&meta_path).map_err(Error::from).and_then(|bytes| {
                serde_json::from_slice::<RepoMeta>(&bytes).map_err(Error::from)
            }) {
                Ok(meta) => repos.push(meta),
                Err(err) => {
                    tracing::warn!(path = %meta_path.display(), %err, "skipping unreadable repo meta");
                }
            }
        }
        repos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(repos)
    }

    /// Allocate a scratch file for an in-flight upload, returning its open
    /// handle and path under `uploads/`.
    pub fn create_upload_file(&self) -> Result<(fs::File, PathBuf)> {
        fs::create_dir_all(self.uploads_root())?;
        let path = self
            .uploads_root()
            .join(format!("{}.scip", uuid::Uuid::new_v4()));
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok((file, path))
    }

    /// Delete a scratch upload file. The path must resolve under `uploads/`;
    /// anything else is refused rather than deleted.
    pub fn cleanup_upload(&self, path: &Path) -> Result<()> {
        let root = self.uploads_root().canonicalize()?;
        let target = path.canonicalize()?;
        if !target.starts_with(&root) {
            return Err(Error::UploadPathOutsideRoot(path.to_path_buf()));
        }
        fs::remove_file(target)?;
        Ok(())
    }

    /// Sweep scratch files older than `max_age`, e.g. left behind by a crash
    /// mid-upload. Returns how many files were removed.
    pub fn cleanup_old_uploads(&self, max_age: Duration) -> Result<usize> {
        let root = self.uploads_root();
        if !root.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let modified = entry.metadata()?.modified()?;
            let age = modified.elapsed().unwrap_or_default();
            if age > max_age {
                if let Err(err) = fs::remove_file(entry.path()) {
                    tracing::warn!(path = %entry.path().display(), %err, "failed to sweep stale upload");
                } else {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn layout() -> (tempfile::TempDir, Layout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.ensure().unwrap();
        (dir, layout)
    }

    #[test]
    fn repo_id_validation() {
        for ok in ["acme/core", "a", "x.y_z-1", "deep/ly/nest.ed"] {
            validate_repo_id(ok).unwrap();
        }
        for bad in [
            "",
            "/acme",
            "acme/",
            "acme//core",
            "acme core",
            "acme\\core",
            "ünicode",
        ] {
            assert!(validate_repo_id(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(validate_repo_id(&"a".repeat(257)).is_err());
        validate_repo_id(&"a".repeat(256)).unwrap();
    }

    #[test]
    fn sanitizes_slashes() {
        assert_eq!(sanitize_id("acme/core"), "acme-core");
        assert_eq!(sanitize_id("plain"), "plain");
    }

    #[test]
    fn create_list_delete_round_trip() {
        let (_dir, layout) = layout();

        let meta = RepoMeta::new_uploaded("acme/core", "core", "the core");
        layout.create_repo(&meta).unwrap();
        assert!(layout.repo_exists("acme/core"));
        assert!(matches!(
            layout.create_repo(&meta),
            Err(Error::RepoExists(_))
        ));

        let listed = layout.list_repos().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "acme/core");
        assert_eq!(listed[0].name, "core");
        assert_eq!(listed[0].source, RepoSource::Uploaded);

        layout.delete_repo("acme/core").unwrap();
        assert!(!layout.repo_exists("acme/core"));
        assert!(matches!(
            layout.delete_repo("acme/core"),
            Err(Error::RepoNotFound(_))
        ));
    }

    #[test]
    fn cleanup_refuses_paths_outside_uploads() {
        let (dir, layout) = layout();

        let (mut file, path) = layout.create_upload_file().unwrap();
        file.write_all(b"scratch").unwrap();
        drop(file);
        layout.cleanup_upload(&path).unwrap();
        assert!(!path.exists());

        let outside = dir.path().join("meta.json");
        fs::write(&outside, b"{}").unwrap();
        assert!(matches!(
            layout.cleanup_upload(&outside),
            Err(Error::UploadPathOutsideRoot(_))
        ));
        assert!(outside.exists());

        // Traversal back out of uploads/ is likewise refused.
        let sneaky = layout.uploads_root().join("../meta.json");
        assert!(matches!(
            layout.cleanup_upload(&sneaky),
            Err(Error::UploadPathOutsideRoot(_))
        ));
        assert!(outside.exists());
    }

    #[test]
    fn sweeps_only_stale_uploads() {
        let (_dir, layout) = layout();

        let (_f, fresh) = layout.create_upload_file().unwrap();
        assert_eq!(
            layout.cleanup_old_uploads(Duration::from_secs(3600)).unwrap(),
            0
        );
        assert!(fresh.exists());

        // With a zero max age everything qualifies as stale.
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(layout.cleanup_old_uploads(Duration::ZERO).unwrap(), 1);
        assert!(!fresh.exists());
    }
}
