//! Sandbox directory management
//!
//! Owns the on-disk area where packaged units and result envelopes live.
//! Every artifact is namespaced by its [`InvocationId`], written once and
//! removed after a single use.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::isolation::Identity;
use crate::types::{InvocationId, ResultEnvelope};

/// Subdirectory holding generated executable units
pub const SCRIPT_DIR: &str = "execute";

/// Subdirectory holding result envelopes
pub const RESULT_DIR: &str = "result";

/// Owner read/write/execute only
pub const PRIVATE_DIR_MODE: u32 = 0o700;

/// Owner read/write only
pub const PRIVATE_FILE_MODE: u32 = 0o600;

const SCRIPT_EXTENSION: &str = "py";
const RESULT_EXTENSION: &str = "result";
const PARTIAL_EXTENSION: &str = "result.part";

/// Errors that occur while managing sandbox artifacts
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create sandbox directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to restrict permissions on {path}: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to transfer ownership of {path} to '{user}': {message}")]
    Ownership {
        path: PathBuf,
        user: String,
        message: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no result envelope for invocation {0}")]
    ResultMissing(InvocationId),

    #[error("malformed result envelope for invocation {id}: {message}")]
    ResultMalformed { id: InvocationId, message: String },
}

/// On-disk area for scripts and result envelopes
///
/// Layout:
///
/// ```text
/// <root>/
///   execute/<id>.py          packaged unit, removed after the child exits
///   result/<id>.result       envelope, removed when read
///   result/<id>.result.part  envelope being written
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    script_dir: PathBuf,
    result_dir: PathBuf,
    owner: Option<Identity>,
}

impl ArtifactStore {
    /// Create (or reuse) the sandbox directory at `root`
    ///
    /// Safe to call concurrently and repeatedly. Existing directories are
    /// never loosened; group or world bits found on them are stripped.
    /// With an `owner`, the root and both subdirectories are handed to it.
    #[instrument(skip_all)]
    pub fn open(root: impl AsRef<Path>, owner: Option<Identity>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        debug!(root = %root.display(), "opening sandbox directory");
        let store = Self {
            script_dir: root.join(SCRIPT_DIR),
            result_dir: root.join(RESULT_DIR),
            root,
            owner,
        };

        for dir in [&store.root, &store.script_dir, &store.result_dir] {
            create_private_dir(dir)?;
        }

        if let Some(ref owner) = store.owner {
            for dir in [&store.root, &store.script_dir, &store.result_dir] {
                transfer_ownership(dir, owner)?;
            }
            debug!(user = %owner.name, "sandbox ownership transferred");
        }

        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    /// Identity that owns artifacts, if ownership transfer is active
    pub fn owner(&self) -> Option<&Identity> {
        self.owner.as_ref()
    }

    /// Mint a fresh invocation id
    pub fn reserve(&self) -> InvocationId {
        InvocationId::new()
    }

    /// Tie the artifacts of `id` to a guard that discards them on drop
    pub fn guard(&self, id: InvocationId) -> ArtifactGuard<'_> {
        ArtifactGuard { store: self, id }
    }

    pub fn script_path(&self, id: &InvocationId) -> PathBuf {
        self.script_dir.join(format!("{id}.{SCRIPT_EXTENSION}"))
    }

    pub fn result_path(&self, id: &InvocationId) -> PathBuf {
        self.result_dir.join(format!("{id}.{RESULT_EXTENSION}"))
    }

    /// Path the packaged unit writes to before renaming onto [`result_path`](Self::result_path)
    pub fn partial_result_path(&self, id: &InvocationId) -> PathBuf {
        self.result_dir.join(format!("{id}.{PARTIAL_EXTENSION}"))
    }

    /// Persist a packaged unit
    ///
    /// The file is created exclusively with owner-only permissions and
    /// handed to the isolation identity, if any.
    #[instrument(skip(self, content))]
    pub async fn write_script(
        &self,
        id: &InvocationId,
        content: &str,
    ) -> Result<PathBuf, StoreError> {
        let path = self.script_path(id);

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(PRIVATE_FILE_MODE);

        let mut file = options.open(&path).await.map_err(io_error(&path))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(io_error(&path))?;
        file.flush().await.map_err(io_error(&path))?;
        drop(file);

        if let Some(ref owner) = self.owner {
            transfer_ownership(&path, owner)?;
        }

        debug!(?path, len = content.len(), "wrote script");
        Ok(path)
    }

    /// Remove a persisted unit. Missing files are not an error.
    #[instrument(skip(self))]
    pub async fn remove_script(&self, id: &InvocationId) -> Result<(), StoreError> {
        let path = self.script_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(?path, "removed script");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Read the envelope of `id` and delete it
    ///
    /// The file is removed before decoding, so a malformed envelope is
    /// consumed as well.
    #[instrument(skip(self))]
    pub async fn read_and_consume_result(
        &self,
        id: &InvocationId,
    ) -> Result<ResultEnvelope, StoreError> {
        let path = self.result_path(id);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::ResultMissing(*id));
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        tokio::fs::remove_file(&path)
            .await
            .map_err(io_error(&path))?;
        debug!(?path, len = bytes.len(), "consumed result envelope");

        ResultEnvelope::from_slice(&bytes).map_err(|e| StoreError::ResultMalformed {
            id: *id,
            message: e.to_string(),
        })
    }

    /// Remove every artifact of `id`, ignoring files that do not exist
    ///
    /// Synchronous so that it can run from `Drop`. Returns how many files
    /// were removed.
    pub fn discard(&self, id: &InvocationId) -> usize {
        let mut removed = 0;
        for path in [
            self.script_path(id),
            self.result_path(id),
            self.partial_result_path(id),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(?path, error = %e, "failed to discard artifact"),
            }
        }
        if removed > 0 {
            debug!(%id, removed, "discarded leftover artifacts");
        }
        removed
    }
}

/// Discards the artifacts of one invocation when dropped
///
/// Runs on every exit path of an invocation, including a cancelled future.
#[derive(Debug)]
pub struct ArtifactGuard<'a> {
    store: &'a ArtifactStore,
    id: InvocationId,
}

impl ArtifactGuard<'_> {
    pub fn id(&self) -> InvocationId {
        self.id
    }
}

impl Drop for ArtifactGuard<'_> {
    fn drop(&mut self) {
        self.store.discard(&self.id);
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

    // `recursive` tolerates a directory that already exists or that a
    // concurrent caller creates first.
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(PRIVATE_DIR_MODE)
        .create(path)
        .map_err(|source| StoreError::CreateDir {
            path: path.to_path_buf(),
            source,
        })?;

    let metadata = std::fs::metadata(path).map_err(|source| StoreError::CreateDir {
        path: path.to_path_buf(),
        source,
    })?;

    let mode = metadata.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        let tightened = mode & PRIVATE_DIR_MODE;
        warn!(
            path = %path.display(),
            mode = format_args!("{mode:o}"),
            tightened = format_args!("{tightened:o}"),
            "sandbox directory was accessible to other users, restricting"
        );
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(tightened)).map_err(
            |source| StoreError::Permissions {
                path: path.to_path_buf(),
                source,
            },
        )?;
    }

    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> Result<(), StoreError> {
    std::fs::create_dir_all(path).map_err(|source| StoreError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn transfer_ownership(path: &Path, owner: &Identity) -> Result<(), StoreError> {
    use nix::unistd::{Gid, Uid, chown};

    chown(
        path,
        Some(Uid::from_raw(owner.uid)),
        Some(Gid::from_raw(owner.gid)),
    )
    .map_err(|e| StoreError::Ownership {
        path: path.to_path_buf(),
        user: owner.name.clone(),
        message: e.to_string(),
    })
}

#[cfg(not(unix))]
fn transfer_ownership(_path: &Path, _owner: &Identity) -> Result<(), StoreError> {
    Ok(())
}
