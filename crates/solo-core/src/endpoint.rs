//! The named local rendezvous point shared by every instance.
//!
//! An [`Endpoint`] maps a name onto a Unix socket path and a sibling guard
//! lock path inside a runtime directory. Two processes that resolve the same
//! name in the same directory will find each other.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use solo_config::EndpointConfig;
use tracing::{debug, warn};

/// Process-family-wide endpoint name.
pub const ENDPOINT_NAME: &str = solo_config::DEFAULT_ENDPOINT_NAME;

/// Errors around claiming the endpoint.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("invalid endpoint name {0:?}")]
    InvalidName(String),

    #[error("endpoint '{name}' is held by another instance (lock {lock})")]
    AlreadyRunning { name: String, lock: PathBuf },

    #[error("failed to acquire endpoint lock at {path}: {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to bind endpoint socket at {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A resolved endpoint: name plus the filesystem locations derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    name: String,
    dir: PathBuf,
}

impl Endpoint {
    /// Create an endpoint for `name` inside `dir`.
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Result<Self, EndpointError> {
        let name = name.into();
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(EndpointError::InvalidName(name));
        }
        Ok(Self {
            name,
            dir: dir.into(),
        })
    }

    /// Resolve the endpoint described by configuration.
    pub fn from_config(config: &EndpointConfig) -> Result<Self, EndpointError> {
        let dir = config.dir.clone().unwrap_or_else(runtime_dir);
        Self::new(config.name.clone(), dir)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the Unix socket peers connect to.
    pub fn socket_path(&self) -> PathBuf {
        self.dir.join(format!("{}.sock", self.name))
    }

    /// Path of the advisory lock held by the resident instance.
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{}.lock", self.name))
    }

    /// Become the only process allowed to bind this endpoint.
    ///
    /// Takes a non-blocking exclusive lock on [`lock_path`](Self::lock_path).
    /// The kernel drops the lock when its holder exits, so a socket file
    /// found while we hold it was left behind by a dead instance and is
    /// removed.
    pub fn claim(&self) -> Result<EndpointClaim, EndpointError> {
        let lock_path = self.lock_path();
        let lock_err = |source| EndpointError::Lock {
            path: lock_path.clone(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(lock_err)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(lock_err)?;

        if let Err(e) = file.try_lock_exclusive() {
            let contended = e.kind() == std::io::ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error();
            return Err(if contended {
                EndpointError::AlreadyRunning {
                    name: self.name.clone(),
                    lock: self.lock_path(),
                }
            } else {
                lock_err(e)
            });
        }

        // Informational only; the lock itself is what matters.
        file.set_len(0).map_err(lock_err)?;
        writeln!(file, "{}", std::process::id()).map_err(lock_err)?;

        let socket_path = self.socket_path();
        if socket_path.exists() {
            warn!(path = %socket_path.display(), "Removing stale endpoint socket");
            std::fs::remove_file(&socket_path).map_err(|source| EndpointError::Bind {
                path: socket_path.clone(),
                source,
            })?;
        }

        debug!(endpoint = %self, lock = %lock_path.display(), "Endpoint claimed");
        Ok(EndpointClaim {
            socket_path,
            _lock: file,
        })
    }
}

/// Exclusive ownership of an endpoint. Dropping it removes the socket file
/// and releases the lock.
#[derive(Debug)]
pub struct EndpointClaim {
    socket_path: PathBuf,
    _lock: File,
}

impl EndpointClaim {
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for EndpointClaim {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.socket_path.display(), error = %e, "Failed to remove endpoint socket");
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            name: ENDPOINT_NAME.to_string(),
            dir: runtime_dir(),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// `$XDG_RUNTIME_DIR` when set and non-empty, otherwise the system temp directory.
pub fn runtime_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}
