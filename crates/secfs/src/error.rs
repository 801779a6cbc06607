//! Error types for the secret filesystem.
//!
//! Two layers: [`StoreError`] is what a container store reports, [`FsError`]
//! is what the filesystem surfaces. Only `NotFound` and `AlreadyExists` cross
//! the boundary as filesystem kinds; every other store failure is carried
//! verbatim in [`FsError::Store`].

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Store operation names, used for timeout reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StoreOp {
    Create,
    Get,
    Update,
    Delete,
    Rename,
}

/// Errors reported by a [`ContainerStore`](crate::store::ContainerStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The container does not exist.
    #[error("container not found: {0}")]
    NotFound(String),

    /// The container already exists.
    #[error("container already exists: {0}")]
    AlreadyExists(String),

    /// The container exists but does not carry the secfs ownership tag.
    #[error("not managed with secfs: {0}")]
    NotManaged(String),

    /// The request did not complete within the configured timeout.
    #[error("{op} timed out after {timeout:?}")]
    Timeout { op: StoreOp, timeout: Duration },

    /// Any other backend failure (transport, serialization, ...).
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Filesystem error type.
#[derive(Debug, Error)]
pub enum FsError {
    /// Malformed path (not 2 or 3 non-empty segments).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Container or key not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Container or key already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Expected a container.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a key.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Container still holds keys.
    #[error("directory not empty: {0}")]
    NotEmpty(String),

    /// Handle was already closed.
    #[error("file already closed: {0}")]
    Closed(String),

    /// Handle is not open for writing.
    #[error("bad file descriptor: {0}")]
    BadFileDescriptor(String),

    /// Metadata changes are not supported.
    #[error("read-only file system: {0}")]
    ReadOnlyFilesystem(String),

    /// Seek target before the start of the value or beyond `u64::MAX`.
    #[error("invalid seek to position {0}")]
    InvalidSeek(i128),

    /// Write would end past the largest value a secret can hold.
    #[error("write at offset {offset} of {len} bytes exceeds the {max} byte value limit")]
    InvalidOffset { offset: u64, len: usize, max: usize },

    /// Moving between namespaces is not allowed.
    #[error("move a secret between namespaces is not allowed: {from} -> {to}")]
    CrossNamespaceMove { from: String, to: String },

    /// A container can only be renamed to another container.
    #[error("convert a secret to a file is not allowed: {from} -> {to}")]
    ConvertDenied { from: String, to: String },

    /// The destination was written but the source could not be removed.
    /// Both keys now exist.
    #[error("partial rename {from} -> {to}: source retained: {source}")]
    PartialRename {
        from: String,
        to: String,
        #[source]
        source: Box<FsError>,
    },

    /// Store failure passed through unchanged.
    #[error(transparent)]
    Store(StoreError),
}

impl FsError {
    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a NotEmpty error.
    pub fn not_empty(path: impl Into<String>) -> Self {
        Self::NotEmpty(path.into())
    }

    /// Create a Closed error.
    pub fn closed(path: impl Into<String>) -> Self {
        Self::Closed(path.into())
    }

    /// Create a BadFileDescriptor error.
    pub fn bad_fd(path: impl Into<String>) -> Self {
        Self::BadFileDescriptor(path.into())
    }

    /// Create a ReadOnlyFilesystem error.
    pub fn read_only(path: impl Into<String>) -> Self {
        Self::ReadOnlyFilesystem(path.into())
    }

    /// Map a store error onto the filesystem taxonomy, reporting `path`.
    pub fn from_store(path: impl Into<String>, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound(path.into()),
            StoreError::AlreadyExists(_) => Self::AlreadyExists(path.into()),
            other => Self::Store(other),
        }
    }

    /// POSIX code name for this error, if one applies.
    ///
    /// Policy errors and opaque store failures have none.
    pub fn errno(&self) -> Option<&'static str> {
        match self {
            FsError::InvalidPath(_) | FsError::InvalidSeek(_) => Some("EINVAL"),
            FsError::InvalidOffset { .. } => Some("EFBIG"),
            FsError::NotFound(_) => Some("ENOENT"),
            FsError::AlreadyExists(_) => Some("EEXIST"),
            FsError::NotADirectory(_) => Some("ENOTDIR"),
            FsError::IsADirectory(_) => Some("EISDIR"),
            FsError::NotEmpty(_) => Some("ENOTEMPTY"),
            FsError::BadFileDescriptor(_) => Some("EBADF"),
            FsError::ReadOnlyFilesystem(_) => Some("EROFS"),
            FsError::Store(StoreError::Timeout { .. }) => Some("ETIMEDOUT"),
            FsError::Closed(_)
            | FsError::CrossNamespaceMove { .. }
            | FsError::ConvertDenied { .. }
            | FsError::PartialRename { .. }
            | FsError::Store(_) => None,
        }
    }

    /// Returns true for the not-found kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}

impl From<StoreError> for FsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(name) => FsError::NotFound(name),
            StoreError::AlreadyExists(name) => FsError::AlreadyExists(name),
            other => FsError::Store(other),
        }
    }
}

/// Convert FsError to std::io::Error for compatibility.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        let kind = match &e {
            FsError::InvalidPath(_) | FsError::InvalidSeek(_) => io::ErrorKind::InvalidInput,
            FsError::InvalidOffset { .. } => io::ErrorKind::FileTooLarge,
            FsError::NotFound(_) => io::ErrorKind::NotFound,
            FsError::AlreadyExists(_) => io::ErrorKind::AlreadyExists,
            FsError::NotADirectory(_) => io::ErrorKind::NotADirectory,
            FsError::IsADirectory(_) => io::ErrorKind::IsADirectory,
            FsError::NotEmpty(_) => io::ErrorKind::DirectoryNotEmpty,
            FsError::BadFileDescriptor(_) => io::ErrorKind::PermissionDenied,
            FsError::ReadOnlyFilesystem(_) => io::ErrorKind::ReadOnlyFilesystem,
            FsError::CrossNamespaceMove { .. } => io::ErrorKind::CrossesDevices,
            FsError::ConvertDenied { .. } => io::ErrorKind::Unsupported,
            FsError::Store(StoreError::Timeout { .. }) => io::ErrorKind::TimedOut,
            FsError::Closed(_) | FsError::PartialRename { .. } | FsError::Store(_) => {
                io::ErrorKind::Other
            }
        };
        io::Error::new(kind, e)
    }
}

/// Filesystem result type.
pub type FsResult<T> = Result<T, FsError>;
