//! Core filesystem types.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// A single key.
    File,
    /// A secret.
    Directory,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// File mode bits.
///
/// Only the directory bit is ever set; secrets carry no permission model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileMode(u32);

impl FileMode {
    /// Directory bit (`S_IFDIR`).
    pub const DIR: FileMode = FileMode(0o040000);

    /// No bits set.
    pub const NONE: FileMode = FileMode(0);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_dir(&self) -> bool {
        self.0 & Self::DIR.0 != 0
    }
}

impl From<FileType> for FileMode {
    fn from(kind: FileType) -> Self {
        match kind {
            FileType::Directory => FileMode::DIR,
            FileType::File => FileMode::NONE,
        }
    }
}

/// Stat-like snapshot of a secret or key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Base name (key, or secret name for directories).
    pub name: String,
    /// Byte length for keys, key count for secrets.
    pub size: u64,
    /// Entry type.
    pub kind: FileType,
    /// Mode bits.
    pub mode: FileMode,
    /// Last modification time of the owning secret.
    pub mtime: SystemTime,
}

impl FileInfo {
    /// Info for a key.
    pub fn file(name: impl Into<String>, size: u64, mtime: SystemTime) -> Self {
        Self {
            name: name.into(),
            size,
            kind: FileType::File,
            mode: FileMode::NONE,
            mtime,
        }
    }

    /// Info for a secret holding `keys` keys.
    pub fn directory(name: impl Into<String>, keys: u64, mtime: SystemTime) -> Self {
        Self {
            name: name.into(),
            size: keys,
            kind: FileType::Directory,
            mode: FileMode::DIR,
            mtime,
        }
    }

    /// Returns true if this describes a secret.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Open file flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Append mode.
    pub append: bool,
    /// Create if not exists.
    pub create: bool,
    /// Truncate on open.
    pub truncate: bool,
    /// Exclusive create (fail if exists).
    pub exclusive: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
            exclusive: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Write access (also enables read).
    pub fn write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    /// Append to an existing key.
    pub fn append() -> Self {
        Self {
            read: true,
            write: true,
            append: true,
            ..Default::default()
        }
    }

    /// Create with write access.
    pub fn create() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            ..Default::default()
        }
    }

    /// Create exclusively (fail if exists).
    pub fn create_exclusive() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            exclusive: true,
            ..Default::default()
        }
    }

    /// Create and truncate.
    pub fn create_truncate() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            truncate: true,
            ..Default::default()
        }
    }

    /// True when no flag beyond read access is set.
    pub fn is_read_only(&self) -> bool {
        !(self.write || self.append || self.create || self.truncate || self.exclusive)
    }
}
