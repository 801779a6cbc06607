//! Filesystem facade over a [`ContainerStore`].
//!
//! Maps the path-level operations (mkdir, create, open, remove, rename, stat)
//! onto container CRUD. Every call parses its path first, so a malformed
//! path fails [`FsError::InvalidPath`] before the store is touched.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::entry::{ContainerHandle, Entry, LeafHandle};
use crate::error::{FsError, FsResult, StoreError};
use crate::path::SecretPath;
use crate::store::{Container, ContainerStore, KeyChange, MemoryStore};
use crate::types::OpenFlags;

/// Name reported by [`SecretFs::name`].
pub const FS_NAME: &str = "secfs";

/// Secrets as a filesystem: namespaces/secrets are directories, keys are files.
#[derive(Clone)]
pub struct SecretFs {
    store: Arc<dyn ContainerStore>,
}

impl std::fmt::Debug for SecretFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretFs").finish_non_exhaustive()
    }
}

impl SecretFs {
    pub fn new(store: Arc<dyn ContainerStore>) -> Self {
        Self { store }
    }

    /// A filesystem backed by a fresh [`MemoryStore`].
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new(config)))
    }

    pub fn name(&self) -> &'static str {
        FS_NAME
    }

    /// Create an empty secret.
    #[tracing::instrument(skip(self), name = "secfs.mkdir")]
    pub fn mkdir(&self, name: &str) -> FsResult<()> {
        let path = SecretPath::parse(name)?;
        if !path.is_container() {
            return Err(FsError::not_a_directory(path.to_string()));
        }

        self.store
            .create(&Container::new(path.container_ref()))
            .map_err(|e| FsError::from_store(path.to_string(), e))?;
        debug!(path = %path, "created secret");
        Ok(())
    }

    /// Like [`mkdir`](Self::mkdir), but an existing secret is success.
    #[tracing::instrument(skip(self), name = "secfs.mkdir_all")]
    pub fn mkdir_all(&self, name: &str) -> FsResult<()> {
        match self.mkdir(name) {
            Err(FsError::AlreadyExists(path)) => {
                // surfaces NotManaged for foreign secrets
                self.store
                    .get(&SecretPath::parse(&path)?.container_ref())
                    .map(|_| ())
                    .map_err(|e| FsError::from_store(path, e))
            }
            other => other,
        }
    }

    /// Create a new, empty key and return a writable handle.
    ///
    /// Fails `AlreadyExists` if the key is present; use
    /// [`open_file`](Self::open_file) with create+truncate to overwrite.
    #[tracing::instrument(skip(self), name = "secfs.create")]
    pub fn create(&self, name: &str) -> FsResult<LeafHandle> {
        self.create_path(SecretPath::parse(name)?)
    }

    fn create_path(&self, path: SecretPath) -> FsResult<LeafHandle> {
        if path.is_container() {
            return Err(FsError::is_a_directory(path.to_string()));
        }
        LeafHandle::create(self.store.clone(), path)
    }

    /// Open a secret or key read-only.
    #[tracing::instrument(skip(self), name = "secfs.open")]
    pub fn open(&self, name: &str) -> FsResult<Entry> {
        self.open_path(SecretPath::parse(name)?)
    }

    fn open_path(&self, path: SecretPath) -> FsResult<Entry> {
        if path.is_container() {
            Ok(Entry::Container(ContainerHandle::open(
                self.store.as_ref(),
                path,
            )?))
        } else {
            Ok(Entry::Leaf(LeafHandle::open(self.store.clone(), path)?))
        }
    }

    /// Open with explicit flags. `mode` is accepted and ignored.
    ///
    /// Secrets and read-only requests get a plain [`open`](Self::open).
    /// Otherwise the key is created when missing (with `create`), the handle
    /// is made writable, emptied (with `truncate` + `write`), and switched to
    /// append mode (with `append`) so every write lands at the end.
    #[tracing::instrument(skip(self), name = "secfs.open_file")]
    pub fn open_file(&self, name: &str, flags: OpenFlags, mode: u32) -> FsResult<Entry> {
        let path = SecretPath::parse(name)?;

        let leaf = match self.open_path(path.clone()) {
            Ok(entry) if entry.is_dir() || flags.is_read_only() => return Ok(entry),
            Ok(_) if flags.exclusive && flags.create => {
                return Err(FsError::already_exists(path.to_string()));
            }
            Ok(entry) => entry.into_leaf()?,
            Err(e) if e.is_not_found() && flags.create => self.create_path(path)?,
            Err(e) => return Err(e),
        };

        leaf.set_writable();

        if flags.truncate && flags.write {
            leaf.truncate(0)?;
        }
        if flags.append {
            leaf.set_append();
        }

        Ok(Entry::Leaf(leaf))
    }

    /// Remove an empty secret, or a key.
    #[tracing::instrument(skip(self), name = "secfs.remove")]
    pub fn remove(&self, name: &str) -> FsResult<()> {
        match self.open(name)? {
            Entry::Container(dir) => {
                if !dir.is_empty() {
                    warn!(path = %dir.path(), keys = dir.size(), "refusing to remove non-empty secret");
                    return Err(FsError::not_empty(dir.path().to_string()));
                }
                self.delete_container(dir.path())
            }
            Entry::Leaf(leaf) => leaf.unlink(),
        }
    }

    /// Remove a secret with all its keys, or a key. A missing target is
    /// success.
    #[tracing::instrument(skip(self), name = "secfs.remove_all")]
    pub fn remove_all(&self, name: &str) -> FsResult<()> {
        match self.open(name) {
            Ok(Entry::Container(dir)) => self.delete_container(dir.path()),
            Ok(Entry::Leaf(leaf)) => leaf.unlink(),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn delete_container(&self, path: &SecretPath) -> FsResult<()> {
        self.store
            .delete(&path.container_ref())
            .map_err(|e| FsError::from_store(path.to_string(), e))?;
        debug!(path = %path, "deleted secret");
        Ok(())
    }

    /// Move a secret or key within one namespace.
    ///
    /// | old    | new    | result                                           |
    /// |--------|--------|--------------------------------------------------|
    /// | any    | other namespace | `CrossNamespaceMove`                    |
    /// | secret | key    | `ConvertDenied`                                  |
    /// | secret | secret | store rename; `AlreadyExists` if new is present  |
    /// | key    | secret | key moves under its own name                     |
    /// | key    | key    | key moves under the new name, replacing it       |
    ///
    /// Moving a key writes the destination first and deletes the source
    /// second. If the delete fails the destination is kept and the error is
    /// [`FsError::PartialRename`]; both copies then exist.
    #[tracing::instrument(skip(self), name = "secfs.rename")]
    pub fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        let from = SecretPath::parse(old)?;
        let to = SecretPath::parse(new)?;

        if from.namespace() != to.namespace() {
            return Err(FsError::CrossNamespaceMove {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        if from.is_container() {
            if !to.is_container() {
                return Err(FsError::ConvertDenied {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            return self
                .store
                .rename(&from.container_ref(), &to.container_ref())
                .map_err(|e| match e {
                    StoreError::AlreadyExists(_) => FsError::already_exists(to.to_string()),
                    other => FsError::from_store(from.to_string(), other),
                });
        }

        let source = LeafHandle::open(self.store.clone(), from.clone())?;
        let dest = if to.is_container() {
            to.with_key(from.key())
        } else {
            to
        };
        if dest == from {
            return Ok(());
        }

        self.store
            .apply(
                &dest.container_ref(),
                KeyChange::Put {
                    key: dest.key().to_string(),
                    value: source.value(),
                },
            )
            .map_err(|e| FsError::from_store(dest.to_string(), e))?;

        if let Err(e) = source.unlink() {
            warn!(from = %from, to = %dest, error = %e, "rename left source in place");
            return Err(FsError::PartialRename {
                from: from.to_string(),
                to: dest.to_string(),
                source: Box::new(e),
            });
        }

        debug!(from = %from, to = %dest, "moved key");
        Ok(())
    }

    /// Resolve a path the way [`open`](Self::open) does.
    #[tracing::instrument(skip(self), name = "secfs.stat")]
    pub fn stat(&self, name: &str) -> FsResult<Entry> {
        self.open(name)
    }

    /// Unsupported: secrets carry no permission bits.
    #[tracing::instrument(skip(self), name = "secfs.chmod")]
    pub fn chmod(&self, name: &str, mode: u32) -> FsResult<()> {
        Err(FsError::read_only(SecretPath::parse(name)?.to_string()))
    }

    /// Unsupported: secrets carry no owner.
    #[tracing::instrument(skip(self), name = "secfs.chown")]
    pub fn chown(&self, name: &str, uid: u32, gid: u32) -> FsResult<()> {
        Err(FsError::read_only(SecretPath::parse(name)?.to_string()))
    }

    /// Unsupported: modification times are assigned by the store.
    #[tracing::instrument(skip(self), name = "secfs.chtimes")]
    pub fn chtimes(&self, name: &str, atime: SystemTime, mtime: SystemTime) -> FsResult<()> {
        Err(FsError::read_only(SecretPath::parse(name)?.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreOp;

    fn fs() -> SecretFs {
        SecretFs::in_memory(StoreConfig::default())
    }

    fn put(fs: &SecretFs, name: &str, value: &[u8]) {
        let f = fs.create(name).unwrap();
        f.write(value).unwrap();
        f.close().unwrap();
    }

    fn value(fs: &SecretFs, name: &str) -> Vec<u8> {
        fs.open(name).unwrap().into_leaf().unwrap().value()
    }

    #[test]
    fn test_name() {
        assert_eq!(fs().name(), "secfs");
    }

    #[test]
    fn test_mkdir_shapes() {
        let fs = fs();
        assert!(matches!(fs.mkdir("default/s/k"), Err(FsError::NotADirectory(_))));
        assert!(matches!(fs.mkdir("default"), Err(FsError::InvalidPath(_))));

        fs.mkdir("/default/s/").unwrap();
        assert!(matches!(fs.mkdir("default/s"), Err(FsError::AlreadyExists(ref p)) if p == "default/s"));
        fs.mkdir_all("default/s").unwrap();
        fs.mkdir_all("default/t").unwrap();
        assert!(fs.stat("default/t").unwrap().is_dir());
    }

    #[test]
    fn test_create_shapes() {
        let fs = fs();
        assert!(matches!(fs.create("default/s"), Err(FsError::IsADirectory(_))));
        assert!(matches!(fs.create("default/missing/k"), Err(FsError::NotFound(_))));

        fs.mkdir("default/s").unwrap();
        put(&fs, "default/s/k", b"v");
        assert!(matches!(fs.create("default/s/k"), Err(FsError::AlreadyExists(_))));
    }

    #[test]
    fn test_create_is_visible_before_close() {
        let fs = fs();
        fs.mkdir("default/s").unwrap();
        let f = fs.create("default/s/k").unwrap();
        assert_eq!(value(&fs, "default/s/k"), b"");
        f.close().unwrap();
    }

    #[test]
    fn test_open_file_read_only_is_not_writable() {
        let fs = fs();
        fs.mkdir("default/s").unwrap();
        put(&fs, "default/s/k", b"v");

        let entry = fs.open_file("default/s/k", OpenFlags::read(), 0).unwrap();
        assert!(matches!(entry.write(b"x"), Err(FsError::BadFileDescriptor(_))));

        let dir = fs.open_file("default/s", OpenFlags::create_truncate(), 0o644).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_open_file_create_and_exclusive() {
        let fs = fs();
        fs.mkdir("default/s").unwrap();

        let entry = fs.open_file("default/s/new", OpenFlags::create(), 0o600).unwrap();
        entry.write(b"abc").unwrap();
        entry.close().unwrap();
        assert_eq!(value(&fs, "default/s/new"), b"abc");

        let err = fs
            .open_file("default/s/new", OpenFlags::create_exclusive(), 0o600)
            .unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(_)));

        let err = fs.open_file("default/s/none", OpenFlags::write(), 0).unwrap_err();
        assert!(err.is_not_found());

        let err = fs.open_file("default/gone", OpenFlags::create(), 0).unwrap_err();
        assert!(matches!(err, FsError::IsADirectory(_)));
    }

    #[test]
    fn test_open_file_append_and_truncate() {
        let fs = fs();
        fs.mkdir("default/s").unwrap();
        put(&fs, "default/s/k", b"hello");

        let entry = fs.open_file("default/s/k", OpenFlags::append(), 0).unwrap();
        entry.write(b" world").unwrap();
        entry.close().unwrap();
        assert_eq!(value(&fs, "default/s/k"), b"hello world");

        let entry = fs
            .open_file("default/s/k", OpenFlags::create_truncate(), 0)
            .unwrap();
        assert_eq!(entry.size(), 0);
        entry.write(b"new").unwrap();
        entry.close().unwrap();
        assert_eq!(value(&fs, "default/s/k"), b"new");
    }

    #[test]
    fn test_open_file_append_with_truncate_starts_empty() {
        let fs = fs();
        fs.mkdir("default/s").unwrap();
        put(&fs, "default/s/k", b"hello");

        let flags = OpenFlags {
            append: true,
            truncate: true,
            ..OpenFlags::create()
        };
        let entry = fs.open_file("default/s/k", flags, 0).unwrap();
        entry.write(b"new").unwrap();
        entry.seek(std::io::SeekFrom::Start(0)).unwrap();
        entry.write(b"!").unwrap();
        entry.close().unwrap();
        assert_eq!(value(&fs, "default/s/k"), b"new!");
    }

    #[test]
    fn test_remove_leaf() {
        let fs = fs();
        fs.mkdir("default/s").unwrap();
        put(&fs, "default/s/a", b"1");
        put(&fs, "default/s/b", b"2");

        fs.remove("default/s/a").unwrap();
        assert!(fs.open("default/s/a").unwrap_err().is_not_found());
        assert_eq!(value(&fs, "default/s/b"), b"2");
        assert!(fs.remove("default/s/a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_all_missing_is_ok() {
        let fs = fs();
        fs.remove_all("default/nothing").unwrap();
        fs.remove_all("default/nothing/key").unwrap();
        assert!(matches!(fs.remove_all("bad"), Err(FsError::InvalidPath(_))));
    }

    #[test]
    fn test_rename_container() {
        let fs = fs();
        fs.mkdir("default/a").unwrap();
        put(&fs, "default/a/k", b"v");
        fs.mkdir("default/b").unwrap();

        let err = fs.rename("default/a", "default/b").unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(ref p) if p == "default/b"));

        let err = fs.rename("default/a", "default/b/k").unwrap_err();
        assert!(matches!(err, FsError::ConvertDenied { .. }));

        fs.rename("default/a", "default/c").unwrap();
        assert_eq!(value(&fs, "default/c/k"), b"v");
        assert!(fs.open("default/a").unwrap_err().is_not_found());

        let err = fs.rename("default/zzz", "default/y").unwrap_err();
        assert!(matches!(err, FsError::NotFound(ref p) if p == "default/zzz"));
    }

    #[test]
    fn test_rename_leaf_into_container_keeps_key() {
        let fs = fs();
        fs.mkdir("default/a").unwrap();
        fs.mkdir("default/b").unwrap();
        put(&fs, "default/a/k", b"v");

        fs.rename("default/a/k", "default/b").unwrap();
        assert_eq!(value(&fs, "default/b/k"), b"v");
        assert!(fs.open("default/a/k").unwrap_err().is_not_found());
    }

    #[test]
    fn test_rename_leaf_within_container() {
        let fs = fs();
        fs.mkdir("default/a").unwrap();
        put(&fs, "default/a/old", b"v");

        fs.rename("default/a/old", "default/a/new").unwrap();
        let names = fs.open("default/a").unwrap().readdir_names(0).unwrap();
        assert_eq!(names, vec!["new"]);
    }

    #[test]
    fn test_rename_leaf_onto_itself() {
        let fs = fs();
        fs.mkdir("default/a").unwrap();
        put(&fs, "default/a/k", b"v");
        fs.rename("default/a/k", "default/a/k").unwrap();
        fs.rename("default/a/k", "default/a").unwrap();
        assert_eq!(value(&fs, "default/a/k"), b"v");
    }

    #[test]
    fn test_rename_leaf_missing_destination_container() {
        let fs = fs();
        fs.mkdir("default/a").unwrap();
        put(&fs, "default/a/k", b"v");

        let err = fs.rename("default/a/k", "default/nope/k").unwrap_err();
        assert!(matches!(err, FsError::NotFound(ref p) if p == "default/nope/k"));
        assert_eq!(value(&fs, "default/a/k"), b"v");
    }

    #[test]
    fn test_rename_phase_two_failure_is_partial() {
        let store = Arc::new(MemoryStore::default());
        let fs = SecretFs::new(store.clone());
        fs.mkdir("default/a").unwrap();
        fs.mkdir("default/b").unwrap();
        put(&fs, "default/a/k", b"v");

        store.fail_after(StoreOp::Update, 1, StoreError::Backend("conflict".into()));
        let err = fs.rename("default/a/k", "default/b/k").unwrap_err();
        match &err {
            FsError::PartialRename { from, to, source } => {
                assert_eq!(from, "default/a/k");
                assert_eq!(to, "default/b/k");
                assert!(matches!(**source, FsError::Store(StoreError::Backend(_))));
            }
            other => panic!("expected partial rename, got {other:?}"),
        }

        assert_eq!(value(&fs, "default/a/k"), b"v");
        assert_eq!(value(&fs, "default/b/k"), b"v");
    }

    #[test]
    fn test_unsupported_metadata_ops() {
        let fs = fs();
        let now = SystemTime::now();
        assert_eq!(fs.chmod("default/s/k", 0o600).unwrap_err().errno(), Some("EROFS"));
        assert_eq!(fs.chown("default/s", 0, 0).unwrap_err().errno(), Some("EROFS"));
        assert_eq!(fs.chtimes("default/s", now, now).unwrap_err().errno(), Some("EROFS"));
        assert!(matches!(fs.chmod("x", 0), Err(FsError::InvalidPath(_))));
    }
}
