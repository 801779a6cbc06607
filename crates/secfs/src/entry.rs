//! Open handles on secrets and keys.
//!
//! A [`LeafHandle`] holds one key's value in memory and behaves like a
//! seekable byte file; writes stay local until [`LeafHandle::sync`] or
//! [`LeafHandle::close`] flushes them. A [`ContainerHandle`] holds a snapshot
//! of a secret's key map for listing. [`Entry`] is the sum of both, as
//! returned by `open` and `stat`.
//!
//! Each handle serializes its own operations behind a mutex. Separate handles
//! on the same key are independent copies and race at flush time.

use std::io::{self, SeekFrom};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{FsError, FsResult};
use crate::path::SecretPath;
use crate::store::{ContainerStore, KeyChange};
use crate::types::{FileInfo, FileMode, FileType};

/// Largest value a single key may grow to (the Kubernetes secret size limit).
pub const MAX_VALUE_LEN: usize = 1024 * 1024;

#[derive(Debug)]
struct LeafState {
    value: Vec<u8>,
    pos: u64,
    mtime: SystemTime,
    read_only: bool,
    append: bool,
    closed: bool,
    delete: bool,
}

/// Handle on a single key.
pub struct LeafHandle {
    path: SecretPath,
    store: Arc<dyn ContainerStore>,
    state: Mutex<LeafState>,
}

impl std::fmt::Debug for LeafHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafHandle")
            .field("path", &self.path)
            .field("state", &self.state)
            .finish()
    }
}

impl LeafHandle {
    /// Load an existing key, read-only.
    pub(crate) fn open(store: Arc<dyn ContainerStore>, path: SecretPath) -> FsResult<Self> {
        let mut container = store
            .get(&path.container_ref())
            .map_err(|e| FsError::from_store(path.to_string(), e))?;

        let value = container
            .data
            .remove(path.key())
            .ok_or_else(|| FsError::not_found(path.to_string()))?;

        Ok(Self::new(store, path, value, container.mtime, true))
    }

    /// Install an empty value for a new key and flush it. Fails if the key
    /// already exists.
    pub(crate) fn create(store: Arc<dyn ContainerStore>, path: SecretPath) -> FsResult<Self> {
        let container = store
            .get(&path.container_ref())
            .map_err(|e| FsError::from_store(path.to_string(), e))?;

        if container.data.contains_key(path.key()) {
            return Err(FsError::already_exists(path.to_string()));
        }

        let mtime = store
            .apply(
                &path.container_ref(),
                KeyChange::Put {
                    key: path.key().to_string(),
                    value: Vec::new(),
                },
            )
            .map_err(|e| FsError::from_store(path.to_string(), e))?;

        debug!(path = %path, "created key");
        Ok(Self::new(store, path, Vec::new(), mtime, false))
    }

    fn new(
        store: Arc<dyn ContainerStore>,
        path: SecretPath,
        value: Vec<u8>,
        mtime: SystemTime,
        read_only: bool,
    ) -> Self {
        Self {
            path,
            store,
            state: Mutex::new(LeafState {
                value,
                pos: 0,
                mtime,
                read_only,
                append: false,
                closed: false,
                delete: false,
            }),
        }
    }

    pub(crate) fn set_writable(&self) {
        self.state.lock().read_only = false;
    }

    /// Every later `write` starts at the current end of the value.
    pub(crate) fn set_append(&self) {
        let mut state = self.state.lock();
        state.append = true;
        state.pos = state.value.len() as u64;
    }

    /// Delete this key from its secret and close the handle.
    pub(crate) fn unlink(&self) -> FsResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(FsError::closed(self.path.to_string()));
        }
        state.delete = true;
        self.flush(&mut state)?;
        state.closed = true;
        Ok(())
    }

    pub fn path(&self) -> &SecretPath {
        &self.path
    }

    /// Copy of the in-memory value.
    pub fn value(&self) -> Vec<u8> {
        self.state.lock().value.clone()
    }

    /// Current seek position.
    pub fn position(&self) -> u64 {
        self.state.lock().pos
    }

    /// Read at the current position, advancing it.
    ///
    /// Returns the number of bytes read; a count short of `buf.len()` means
    /// the value ended, `0` on a non-empty buffer means end of value.
    pub fn read(&self, buf: &mut [u8]) -> FsResult<usize> {
        let mut state = self.state.lock();
        self.check(&state, false)?;
        let n = copy_from(&state.value, state.pos, buf);
        state.pos += n as u64;
        Ok(n)
    }

    /// Read at an explicit offset. The position is not changed.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        let state = self.state.lock();
        self.check(&state, false)?;
        Ok(copy_from(&state.value, offset, buf))
    }

    /// Move the position. Seeking past the end is allowed.
    pub fn seek(&self, pos: SeekFrom) -> FsResult<u64> {
        let mut state = self.state.lock();
        self.check(&state, false)?;

        let (base, offset) = match pos {
            SeekFrom::Start(n) => (0i128, n as i128),
            SeekFrom::Current(n) => (state.pos as i128, n as i128),
            SeekFrom::End(n) => (state.value.len() as i128, n as i128),
        };
        let target = base + offset;
        state.pos = u64::try_from(target).map_err(|_| FsError::InvalidSeek(target))?;
        Ok(state.pos)
    }

    /// Write at the current position, advancing it. On handles opened for
    /// append the position first moves to the end of the value.
    pub fn write(&self, buf: &[u8]) -> FsResult<usize> {
        let mut state = self.state.lock();
        self.check(&state, true)?;
        if state.append {
            state.pos = state.value.len() as u64;
        }
        let pos = state.pos;
        let end = write_into(&mut state.value, pos, buf)?;
        state.pos = end as u64;
        Ok(buf.len())
    }

    /// Write a string at the current position, advancing it.
    pub fn write_str(&self, s: &str) -> FsResult<usize> {
        self.write(s.as_bytes())
    }

    /// Write at an explicit offset, zero-filling any gap past the end.
    /// The position is not changed.
    pub fn write_at(&self, buf: &[u8], offset: u64) -> FsResult<usize> {
        let mut state = self.state.lock();
        self.check(&state, true)?;
        write_into(&mut state.value, offset, buf)?;
        Ok(buf.len())
    }

    /// Shrink the value to `size` bytes. Never grows it.
    pub fn truncate(&self, size: u64) -> FsResult<()> {
        let mut state = self.state.lock();
        self.check(&state, true)?;
        if size < state.value.len() as u64 {
            state.value.truncate(size as usize);
        }
        Ok(())
    }

    /// Flush the value to the store. A no-op on read-only handles.
    pub fn sync(&self) -> FsResult<()> {
        let mut state = self.state.lock();
        self.check(&state, false)?;
        if state.read_only {
            return Ok(());
        }
        self.flush(&mut state)
    }

    /// Flush (unless read-only) and invalidate the handle.
    pub fn close(&self) -> FsResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(FsError::closed(self.path.to_string()));
        }
        if !state.read_only {
            self.flush(&mut state)?;
        }
        state.closed = true;
        Ok(())
    }

    pub fn name(&self) -> &str {
        self.path.name()
    }

    pub fn size(&self) -> u64 {
        self.state.lock().value.len() as u64
    }

    pub fn mod_time(&self) -> SystemTime {
        self.state.lock().mtime
    }

    pub fn stat(&self) -> FileInfo {
        let state = self.state.lock();
        FileInfo::file(self.path.name(), state.value.len() as u64, state.mtime)
    }

    fn check(&self, state: &LeafState, write: bool) -> FsResult<()> {
        if state.closed {
            return Err(FsError::closed(self.path.to_string()));
        }
        if write && state.read_only {
            return Err(FsError::bad_fd(self.path.to_string()));
        }
        Ok(())
    }

    fn flush(&self, state: &mut LeafState) -> FsResult<()> {
        let key = self.path.key().to_string();
        let change = if state.delete {
            KeyChange::Delete { key }
        } else {
            KeyChange::Put {
                key,
                value: state.value.clone(),
            }
        };

        state.mtime = self
            .store
            .apply(&self.path.container_ref(), change)
            .map_err(|e| FsError::from_store(self.path.to_string(), e))?;
        debug!(path = %self.path, len = state.value.len(), delete = state.delete, "flushed key");
        Ok(())
    }
}

fn copy_from(value: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    let Ok(start) = usize::try_from(offset) else {
        return 0;
    };
    if start >= value.len() {
        return 0;
    }
    let n = buf.len().min(value.len() - start);
    buf[..n].copy_from_slice(&value[start..start + n]);
    n
}

/// Copy `buf` into `value` at `offset`, zero-filling any gap. Returns the end
/// offset of the written range.
fn write_into(value: &mut Vec<u8>, offset: u64, buf: &[u8]) -> FsResult<usize> {
    let too_large = || FsError::InvalidOffset {
        offset,
        len: buf.len(),
        max: MAX_VALUE_LEN,
    };
    let start = usize::try_from(offset).map_err(|_| too_large())?;
    let end = start
        .checked_add(buf.len())
        .filter(|end| *end <= MAX_VALUE_LEN)
        .ok_or_else(too_large)?;

    if end > value.len() {
        value.resize(end, 0);
    }
    value[start..end].copy_from_slice(buf);
    Ok(end)
}

impl io::Read for &LeafHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        LeafHandle::read(*self, buf).map_err(Into::into)
    }
}

impl io::Write for &LeafHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        LeafHandle::write(*self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        LeafHandle::sync(*self).map_err(Into::into)
    }
}

impl io::Seek for &LeafHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        LeafHandle::seek(*self, pos).map_err(Into::into)
    }
}

impl io::Read for LeafHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl io::Write for LeafHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut &*self)
    }
}

impl io::Seek for LeafHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        io::Seek::seek(&mut &*self, pos)
    }
}

#[derive(Debug)]
struct ContainerState {
    data: std::collections::HashMap<String, Vec<u8>>,
    mtime: SystemTime,
    closed: bool,
}

/// Handle on a secret.
#[derive(Debug)]
pub struct ContainerHandle {
    path: SecretPath,
    state: Mutex<ContainerState>,
}

impl ContainerHandle {
    pub(crate) fn open(store: &dyn ContainerStore, path: SecretPath) -> FsResult<Self> {
        let container = store
            .get(&path.container_ref())
            .map_err(|e| FsError::from_store(path.to_string(), e))?;

        Ok(Self {
            path,
            state: Mutex::new(ContainerState {
                data: container.data,
                mtime: container.mtime,
                closed: false,
            }),
        })
    }

    pub fn path(&self) -> &SecretPath {
        &self.path
    }

    /// One entry per key, sorted by name. `count > 0` limits the result.
    pub fn readdir(&self, count: usize) -> FsResult<Vec<FileInfo>> {
        let state = self.state.lock();
        if state.closed {
            return Err(FsError::closed(self.path.to_string()));
        }

        let mut entries: Vec<FileInfo> = state
            .data
            .iter()
            .map(|(key, value)| FileInfo::file(key.clone(), value.len() as u64, state.mtime))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        if count > 0 {
            entries.truncate(count);
        }
        Ok(entries)
    }

    /// Key names, sorted. `count > 0` limits the result.
    pub fn readdir_names(&self, count: usize) -> FsResult<Vec<String>> {
        Ok(self.readdir(count)?.into_iter().map(|e| e.name).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().data.is_empty()
    }

    /// Invalidate the handle. Nothing is flushed.
    pub fn close(&self) -> FsResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(FsError::closed(self.path.to_string()));
        }
        state.closed = true;
        Ok(())
    }

    pub fn name(&self) -> &str {
        self.path.name()
    }

    /// Number of keys.
    pub fn size(&self) -> u64 {
        self.state.lock().data.len() as u64
    }

    pub fn mod_time(&self) -> SystemTime {
        self.state.lock().mtime
    }

    pub fn stat(&self) -> FileInfo {
        let state = self.state.lock();
        FileInfo::directory(self.path.name(), state.data.len() as u64, state.mtime)
    }
}

/// An open secret or key.
#[derive(Debug)]
pub enum Entry {
    Container(ContainerHandle),
    Leaf(LeafHandle),
}

impl Entry {
    pub fn path(&self) -> &SecretPath {
        match self {
            Entry::Container(d) => d.path(),
            Entry::Leaf(f) => f.path(),
        }
    }

    /// Unwrap the key handle, or `IsADirectory`.
    pub fn into_leaf(self) -> FsResult<LeafHandle> {
        match self {
            Entry::Leaf(f) => Ok(f),
            Entry::Container(d) => Err(FsError::is_a_directory(d.path().to_string())),
        }
    }

    fn leaf(&self) -> FsResult<&LeafHandle> {
        match self {
            Entry::Leaf(f) => Ok(f),
            Entry::Container(d) => Err(FsError::is_a_directory(d.path().to_string())),
        }
    }

    fn container(&self) -> FsResult<&ContainerHandle> {
        match self {
            Entry::Container(d) => Ok(d),
            Entry::Leaf(f) => Err(FsError::not_a_directory(f.path().to_string())),
        }
    }

    pub fn read(&self, buf: &mut [u8]) -> FsResult<usize> {
        self.leaf()?.read(buf)
    }

    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        self.leaf()?.read_at(buf, offset)
    }

    pub fn seek(&self, pos: SeekFrom) -> FsResult<u64> {
        self.leaf()?.seek(pos)
    }

    pub fn write(&self, buf: &[u8]) -> FsResult<usize> {
        self.leaf()?.write(buf)
    }

    pub fn write_str(&self, s: &str) -> FsResult<usize> {
        self.leaf()?.write_str(s)
    }

    pub fn write_at(&self, buf: &[u8], offset: u64) -> FsResult<usize> {
        self.leaf()?.write_at(buf, offset)
    }

    pub fn truncate(&self, size: u64) -> FsResult<()> {
        self.leaf()?.truncate(size)
    }

    pub fn sync(&self) -> FsResult<()> {
        self.leaf()?.sync()
    }

    pub fn readdir(&self, count: usize) -> FsResult<Vec<FileInfo>> {
        self.container()?.readdir(count)
    }

    pub fn readdir_names(&self, count: usize) -> FsResult<Vec<String>> {
        self.container()?.readdir_names(count)
    }

    pub fn close(&self) -> FsResult<()> {
        match self {
            Entry::Container(d) => d.close(),
            Entry::Leaf(f) => f.close(),
        }
    }

    pub fn name(&self) -> &str {
        self.path().name()
    }

    /// Key count for secrets, byte length for keys.
    pub fn size(&self) -> u64 {
        match self {
            Entry::Container(d) => d.size(),
            Entry::Leaf(f) => f.size(),
        }
    }

    pub fn mode(&self) -> FileMode {
        FileMode::from(self.kind())
    }

    pub fn mod_time(&self) -> SystemTime {
        match self {
            Entry::Container(d) => d.mod_time(),
            Entry::Leaf(f) => f.mod_time(),
        }
    }

    pub fn kind(&self) -> FileType {
        match self {
            Entry::Container(_) => FileType::Directory,
            Entry::Leaf(_) => FileType::File,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Entry::Container(_))
    }

    pub fn stat(&self) -> FileInfo {
        match self {
            Entry::Container(d) => d.stat(),
            Entry::Leaf(f) => f.stat(),
        }
    }
}
