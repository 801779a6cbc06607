//! In-memory container store.
//!
//! Behaves like the Kubernetes-backed store: names are wrapped with the
//! configured prefix/suffix, created records carry the ownership tag and
//! labels, and foreign records are refused unless ownership checks are off.
//! All data is lost when dropped.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use super::{Container, ContainerRef, ContainerStore, Ownership};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreOp, StoreResult};

/// (namespace, storage name)
type StorageKey = (String, String);

#[derive(Debug, Clone)]
struct Record {
    data: HashMap<String, Vec<u8>>,
    mtime: SystemTime,
    ownership: Ownership,
    labels: BTreeMap<String, String>,
}

/// An injected failure for one future call of `op`.
#[derive(Debug)]
struct Fault {
    op: StoreOp,
    skip: usize,
    err: StoreError,
}

/// In-memory container store.
///
/// Thread-safe via an internal `RwLock`; every call waits at most the
/// configured request timeout for the lock.
#[derive(Debug)]
pub struct MemoryStore {
    config: StoreConfig,
    records: RwLock<HashMap<StorageKey, Record>>,
    faults: Mutex<Vec<Fault>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Seed a container that does not carry the ownership tag.
    pub fn insert_foreign(&self, reference: &ContainerRef, data: HashMap<String, Vec<u8>>) {
        let record = Record {
            data,
            mtime: SystemTime::now(),
            ownership: Ownership::foreign(),
            labels: BTreeMap::new(),
        };
        self.records.write().insert(self.storage_key(reference), record);
    }

    /// Fail the call of `op` that follows `skip` successful ones.
    pub fn fail_after(&self, op: StoreOp, skip: usize, err: StoreError) {
        self.faults.lock().push(Fault { op, skip, err });
    }

    /// Returns true if a record exists under this reference, managed or not.
    pub fn contains(&self, reference: &ContainerRef) -> bool {
        self.records.read().contains_key(&self.storage_key(reference))
    }

    /// Storage names of every record in `namespace`, sorted.
    pub fn storage_names(&self, namespace: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .records
            .read()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Labels recorded on a container.
    pub fn labels(&self, reference: &ContainerRef) -> Option<BTreeMap<String, String>> {
        self.records
            .read()
            .get(&self.storage_key(reference))
            .map(|r| r.labels.clone())
    }

    fn storage_key(&self, reference: &ContainerRef) -> StorageKey {
        (
            reference.namespace.clone(),
            self.config.internal_name(&reference.name),
        )
    }

    fn timeout(&self) -> Duration {
        self.config.request_timeout
    }

    fn read(&self, op: StoreOp) -> StoreResult<RwLockReadGuard<'_, HashMap<StorageKey, Record>>> {
        self.records
            .try_read_for(self.timeout())
            .ok_or(StoreError::Timeout {
                op,
                timeout: self.timeout(),
            })
    }

    fn write(&self, op: StoreOp) -> StoreResult<RwLockWriteGuard<'_, HashMap<StorageKey, Record>>> {
        self.records
            .try_write_for(self.timeout())
            .ok_or(StoreError::Timeout {
                op,
                timeout: self.timeout(),
            })
    }

    fn check_fault(&self, op: StoreOp) -> StoreResult<()> {
        let mut faults = self.faults.lock();
        let Some(idx) = faults.iter().position(|f| f.op == op) else {
            return Ok(());
        };
        if faults[idx].skip > 0 {
            faults[idx].skip -= 1;
            return Ok(());
        }
        Err(faults.remove(idx).err)
    }

    fn is_managed(&self, record: &Record) -> bool {
        self.config.ignore_ownership || record.ownership.is_current()
    }

    fn managed<'a>(
        &self,
        records: &'a HashMap<StorageKey, Record>,
        key: &StorageKey,
        reference: &ContainerRef,
    ) -> StoreResult<&'a Record> {
        let record = records
            .get(key)
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;
        if !self.is_managed(record) {
            return Err(StoreError::NotManaged(reference.to_string()));
        }
        Ok(record)
    }
}

impl ContainerStore for MemoryStore {
    fn create(&self, container: &Container) -> StoreResult<()> {
        self.check_fault(StoreOp::Create)?;
        let key = self.storage_key(&container.reference);
        let mut records = self.write(StoreOp::Create)?;

        if records.contains_key(&key) {
            return Err(StoreError::AlreadyExists(container.reference.to_string()));
        }

        let mut labels = self.config.labels.clone();
        labels.extend(container.labels.clone());
        records.insert(
            key,
            Record {
                data: container.data.clone(),
                mtime: SystemTime::now(),
                ownership: Ownership::managed(),
                labels,
            },
        );
        debug!(container = %container.reference, keys = container.data.len(), "store create");
        Ok(())
    }

    fn get(&self, reference: &ContainerRef) -> StoreResult<Container> {
        self.check_fault(StoreOp::Get)?;
        let key = self.storage_key(reference);
        let records = self.read(StoreOp::Get)?;
        let record = self.managed(&records, &key, reference)?;

        Ok(Container {
            reference: reference.clone(),
            data: record.data.clone(),
            mtime: record.mtime,
            ownership: record.ownership.clone(),
            labels: record.labels.clone(),
        })
    }

    fn update(&self, container: &Container) -> StoreResult<SystemTime> {
        self.check_fault(StoreOp::Update)?;
        let key = self.storage_key(&container.reference);
        let mut records = self.write(StoreOp::Update)?;
        self.managed(&records, &key, &container.reference)?;

        let now = SystemTime::now();
        if let Some(record) = records.get_mut(&key) {
            record.data = container.data.clone();
            record.mtime = now;
        }
        debug!(container = %container.reference, keys = container.data.len(), "store update");
        Ok(now)
    }

    fn delete(&self, reference: &ContainerRef) -> StoreResult<()> {
        self.check_fault(StoreOp::Delete)?;
        let key = self.storage_key(reference);
        let mut records = self.write(StoreOp::Delete)?;

        match self.managed(&records, &key, reference) {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        }

        records.remove(&key);
        debug!(container = %reference, "store delete");
        Ok(())
    }

    fn rename(&self, old: &ContainerRef, new: &ContainerRef) -> StoreResult<()> {
        self.check_fault(StoreOp::Rename)?;
        let old_key = self.storage_key(old);
        let new_key = self.storage_key(new);
        let mut records = self.write(StoreOp::Rename)?;

        self.managed(&records, &old_key, old)?;
        if records.contains_key(&new_key) {
            return Err(StoreError::AlreadyExists(new.to_string()));
        }

        if let Some(mut record) = records.remove(&old_key) {
            record.mtime = SystemTime::now();
            records.insert(new_key, record);
        }
        debug!(from = %old, to = %new, "store rename");
        Ok(())
    }
}
