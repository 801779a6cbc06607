//! Container store contract.
//!
//! A container is one Kubernetes-style secret: a named key/value map inside a
//! namespace. The filesystem only talks to storage through
//! [`ContainerStore`]; the Kubernetes client lives outside this crate.
//! [`MemoryStore`] is the in-process implementation.
//!
//! Every call is synchronous and bounded by the store's request timeout.
//! There is no version check on [`ContainerStore::update`]: concurrent
//! writers to the same key resolve last-write-wins.

mod memory;

pub use memory::MemoryStore;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Ownership tag key stamped on secrets created by secfs.
pub const OWNERSHIP_KEY: &str = "secfs";

/// Current ownership schema version.
pub const OWNERSHIP_SCHEMA: &str = "v1";

/// Identifies a container by namespace and external name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerRef {
    pub namespace: String,
    pub name: String,
}

impl ContainerRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Ownership marker distinguishing secfs-managed containers from foreign ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub managed: bool,
    pub schema: String,
}

impl Ownership {
    /// The tag secfs writes on creation.
    pub fn managed() -> Self {
        Self {
            managed: true,
            schema: OWNERSHIP_SCHEMA.to_string(),
        }
    }

    /// No tag: a container secfs did not create.
    pub fn foreign() -> Self {
        Self {
            managed: false,
            schema: String::new(),
        }
    }

    /// True when the tag matches the current schema.
    pub fn is_current(&self) -> bool {
        self.managed && self.schema == OWNERSHIP_SCHEMA
    }
}

/// A container record as exchanged with the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub reference: ContainerRef,
    pub data: HashMap<String, Vec<u8>>,
    pub mtime: SystemTime,
    pub ownership: Ownership,
    pub labels: BTreeMap<String, String>,
}

impl Container {
    /// An empty, managed container.
    pub fn new(reference: ContainerRef) -> Self {
        Self::with_data(reference, HashMap::new())
    }

    /// A managed container holding `data`.
    pub fn with_data(reference: ContainerRef, data: HashMap<String, Vec<u8>>) -> Self {
        Self {
            reference,
            data,
            mtime: SystemTime::now(),
            ownership: Ownership::managed(),
            labels: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A single-key mutation applied by read-modify-write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyChange {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl KeyChange {
    fn apply(self, data: &mut HashMap<String, Vec<u8>>) {
        match self {
            KeyChange::Put { key, value } => {
                data.insert(key, value);
            }
            KeyChange::Delete { key } => {
                data.remove(&key);
            }
        }
    }
}

/// CRUD + rename over named key/value containers.
pub trait ContainerStore: Send + Sync {
    /// Create a container. Fails `AlreadyExists` if present.
    fn create(&self, container: &Container) -> StoreResult<()>;

    /// Fetch a container. Fails `NotFound`, or `NotManaged` for foreign records.
    fn get(&self, reference: &ContainerRef) -> StoreResult<Container>;

    /// Replace the whole key map of a managed container.
    ///
    /// Returns the modification time recorded by the store.
    fn update(&self, container: &Container) -> StoreResult<SystemTime>;

    /// Delete a container. Missing containers are not an error.
    fn delete(&self, reference: &ContainerRef) -> StoreResult<()>;

    /// Move a container to a new name. Fails `NotFound` if `old` is missing,
    /// `AlreadyExists` if `new` is present.
    fn rename(&self, old: &ContainerRef, new: &ContainerRef) -> StoreResult<()>;

    /// Fetch, apply one key change, and write back.
    ///
    /// Only the changed key is taken from the caller, so other keys written
    /// meanwhile survive.
    fn apply(&self, reference: &ContainerRef, change: KeyChange) -> StoreResult<SystemTime> {
        let mut current = self.get(reference)?;
        change.apply(&mut current.data);
        self.update(&current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ownership() {
        assert!(Ownership::managed().is_current());
        assert!(!Ownership::foreign().is_current());
        let stale = Ownership {
            managed: true,
            schema: "v0".into(),
        };
        assert!(!stale.is_current());
    }

    #[test]
    fn test_key_change_apply() {
        let mut data = HashMap::new();
        KeyChange::Put {
            key: "a".into(),
            value: b"1".to_vec(),
        }
        .apply(&mut data);
        assert_eq!(data.get("a"), Some(&b"1".to_vec()));

        KeyChange::Delete { key: "a".into() }.apply(&mut data);
        assert!(data.is_empty());
    }

    #[test]
    fn test_new_container_is_managed_and_empty() {
        let c = Container::new(ContainerRef::new("default", "s"));
        assert!(c.is_empty());
        assert!(c.ownership.is_current());
        assert_eq!(c.reference.to_string(), "default/s");
    }
}
