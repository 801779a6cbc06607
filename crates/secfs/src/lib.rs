//! Kubernetes secrets as a filesystem.
//!
//! Namespaces and secrets form a fixed two-level tree: `namespace/secret` is a
//! directory, `namespace/secret/key` is a file whose content is the key's
//! value. Key components:
//!
//! - [`SecretFs`] - Path-level operations (mkdir, open, remove, rename, ...)
//! - [`Entry`] - An open secret ([`ContainerHandle`]) or key ([`LeafHandle`])
//! - [`ContainerStore`] - Storage contract; the Kubernetes client implements it
//! - [`MemoryStore`] - In-memory store (for testing and embedding)
//!
//! ## Design Decisions
//!
//! - **Handles buffer, stores persist**: a key's value lives in its handle
//!   until `sync`/`close` flushes it with a single-key read-modify-write.
//! - **No version checks**: two handles on the same key race at flush time and
//!   the last write wins. Handles on different keys of one secret do not
//!   clobber each other.
//! - **Two-phase key rename**: destination write, then source delete. A
//!   failure in the second phase is reported as [`FsError::PartialRename`]
//!   and nothing is rolled back.
//! - **Read-only metadata**: `chmod`, `chown` and `chtimes` fail with EROFS.

pub mod config;
pub mod entry;
mod error;
pub mod fs;
pub mod path;
pub mod store;
mod types;

pub use config::StoreConfig;
pub use entry::{ContainerHandle, Entry, LeafHandle};
pub use error::{FsError, FsResult, StoreError, StoreOp, StoreResult};
pub use fs::SecretFs;
pub use path::SecretPath;
pub use store::{Container, ContainerRef, ContainerStore, KeyChange, MemoryStore, Ownership};
pub use types::{FileInfo, FileMode, FileType, OpenFlags};
