//! Path grammar: `[/]namespace/secret[/key][/]`.
//!
//! Two segments address a secret (a directory), three segments address a
//! key inside it (a file). Segments are opaque.

use std::fmt;
use std::str::FromStr;

use crate::error::{FsError, FsResult};
use crate::store::ContainerRef;

/// A parsed and validated secfs path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretPath {
    namespace: String,
    secret: String,
    key: Option<String>,
}

impl SecretPath {
    /// Parse a raw path string.
    ///
    /// Leading and trailing slashes are ignored. Anything other than two or
    /// three non-empty segments is [`FsError::InvalidPath`].
    pub fn parse(raw: &str) -> FsResult<Self> {
        let parts: Vec<&str> = raw.trim_matches('/').split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(FsError::invalid_path(raw));
        }

        match parts.as_slice() {
            [namespace, secret] => Ok(Self::container(*namespace, *secret)),
            [namespace, secret, key] => Ok(Self::leaf(*namespace, *secret, *key)),
            _ => Err(FsError::invalid_path(raw)),
        }
    }

    /// Build a container path from its parts.
    pub fn container(namespace: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            secret: secret.into(),
            key: None,
        }
    }

    /// Build a leaf path from its parts.
    pub fn leaf(
        namespace: impl Into<String>,
        secret: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            secret: secret.into(),
            key: Some(key.into()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Key name, empty for containers.
    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or("")
    }

    /// Returns true if this path addresses a secret rather than a key.
    pub fn is_container(&self) -> bool {
        self.key.is_none()
    }

    /// Base name: the key for leaves, the secret name for containers.
    pub fn name(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.secret)
    }

    /// The path of the owning container (itself for containers).
    pub fn parent(&self) -> SecretPath {
        Self::container(self.namespace.clone(), self.secret.clone())
    }

    /// Same container, different key.
    pub fn with_key(&self, key: impl Into<String>) -> SecretPath {
        Self::leaf(self.namespace.clone(), self.secret.clone(), key)
    }

    /// Store reference for the owning container.
    pub fn container_ref(&self) -> ContainerRef {
        ContainerRef::new(self.namespace.clone(), self.secret.clone())
    }

    /// Canonical form: `namespace/secret[/key]`, no leading slash.
    pub fn absolute(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SecretPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}/{}/{}", self.namespace, self.secret, key),
            None => write!(f, "{}/{}", self.namespace, self.secret),
        }
    }
}

impl FromStr for SecretPath {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
