//! `namespace/name` keys carried by the change queues

use std::fmt;
use std::str::FromStr;

use kube::{Resource, ResourceExt};

use crate::error::Error;

/// Identity of a namespaced (or cluster-scoped) object inside a work queue
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Empty for cluster-scoped objects
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn from_obj<K: Resource>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    /// Accepts `name` or `namespace/name`; anything with more segments or an
    /// empty name is rejected.
    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let mut parts = key.split('/');
        let key_parts = (parts.next(), parts.next(), parts.next());
        match key_parts {
            (Some(name), None, None) if !name.is_empty() => Ok(Self::new("", name)),
            (Some(namespace), Some(name), None) if !name.is_empty() => {
                Ok(Self::new(namespace, name))
            }
            _ => Err(Error::InvalidKey(key.to_string())),
        }
    }
}
