//! Values returned by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::namespace::StorageRoot;

/// A directory used as a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Path relative to the root, always with one trailing `/`
    pub name: String,
    /// Absolute store path
    pub path: String,
    pub root: StorageRoot,
    pub region: String,
    /// Best effort. The service does not report directory creation times,
    /// so this is the time of the call that produced the value unless a
    /// listing carried an mtime.
    pub created_at: DateTime<Utc>,
}

/// An object inside a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    /// Name of the containing bucket, relative to the root
    pub bucket: String,
    pub name: String,
    /// Absolute store path
    pub path: String,
    pub root: StorageRoot,
    pub region: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

impl Blob {
    pub fn is_public(&self) -> bool {
        self.root == StorageRoot::Public
    }
}

/// One immediate child of a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entry {
    Bucket(Bucket),
    Object(Blob),
}

impl Entry {
    pub fn path(&self) -> &str {
        match self {
            Entry::Bucket(bucket) => &bucket.path,
            Entry::Object(blob) => &blob.path,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Entry::Bucket(bucket) => &bucket.name,
            Entry::Object(blob) => &blob.name,
        }
    }

    pub fn is_bucket(&self) -> bool {
        matches!(self, Entry::Bucket(_))
    }
}
