//! Mapping of (bucket, object) pairs onto Manta's two storage roots.
//!
//! Manta has no notion of a bucket. Every account owns two disjoint
//! directory trees:
//!
//! ```text
//! /<account>/stor/...     private
//! /<account>/public/...   public, readable without signing
//! ```
//!
//! A bucket is a (possibly nested) directory under one of them and an
//! object is a file inside that directory. The same relative name is
//! valid under both roots, so which root an existing entity lives in is
//! found by probing: private first, then public.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::naming::{NameError, NamingConstraints, MANTA_NAMING};
use crate::transport::{Metadata, Transport};

/// One of the two top level directories of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageRoot {
    Private,
    Public,
}

impl StorageRoot {
    /// Order in which roots are probed for an existing entity
    pub const PROBE_ORDER: [StorageRoot; 2] = [StorageRoot::Private, StorageRoot::Public];

    fn directory(&self) -> &'static str {
        match self {
            StorageRoot::Private => "stor",
            StorageRoot::Public => "public",
        }
    }
}

impl fmt::Display for StorageRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directory())
    }
}

/// A validated bucket path relative to a storage root
///
/// Always a `/`-joined list of valid segments followed by exactly one `/`,
/// e.g. `a/b/`. Never starts with `/` or with a root prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketPath {
    path: String,
    root: Option<StorageRoot>,
}

impl BucketPath {
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Root the caller named explicitly by passing a root-qualified path
    pub fn pinned_root(&self) -> Option<StorageRoot> {
        self.root
    }

    /// Every prefix of this path, shortest first: `a/b/` gives `a/`, `a/b/`
    pub fn ancestors(&self) -> Vec<BucketPath> {
        let mut ancestors = Vec::new();
        let mut current = String::new();
        for segment in self.path.split('/').filter(|s| !s.is_empty()) {
            current.push_str(segment);
            current.push('/');
            ancestors.push(BucketPath {
                path: current.clone(),
                root: self.root,
            });
        }
        ancestors
    }
}

impl fmt::Display for BucketPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Where an existing entity was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub root: StorageRoot,
    /// Absolute store path, directories end in `/`
    pub path: String,
    pub metadata: Metadata,
}

/// Normalizes names and resolves them to absolute paths for one account
#[derive(Debug, Clone)]
pub struct Namespace {
    account: String,
    naming: NamingConstraints,
}

impl Namespace {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            naming: MANTA_NAMING,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Absolute path of a root, without trailing separator: `/<account>/stor`
    pub fn root_path(&self, root: StorageRoot) -> String {
        format!("/{}/{}", self.account, root.directory())
    }

    /// Normalize and validate a bucket name
    ///
    /// Whitespace around the name and duplicate separators are dropped. A
    /// leading `/<account>/stor` or `/<account>/public` is stripped and pins
    /// the bucket to that root.
    pub fn bucket(&self, raw: &str) -> Result<BucketPath> {
        let trimmed = raw.trim();
        let (root, relative) = self.strip_root(trimmed);

        let mut path = String::new();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            self.naming
                .validate(segment)
                .map_err(|reason| invalid(raw, reason))?;
            path.push_str(segment);
            path.push('/');
        }

        if path.is_empty() {
            return Err(invalid(
                raw,
                NameError::TooShort {
                    min: self.naming.min_length(),
                },
            ));
        }

        Ok(BucketPath { path, root })
    }

    /// Normalize and validate an object name
    ///
    /// Only the last `/`-separated segment is the object name, so
    /// `a/b/f.txt` and `f.txt` name the same object within a bucket.
    pub fn object_name(&self, raw: &str) -> Result<String> {
        let name = raw.trim().rsplit('/').next().unwrap_or_default();
        self.naming
            .validate(name)
            .map_err(|reason| invalid(raw, reason))?;
        Ok(name.to_string())
    }

    /// Absolute path of a bucket, or of an object inside it
    ///
    /// Bucket paths keep their single trailing separator.
    pub fn resolve(&self, root: StorageRoot, bucket: &BucketPath, object: Option<&str>) -> String {
        let mut path = format!("{}/{}", self.root_path(root), bucket.as_str());
        if let Some(object) = object {
            path.push_str(object);
        }
        path
    }

    /// Roots worth probing for a bucket
    pub fn candidate_roots(&self, bucket: &BucketPath) -> Vec<StorageRoot> {
        match bucket.pinned_root() {
            Some(root) => vec![root],
            None => StorageRoot::PROBE_ORDER.to_vec(),
        }
    }

    /// Find the root an existing bucket (or an object inside it) lives in
    ///
    /// Probes the private root first, then the public root. A hit of the
    /// wrong kind (a file where a directory was expected or the reverse)
    /// does not count. `None` if neither root holds the entity.
    pub async fn locate(
        &self,
        transport: &Transport,
        bucket: &BucketPath,
        object: Option<&str>,
    ) -> Result<Option<Location>> {
        for root in self.candidate_roots(bucket) {
            let path = self.resolve(root, bucket, object);
            let Some(metadata) = transport.head(&path).await? else {
                continue;
            };
            if metadata.is_directory == object.is_none() {
                return Ok(Some(Location {
                    root,
                    path,
                    metadata,
                }));
            }
        }
        Ok(None)
    }

    /// Strip a root-qualified prefix, if present
    fn strip_root<'a>(&self, path: &'a str) -> (Option<StorageRoot>, &'a str) {
        for root in StorageRoot::PROBE_ORDER {
            let prefix = self.root_path(root);
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                if rest.is_empty() || rest.starts_with('/') {
                    return (Some(root), rest);
                }
            }
        }
        (None, path)
    }
}

fn invalid(raw: &str, reason: NameError) -> StoreError {
    StoreError::InvalidName {
        name: raw.to_string(),
        reason,
    }
}
