//! MantaStore - bucket/object storage on top of Manta directories.
//!
//! Buckets are directories under the private or public root of an
//! account, objects are files inside them. Lookups probe both roots;
//! creation defaults to the private root unless the caller passed a
//! root-qualified bucket path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::crypto::RequestSigner;
use futures::future::{BoxFuture, FutureExt};
use reqwest::{Body, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::capabilities::{Capabilities, MANTA_CAPABILITIES};
use crate::config::{ProviderContext, StoreConfig, StoreOptions};
use crate::error::{ErrorKind, Result, StoreError};
use crate::namespace::{BucketPath, Location, Namespace, StorageRoot};
use crate::naming::NamingConstraints;
use crate::transfer::Transfer;
use crate::transport::Transport;
use crate::types::{Blob, Bucket, Entry};

/// The listing marker is inclusive, so a page must hold at least the
/// repeated marker entry plus one new entry to make progress.
const MIN_LIST_PAGE_SIZE: usize = 2;
/// Largest `limit` the service accepts on a directory listing
const MAX_LIST_PAGE_SIZE: usize = 1024;
/// Prefix of the staging file a download is written to before it is renamed
const DOWNLOAD_STAGING_PREFIX: &str = ".manta-download-";

/// One line of a directory listing
#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    mtime: Option<DateTime<Utc>>,
}

impl DirectoryEntry {
    fn is_directory(&self) -> bool {
        self.kind == "directory"
    }
}

/// Bucket/object store backed by one Manta account
#[derive(Debug, Clone)]
pub struct MantaStore {
    transport: Transport,
    namespace: Namespace,
    region: String,
    page_size: usize,
}

impl MantaStore {
    /// Build a store for the account described by `context`.
    ///
    /// The private key is decoded here, once. Nothing is sent over the network.
    pub fn new(
        endpoint: Url,
        context: &impl ProviderContext,
        options: StoreOptions,
    ) -> Result<Self> {
        let signing = context.signing_context()?;
        let signer = Arc::new(RequestSigner::new(&signing)?);
        let transport = Transport::new(endpoint, signer, options.request_timeout)?;
        Ok(Self {
            transport,
            namespace: Namespace::new(context.account_id()),
            region: context.region_id().to_string(),
            page_size: options
                .list_page_size
                .clamp(MIN_LIST_PAGE_SIZE, MAX_LIST_PAGE_SIZE),
        })
    }

    /// Build a store from a configuration, reading the key file it names.
    pub fn connect(config: &StoreConfig) -> Result<Self> {
        Self::new(config.endpoint.clone(), config, config.options())
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn capabilities(&self) -> &'static Capabilities {
        &MANTA_CAPABILITIES
    }

    pub fn bucket_naming(&self) -> NamingConstraints {
        MANTA_CAPABILITIES.bucket_naming
    }

    pub fn object_naming(&self) -> NamingConstraints {
        MANTA_CAPABILITIES.object_naming
    }

    // ========================================
    // Buckets
    // ========================================

    /// Create a bucket and any missing parent directories.
    ///
    /// Goes to the private root unless `bucket` is root-qualified. Creating
    /// a bucket that already exists succeeds.
    pub async fn create_bucket(&self, bucket: &str) -> Result<Bucket> {
        let bucket = self.namespace.bucket(bucket)?;
        let root = bucket.pinned_root().unwrap_or(StorageRoot::Private);
        let created = self.create_directories(root, &bucket).await?;
        info!(path = %created.path, "bucket created");
        Ok(created)
    }

    /// Whether a bucket exists under either root
    pub async fn exists(&self, bucket: &str) -> Result<bool> {
        let bucket = self.namespace.bucket(bucket)?;
        Ok(self.locate(&bucket, None).await?.is_some())
    }

    pub async fn get_bucket(&self, bucket: &str) -> Result<Option<Bucket>> {
        let bucket = self.namespace.bucket(bucket)?;
        Ok(self
            .locate(&bucket, None)
            .await?
            .map(|location| self.bucket_value(&bucket, location.root, location.path)))
    }

    /// Immediate children of a bucket, sub-buckets and objects alike, in
    /// the order the service returns them. An absent bucket has no children.
    pub async fn list(&self, bucket: &str) -> Result<Vec<Entry>> {
        let bucket = self.namespace.bucket(bucket)?;
        let Some(location) = self.locate(&bucket, None).await? else {
            return Ok(Vec::new());
        };
        let entries = self.list_directory(&location.path).await?;
        Ok(entries
            .into_iter()
            .map(|entry| self.entry_value(&bucket, &location, entry))
            .collect())
    }

    /// Remove everything inside a bucket but keep the bucket itself.
    pub async fn clear_bucket(&self, bucket: &str) -> Result<()> {
        let bucket = self.namespace.bucket(bucket)?;
        let Some(location) = self.locate(&bucket, None).await? else {
            debug!(bucket = %bucket, "clear of absent bucket");
            return Ok(());
        };
        let entries = self.list_directory(&location.path).await?;
        let count = entries.len();
        for entry in entries {
            self.delete_path(&child_path(&location.path, &entry)).await?;
        }
        info!(path = %location.path, entries = count, "bucket cleared");
        Ok(())
    }

    /// Remove a bucket and everything inside it. Removing an absent bucket succeeds.
    pub async fn remove_bucket(&self, bucket: &str) -> Result<()> {
        let bucket = self.namespace.bucket(bucket)?;
        let Some(location) = self.locate(&bucket, None).await? else {
            debug!(bucket = %bucket, "remove of absent bucket");
            return Ok(());
        };
        self.delete_path(&location.path).await?;
        info!(path = %location.path, "bucket removed");
        Ok(())
    }

    // ========================================
    // Objects
    // ========================================

    pub async fn get_object(&self, bucket: &str, object: &str) -> Result<Option<Blob>> {
        let bucket = self.namespace.bucket(bucket)?;
        let name = self.namespace.object_name(object)?;
        Ok(self
            .locate(&bucket, Some(&name))
            .await?
            .map(|location| self.blob_value(&bucket, &name, location)))
    }

    pub async fn get_object_size(&self, bucket: &str, object: &str) -> Result<Option<u64>> {
        Ok(self.get_object(bucket, object).await?.map(|blob| blob.size))
    }

    /// Whether a bucket (`object` = `None`) or an object lives under the
    /// public root. `None` if it exists under neither root.
    pub async fn is_public(&self, bucket: &str, object: Option<&str>) -> Result<Option<bool>> {
        let bucket = self.namespace.bucket(bucket)?;
        let name = object.map(|o| self.namespace.object_name(o)).transpose()?;
        Ok(self
            .locate(&bucket, name.as_deref())
            .await?
            .map(|location| location.root == StorageRoot::Public))
    }

    /// Whether the account may use the store at all
    pub async fn is_subscribed(&self) -> Result<bool> {
        let root = self.namespace.root_path(StorageRoot::Private);
        match self.transport.get(&root, &[("limit", "1".to_string())]).await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => {
                debug!(path = %root, "private root does not exist, account is not subscribed");
                Ok(false)
            }
            Err(StoreError::Service(descriptor))
                if descriptor.kind() == ErrorKind::Authentication
                    || matches!(
                        descriptor.status(),
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
                    ) =>
            {
                debug!(code = %descriptor.code(), "account is not subscribed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove an object. Removing an absent object succeeds.
    pub async fn remove_object(&self, bucket: &str, object: &str) -> Result<()> {
        let bucket = self.namespace.bucket(bucket)?;
        let name = self.namespace.object_name(object)?;
        let Some(location) = self.locate(&bucket, Some(&name)).await? else {
            debug!(bucket = %bucket, object = %name, "remove of absent object");
            return Ok(());
        };
        self.transport.delete(&location.path).await?;
        info!(path = %location.path, "object removed");
        Ok(())
    }

    /// Rename an object within its bucket.
    ///
    /// Not atomic: a link to the new name is created first, then the old
    /// name is deleted. If the delete fails the object exists under both
    /// names and [`StoreError::PartialRename`] is returned.
    pub async fn rename_object(&self, bucket: &str, object: &str, new_name: &str) -> Result<Blob> {
        let bucket = self.namespace.bucket(bucket)?;
        let name = self.namespace.object_name(object)?;
        let new_name = self.namespace.object_name(new_name)?;

        let location = self
            .locate(&bucket, Some(&name))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("object '{}' in '{}'", name, bucket)))?;
        if name == new_name {
            return Ok(self.blob_value(&bucket, &name, location));
        }

        let target = self.namespace.resolve(location.root, &bucket, Some(&new_name));
        self.transport.put_snaplink(&target, &location.path).await?;
        if let Err(e) = self.transport.delete(&location.path).await {
            return Err(StoreError::PartialRename {
                from: location.path,
                to: target,
                source: Box::new(e),
            });
        }
        info!(from = %location.path, to = %target, "object renamed");

        Ok(self.blob_value(
            &bucket,
            &new_name,
            Location {
                path: target,
                ..location
            },
        ))
    }

    /// Upload a local file, creating the bucket if it does not exist.
    pub async fn upload(&self, source: &Path, bucket: &str, object: &str) -> Result<Blob> {
        let bucket = self.namespace.bucket(bucket)?;
        let name = self.namespace.object_name(object)?;
        self.put_file(source, &bucket, &name, None, None).await
    }

    /// Upload a local file and have the service verify it against `checksum`.
    ///
    /// The checksum travels as the request `ETag`. A response `ETag` that
    /// does not match it fails with a data integrity error.
    pub async fn upload_with_checksum(
        &self,
        source: &Path,
        bucket: &str,
        object: &str,
        checksum: &str,
    ) -> Result<Blob> {
        let bucket = self.namespace.bucket(bucket)?;
        let name = self.namespace.object_name(object)?;
        self.put_file(source, &bucket, &name, Some(checksum), None)
            .await
    }

    /// Upload in the background. Names are checked before anything is spawned.
    ///
    /// # Errors
    ///
    /// Fails up front on an invalid name, or when called outside a Tokio
    /// runtime since there is nothing to run the transfer on.
    pub fn upload_async(
        &self,
        source: impl Into<PathBuf>,
        bucket: &str,
        object: &str,
        checksum: Option<String>,
    ) -> Result<Transfer<Blob>> {
        let bucket = self.namespace.bucket(bucket)?;
        let name = self.namespace.object_name(object)?;
        let source = source.into();
        let store = self.clone();
        let description = format!("upload {} to {}{}", source.display(), bucket, name);

        Transfer::spawn(description, move |transfer| async move {
            store
                .put_file(&source, &bucket, &name, checksum.as_deref(), Some(&transfer))
                .await
        })
    }

    /// Download an object to a local file in the background.
    ///
    /// The returned transfer yields `to` once every byte is on disk. Bytes
    /// are staged in a temporary file next to `to`, which only replaces `to`
    /// after the whole object arrived; a failed download leaves `to` as it was.
    ///
    /// # Errors
    ///
    /// Fails up front on an invalid name, or when called outside a Tokio
    /// runtime.
    pub fn download(
        &self,
        bucket: &str,
        object: &str,
        to: impl Into<PathBuf>,
    ) -> Result<Transfer<PathBuf>> {
        let bucket = self.namespace.bucket(bucket)?;
        let name = self.namespace.object_name(object)?;
        let to = to.into();
        let store = self.clone();
        let description = format!("download {}{} to {}", bucket, name, to.display());

        Transfer::spawn(description, move |transfer| async move {
            store.fetch_file(&bucket, &name, to, &transfer).await
        })
    }

    // ========================================
    // Internals
    // ========================================

    async fn locate(&self, bucket: &BucketPath, object: Option<&str>) -> Result<Option<Location>> {
        self.namespace.locate(&self.transport, bucket, object).await
    }

    async fn create_directories(&self, root: StorageRoot, bucket: &BucketPath) -> Result<Bucket> {
        for ancestor in bucket.ancestors() {
            let path = self.namespace.resolve(root, &ancestor, None);
            self.transport.put_directory(&path).await?;
        }
        let path = self.namespace.resolve(root, bucket, None);
        Ok(self.bucket_value(bucket, root, path))
    }

    async fn put_file(
        &self,
        source: &Path,
        bucket: &BucketPath,
        name: &str,
        checksum: Option<&str>,
        transfer: Option<&Transfer<Blob>>,
    ) -> Result<Blob> {
        let file = tokio::fs::File::open(source).await?;
        let size = file.metadata().await?.len();
        if let Some(transfer) = transfer {
            transfer.set_total(size);
        }

        let root = match self.locate(bucket, None).await? {
            Some(location) => location.root,
            None => {
                let root = bucket.pinned_root().unwrap_or(StorageRoot::Private);
                debug!(bucket = %bucket, root = %root, "creating bucket for upload");
                self.create_directories(root, bucket).await?.root
            }
        };

        let path = self.namespace.resolve(root, bucket, Some(name));
        let etag = self
            .transport
            .put_object(&path, Body::from(file), size, checksum)
            .await?;

        if let Some(expected) = checksum {
            let actual = etag.as_deref().map(|e| e.trim_matches('"'));
            if actual != Some(expected.trim_matches('"')) {
                return Err(StoreError::DataIntegrity(format!(
                    "checksum mismatch for {}: expected {}, service reported {}",
                    path,
                    expected,
                    actual.unwrap_or("nothing")
                )));
            }
        }
        if let Some(transfer) = transfer {
            transfer.record_progress(size);
        }
        info!(path = %path, size = size, "object uploaded");

        Ok(Blob {
            bucket: bucket.to_string(),
            name: name.to_string(),
            path,
            root,
            region: self.region.clone(),
            size,
            modified_at: Utc::now(),
        })
    }

    async fn fetch_file(
        &self,
        bucket: &BucketPath,
        name: &str,
        to: PathBuf,
        transfer: &Transfer<PathBuf>,
    ) -> Result<PathBuf> {
        let not_found = || StoreError::NotFound(format!("object '{}' in '{}'", name, bucket));
        let location = self
            .locate(bucket, Some(name))
            .await?
            .ok_or_else(not_found)?;
        let mut response = self
            .transport
            .get(&location.path, &[])
            .await?
            .ok_or_else(not_found)?;

        let expected = response
            .content_length()
            .or(location.metadata.content_length);
        if let Some(total) = expected {
            transfer.set_total(total);
        }

        // removed on drop, so every early return cleans up after itself
        let staged = staging_path(&to)?;
        let mut file = tokio::fs::File::create(&staged).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            transfer.record_progress(written);
        }
        file.flush().await?;
        drop(file);

        if let Some(total) = expected {
            if written != total {
                return Err(StoreError::DataIntegrity(format!(
                    "{}: expected {} bytes, received {}",
                    location.path, total, written
                )));
            }
        }
        staged.persist(&to).map_err(|e| StoreError::Io(e.error))?;
        info!(path = %location.path, to = %to.display(), bytes = written, "object downloaded");
        Ok(to)
    }

    /// Every entry of a directory, following listing pages.
    async fn list_directory(&self, path: &str) -> Result<Vec<DirectoryEntry>> {
        let mut entries = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut query = vec![("limit", self.page_size.to_string())];
            if let Some(marker) = &marker {
                query.push(("marker", marker.clone()));
            }
            let Some(response) = self.transport.get(path, &query).await? else {
                break;
            };
            let body = response.text().await?;

            // pages may come back shorter than asked for, only a page with
            // nothing past the marker ends the listing
            let mut fresh = 0;
            let mut last = None;
            for line in body.lines().filter(|l| !l.trim().is_empty()) {
                let entry: DirectoryEntry = serde_json::from_str(line).map_err(|e| {
                    StoreError::InvalidResponse(format!("bad listing entry in {}: {}", path, e))
                })?;
                last = Some(entry.name.clone());
                if marker.as_deref() == Some(entry.name.as_str()) {
                    continue;
                }
                fresh += 1;
                entries.push(entry);
            }

            if fresh == 0 || last == marker {
                break;
            }
            marker = last;
        }

        Ok(entries)
    }

    /// Delete a path, descending into it if the service refuses because
    /// it is a non-empty directory.
    async fn delete_path(&self, path: &str) -> Result<()> {
        match self.transport.delete(path).await {
            Ok(_) => Ok(()),
            Err(StoreError::Service(descriptor)) if descriptor.is_directory_not_empty() => {
                debug!(path = %path, "directory not empty, deleting recursively");
                self.delete_recursive(path).await
            }
            Err(e) => Err(e),
        }
    }

    /// Children first, then the directory itself. Stops at the first failure.
    fn delete_recursive<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            for entry in self.list_directory(path).await? {
                let child = child_path(path, &entry);
                if entry.is_directory() {
                    self.delete_recursive(&child).await?;
                } else {
                    self.transport.delete(&child).await?;
                }
            }
            self.transport.delete(path).await?;
            Ok(())
        }
        .boxed()
    }

    fn bucket_value(&self, bucket: &BucketPath, root: StorageRoot, path: String) -> Bucket {
        Bucket {
            name: bucket.to_string(),
            path,
            root,
            region: self.region.clone(),
            created_at: Utc::now(),
        }
    }

    fn blob_value(&self, bucket: &BucketPath, name: &str, location: Location) -> Blob {
        Blob {
            bucket: bucket.to_string(),
            name: name.to_string(),
            path: location.path,
            root: location.root,
            region: self.region.clone(),
            size: location.metadata.content_length.unwrap_or(0),
            modified_at: location.metadata.last_modified.unwrap_or_else(Utc::now),
        }
    }

    fn entry_value(&self, bucket: &BucketPath, location: &Location, entry: DirectoryEntry) -> Entry {
        let path = child_path(&location.path, &entry);
        let timestamp = entry.mtime.unwrap_or_else(Utc::now);
        if entry.is_directory() {
            Entry::Bucket(Bucket {
                name: format!("{}{}/", bucket, entry.name),
                path,
                root: location.root,
                region: self.region.clone(),
                created_at: timestamp,
            })
        } else {
            Entry::Object(Blob {
                bucket: bucket.to_string(),
                name: entry.name,
                path,
                root: location.root,
                region: self.region.clone(),
                size: entry.size.unwrap_or(0),
                modified_at: timestamp,
            })
        }
    }
}

/// Fresh temporary path in the directory of `to`, so the final rename
/// stays on one filesystem
fn staging_path(to: &Path) -> Result<tempfile::TempPath> {
    let dir = to
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let staging = tempfile::Builder::new()
        .prefix(DOWNLOAD_STAGING_PREFIX)
        .tempfile_in(dir)?;
    Ok(staging.into_temp_path())
}

/// Absolute path of a listing entry. Directories keep a trailing `/`.
fn child_path(parent: &str, entry: &DirectoryEntry) -> String {
    let parent = parent.trim_end_matches('/');
    if entry.is_directory() {
        format!("{}/{}/", parent, entry.name)
    } else {
        format!("{}/{}", parent, entry.name)
    }
}
