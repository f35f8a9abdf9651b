//! Bucket/object storage on top of Manta
//!
//! Manta is a hierarchical object store: every account owns a private
//! tree at `/<account>/stor` and a public tree at `/<account>/public`,
//! and every request is authenticated with an RSA signature over its
//! `Date` header. This crate maps buckets onto directories and objects
//! onto files in those trees.
//!
//! # Features
//!
//! - Per-request signing with PKCS#1 or (encrypted) PKCS#8 RSA keys
//! - Probe-based public/private resolution of existing buckets and objects
//! - Nested buckets, created parent first
//! - Plain delete with recursive fallback for non-empty directories
//! - Background uploads and downloads with progress tracking
//!
//! # Example
//!
//! ```rust,no_run
//! use manta_object_store::{MantaStore, StoreConfig};
//! use std::path::Path;
//! use url::Url;
//!
//! # async fn example() -> Result<(), manta_object_store::StoreError> {
//! let config = StoreConfig::new(
//!     Url::parse("https://us-east.manta.joyent.com").unwrap(),
//!     "alice",
//!     "us-east-1",
//!     "a1:b2:c3",
//!     "/home/alice/.ssh/id_rsa",
//! );
//! let store = MantaStore::connect(&config)?;
//!
//! store.create_bucket("photos/2025").await?;
//! let blob = store
//!     .upload(Path::new("yoda.jpg"), "photos/2025", "yoda.jpg")
//!     .await?;
//! assert_eq!(store.is_public("photos/2025", Some(blob.name.as_str())).await?, Some(false));
//!
//! let transfer = store.download("photos/2025", "yoda.jpg", "/tmp/yoda.jpg")?;
//! transfer.wait().await?;
//! # Ok(())
//! # }
//! ```

mod capabilities;
mod classify;
mod config;
mod error;
mod namespace;
mod naming;
mod store;
mod transfer;
mod transport;
mod types;

pub use common::crypto::{SignError, SigningContext};

pub use capabilities::{Capabilities, MANTA_CAPABILITIES};
pub use classify::{classify, ErrorDescriptor};
pub use config::{
    ProviderContext, StoreConfig, StoreOptions, DEFAULT_LIST_PAGE_SIZE,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
pub use error::{ErrorKind, Result, StoreError};
pub use namespace::{BucketPath, Location, Namespace, StorageRoot};
pub use naming::{NameError, NamingConstraints, MANTA_NAMING, NAME_PUNCTUATION};
pub use store::MantaStore;
pub use transfer::{Transfer, TransferProgress, TransferState};
pub use transport::{Metadata, Transport};
pub use types::{Blob, Bucket, Entry};
