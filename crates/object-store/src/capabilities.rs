//! Static description of what the store supports.

use crate::naming::{NamingConstraints, MANTA_NAMING};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// `None` means unbounded
    pub max_bucket_count: Option<u64>,
    /// Largest object the store accepts, in bytes
    pub max_object_size: u64,
    pub max_objects_per_bucket: u64,
    pub allows_nested_buckets: bool,
    pub allows_root_objects: bool,
    pub allows_public_sharing: bool,
    /// What the service itself calls a bucket
    pub bucket_term: &'static str,
    /// What the service itself calls an object
    pub object_term: &'static str,
    pub bucket_naming: NamingConstraints,
    pub object_naming: NamingConstraints,
}

pub const MANTA_CAPABILITIES: Capabilities = Capabilities {
    max_bucket_count: None,
    // no documented limit
    max_object_size: u64::MAX,
    max_objects_per_bucket: 1_000_000,
    allows_nested_buckets: true,
    allows_root_objects: true,
    allows_public_sharing: true,
    bucket_term: "directory",
    object_term: "object",
    bucket_naming: MANTA_NAMING,
    object_naming: MANTA_NAMING,
};
