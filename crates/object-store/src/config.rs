//! Store configuration and the provider context it is built from.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use common::crypto::{SignError, SigningContext};
use serde::{Deserialize, Serialize};
use url::Url;

/// Default number of entries requested per directory listing page
pub const DEFAULT_LIST_PAGE_SIZE: usize = 1000;
/// Default timeout for a single request, in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// What the store needs from the surrounding provider
///
/// Implemented by [`StoreConfig`]; embedding applications that already
/// hold credentials elsewhere can implement it themselves.
pub trait ProviderContext {
    fn account_id(&self) -> &str;

    fn region_id(&self) -> &str;

    /// Signing material for this account. Called once when a store is built.
    fn signing_context(&self) -> Result<SigningContext, SignError>;
}

/// Connection settings for one Manta account
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the service, e.g. `https://us-east.manta.joyent.com`
    pub endpoint: Url,
    pub account: String,
    pub region: String,
    /// Key fingerprint or label as registered with the account
    pub key_id: String,
    /// PEM file holding the private key
    pub key_path: PathBuf,
    #[serde(default)]
    pub key_passphrase: Option<String>,
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_list_page_size() -> usize {
    DEFAULT_LIST_PAGE_SIZE
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("account", &self.account)
            .field("region", &self.region)
            .field("key_id", &self.key_id)
            .field("key_path", &self.key_path)
            .field(
                "key_passphrase",
                &self.key_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .field("list_page_size", &self.list_page_size)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl StoreConfig {
    pub fn new(
        endpoint: Url,
        account: impl Into<String>,
        region: impl Into<String>,
        key_id: impl Into<String>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            endpoint,
            account: account.into(),
            region: region.into(),
            key_id: key_id.into(),
            key_path: key_path.into(),
            key_passphrase: None,
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.key_passphrase = Some(passphrase.into());
        self
    }

    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            list_page_size: self.list_page_size,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

impl ProviderContext for StoreConfig {
    fn account_id(&self) -> &str {
        &self.account
    }

    fn region_id(&self) -> &str {
        &self.region
    }

    fn signing_context(&self) -> Result<SigningContext, SignError> {
        let pem = std::fs::read_to_string(&self.key_path).map_err(|e| {
            SignError::Configuration(format!(
                "cannot read private key {}: {}",
                self.key_path.display(),
                e
            ))
        })?;
        let context = SigningContext::new(&self.account, &self.key_id, pem);
        Ok(match &self.key_passphrase {
            Some(passphrase) => context.with_passphrase(passphrase),
            None => context,
        })
    }
}

/// Tunables that do not come from the provider context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Entries asked for per listing request, kept within `2..=1024`
    pub list_page_size: usize,
    pub request_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}
