use std::fmt;

use base64::Engine;
use chrono::{DateTime, Utc};

use super::keys::SigningKey;

/// Value of the `algorithm` parameter in the `Authorization` header
pub const SIGNATURE_ALGORITHM: &str = "rsa-sha256";

/// RFC 1123 date pattern used for the `Date` header
const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Errors that can occur while preparing or producing request signatures
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    /// Signing material is missing or incomplete
    #[error("signing configuration error: {0}")]
    Configuration(String),
    /// Key decoding or the signature operation itself failed
    #[error("signing error: {0}")]
    Signing(String),
}

/// Everything needed to authenticate against one Manta account
///
/// Loaded once per session and never mutated afterwards, so it can be
/// shared freely between threads.
#[derive(Clone)]
pub struct SigningContext {
    account: String,
    key_id: String,
    private_key: String,
    passphrase: Option<String>,
}

impl fmt::Debug for SigningContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningContext")
            .field("account", &self.account)
            .field("key_id", &self.key_id)
            .field("private_key", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SigningContext {
    /// Create a context from an account, a key id (fingerprint or label)
    /// and PEM encoded private key material
    pub fn new(
        account: impl Into<String>,
        key_id: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            key_id: key_id.into(),
            private_key: private_key.into(),
            passphrase: None,
        }
    }

    /// Attach the passphrase protecting the private key
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref()
    }
}

/// The pair of headers attached to one outbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    /// Value of the `Date` header
    pub date: String,
    /// Value of the `Authorization` header
    pub authorization: String,
}

/// Format a timestamp the way the `Date` header expects it
pub fn format_date(at: DateTime<Utc>) -> String {
    at.format(DATE_FORMAT).to_string()
}

/// Build the canonical string that gets signed for a `Date` header value
pub fn canonical_string(date_header: &str) -> String {
    format!("date: {}", date_header)
}

/// Produces `Date` / `Authorization` header pairs for outbound requests
///
/// The private key is decoded once, when the signer is built. Each call to
/// [`RequestSigner::sign`] formats the given timestamp, signs the canonical
/// string and returns both headers together.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    key_path: String,
    key: SigningKey,
}

impl RequestSigner {
    /// Build a signer from a signing context
    ///
    /// # Errors
    ///
    /// - [`SignError::Configuration`] if the account, key id or key material is missing
    /// - [`SignError::Signing`] if the key cannot be decoded
    pub fn new(context: &SigningContext) -> Result<Self, SignError> {
        if context.account().trim().is_empty() {
            return Err(SignError::Configuration(
                "no account was configured for request signing".to_string(),
            ));
        }
        if context.key_id().trim().is_empty() {
            return Err(SignError::Configuration(
                "no key id was configured for request signing".to_string(),
            ));
        }
        let key = SigningKey::from_pem(context.private_key(), context.passphrase())?;
        Ok(Self::with_key(context.account(), context.key_id(), key))
    }

    /// Build a signer around an already decoded key
    pub fn with_key(account: &str, key_id: &str, key: SigningKey) -> Self {
        Self {
            key_path: format!("/{}/keys/{}", account, key_id),
            key,
        }
    }

    /// The `keyId` announced in the `Authorization` header
    pub fn key_path(&self) -> &str {
        &self.key_path
    }

    pub fn key(&self) -> &SigningKey {
        &self.key
    }

    /// Sign a request issued at `at`
    pub fn sign(&self, at: DateTime<Utc>) -> Result<SignedHeaders, SignError> {
        let date = format_date(at);
        let authorization = self.authorization_for(&date)?;
        Ok(SignedHeaders {
            date,
            authorization,
        })
    }

    /// Build the `Authorization` header value for an already formatted `Date` header
    pub fn authorization_for(&self, date_header: &str) -> Result<String, SignError> {
        let signature = self.key.sign(canonical_string(date_header).as_bytes())?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(signature);
        Ok(format!(
            "Signature keyId=\"{}\",algorithm=\"{}\",signature=\"{}\"",
            self.key_path, SIGNATURE_ALGORITHM, encoded
        ))
    }
}
