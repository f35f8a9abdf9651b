//! Request signing primitives for the Manta HTTP API
//!
//! Manta does not use static credentials. Every request carries a `Date`
//! header and an `Authorization` header holding an RSA-SHA256 signature
//! over the canonical string `date: <Date header>`:
//!
//! ```text
//! Authorization: Signature keyId="/<account>/keys/<keyId>",algorithm="rsa-sha256",signature="<base64>"
//! ```
//!
//! - **[`SigningContext`]**: account, key id and PEM key material, loaded once per session
//! - **[`SigningKey`]**: the decoded RSA private key
//! - **[`RequestSigner`]**: produces a fresh [`SignedHeaders`] pair for each outbound request
//!
//! Both headers are always derived from the same timestamp and must be
//! attached to the same request. Nothing is cached between requests.

mod keys;
mod signer;

pub use keys::SigningKey;
pub use signer::{
    canonical_string, format_date, RequestSigner, SignError, SignedHeaders, SigningContext,
    SIGNATURE_ALGORITHM,
};
