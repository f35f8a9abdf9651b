/**
 * Cryptographic types and operations.
 *  - RSA private key loading (PKCS#1 / PKCS#8, optionally encrypted)
 *  - Per-request HTTP signature generation
 */
pub mod crypto;

pub mod prelude {
    pub use crate::crypto::{RequestSigner, SignError, SignedHeaders, SigningContext, SigningKey};
}
