use std::fmt;

use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, InvalidLength, KeyIvInit};
use md5::{Digest, Md5};
use pkcs8::EncryptedPrivateKeyInfo;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tracing::debug;

use super::signer::SignError;

/// PEM tag of a PKCS#1 (`openssl genrsa -traditional`) key
const PKCS1_TAG: &str = "RSA PRIVATE KEY";
/// PEM tag of an unencrypted PKCS#8 key
const PKCS8_TAG: &str = "PRIVATE KEY";
/// PEM tag of a passphrase protected PKCS#8 key
const PKCS8_ENCRYPTED_TAG: &str = "ENCRYPTED PRIVATE KEY";
/// Cipher and IV of an OpenSSL encrypted PKCS#1 body, e.g. `AES-128-CBC,<hex iv>`
const DEK_INFO_HEADER: &str = "DEK-Info";

/// Ciphers `openssl rsa -traditional` and `ssh-keygen -m PEM` write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegacyCipher {
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
    DesEde3Cbc,
}

impl LegacyCipher {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "AES-128-CBC" => Some(Self::Aes128Cbc),
            "AES-192-CBC" => Some(Self::Aes192Cbc),
            "AES-256-CBC" => Some(Self::Aes256Cbc),
            "DES-EDE3-CBC" => Some(Self::DesEde3Cbc),
            _ => None,
        }
    }

    fn key_len(self) -> usize {
        match self {
            Self::Aes128Cbc => 16,
            Self::Aes192Cbc | Self::DesEde3Cbc => 24,
            Self::Aes256Cbc => 32,
        }
    }

    fn iv_len(self) -> usize {
        match self {
            Self::DesEde3Cbc => 8,
            _ => 16,
        }
    }

    fn decrypt(self, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, SignError> {
        let invalid =
            |e: InvalidLength| SignError::Signing(format!("invalid key or IV length: {}", e));
        let mut buf = data.to_vec();
        let plain = match self {
            Self::Aes128Cbc => cbc::Decryptor::<aes::Aes128>::new_from_slices(key, iv)
                .map_err(invalid)?
                .decrypt_padded_mut::<Pkcs7>(&mut buf),
            Self::Aes192Cbc => cbc::Decryptor::<aes::Aes192>::new_from_slices(key, iv)
                .map_err(invalid)?
                .decrypt_padded_mut::<Pkcs7>(&mut buf),
            Self::Aes256Cbc => cbc::Decryptor::<aes::Aes256>::new_from_slices(key, iv)
                .map_err(invalid)?
                .decrypt_padded_mut::<Pkcs7>(&mut buf),
            Self::DesEde3Cbc => cbc::Decryptor::<des::TdesEde3>::new_from_slices(key, iv)
                .map_err(invalid)?
                .decrypt_padded_mut::<Pkcs7>(&mut buf),
        };
        plain.map(<[u8]>::to_vec).map_err(|_| {
            SignError::Signing("failed to decrypt key, the passphrase is likely wrong".to_string())
        })
    }
}

/// RSA private key used to sign Manta requests
///
/// Holds the decoded key ready for RSASSA-PKCS1-v1_5 signing with SHA-256.
/// Decoding happens once, when the key is loaded; signing afterwards is
/// a pure function of the message.
///
/// # Examples
///
/// ```ignore
/// let pem = std::fs::read_to_string("~/.ssh/id_rsa")?;
/// let key = SigningKey::from_pem(&pem, None)?;
/// let signature = key.sign(b"date: Thu, 16 Oct 2025 12:30:45 GMT")?;
/// ```
#[derive(Clone)]
pub struct SigningKey(pkcs1v15::SigningKey<Sha256>);

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

impl From<RsaPrivateKey> for SigningKey {
    fn from(key: RsaPrivateKey) -> Self {
        Self(pkcs1v15::SigningKey::<Sha256>::new(key))
    }
}

impl SigningKey {
    /// Parse an RSA private key from PEM
    ///
    /// Accepts PKCS#1 (`RSA PRIVATE KEY`), PKCS#8 (`PRIVATE KEY`) and
    /// passphrase protected PKCS#8 (`ENCRYPTED PRIVATE KEY`). PKCS#1 keys
    /// encrypted the OpenSSL way (`Proc-Type: 4,ENCRYPTED`) are decrypted
    /// with `passphrase` when their cipher is AES-CBC or DES-EDE3-CBC.
    ///
    /// # Errors
    ///
    /// - [`SignError::Configuration`] if the material is empty, or the key is
    ///   encrypted and no passphrase was given
    /// - [`SignError::Signing`] if the PEM is malformed, the passphrase is wrong,
    ///   the key is not RSA, or it is encrypted with an unsupported cipher
    pub fn from_pem(pem_str: &str, passphrase: Option<&str>) -> Result<Self, SignError> {
        if pem_str.trim().is_empty() {
            return Err(SignError::Configuration(
                "no private key material was provided".to_string(),
            ));
        }

        let pem = pem::parse(pem_str)
            .map_err(|e| SignError::Signing(format!("failed to parse PEM: {}", e)))?;

        let key = match pem.tag() {
            PKCS1_TAG if pem.headers().get("Proc-Type").is_some() => {
                let der = decrypt_legacy(&pem, passphrase)?;
                RsaPrivateKey::from_pkcs1_der(&der)
                    .map_err(|e| SignError::Signing(format!("invalid PKCS#1 key: {}", e)))?
            }
            PKCS1_TAG => RsaPrivateKey::from_pkcs1_der(pem.contents())
                .map_err(|e| SignError::Signing(format!("invalid PKCS#1 key: {}", e)))?,
            PKCS8_TAG => RsaPrivateKey::from_pkcs8_der(pem.contents())
                .map_err(|e| SignError::Signing(format!("invalid PKCS#8 key: {}", e)))?,
            PKCS8_ENCRYPTED_TAG => {
                let passphrase = passphrase.ok_or_else(missing_passphrase)?;
                let info = EncryptedPrivateKeyInfo::try_from(pem.contents()).map_err(|e| {
                    SignError::Signing(format!("invalid encrypted PKCS#8 key: {}", e))
                })?;
                let document = info
                    .decrypt(passphrase)
                    .map_err(|e| SignError::Signing(format!("failed to decrypt key: {}", e)))?;
                RsaPrivateKey::from_pkcs8_der(document.as_bytes())
                    .map_err(|e| SignError::Signing(format!("invalid PKCS#8 key: {}", e)))?
            }
            other => {
                return Err(SignError::Signing(format!(
                    "unsupported PEM tag '{}', expected an RSA private key",
                    other
                )))
            }
        };
        debug!(format = %pem.tag(), "loaded RSA private key");

        Ok(Self::from(key))
    }

    /// Derive the public half of this key
    pub fn public_key(&self) -> RsaPublicKey {
        self.0.as_ref().to_public_key()
    }

    /// Sign a message with RSASSA-PKCS1-v1_5 over SHA-256
    ///
    /// PKCS#1 v1.5 signatures are deterministic: the same key and message
    /// always produce the same bytes.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignError> {
        let signature = self
            .0
            .try_sign(message)
            .map_err(|e| SignError::Signing(format!("failed to sign: {}", e)))?;
        Ok(signature.to_vec())
    }
}

fn missing_passphrase() -> SignError {
    SignError::Configuration(
        "private key is encrypted but no passphrase was configured".to_string(),
    )
}

/// Decrypt the body of an OpenSSL encrypted PKCS#1 key into DER
fn decrypt_legacy(pem: &pem::Pem, passphrase: Option<&str>) -> Result<Vec<u8>, SignError> {
    let passphrase = passphrase.ok_or_else(missing_passphrase)?;
    let dek_info = pem.headers().get(DEK_INFO_HEADER).ok_or_else(|| {
        SignError::Signing("encrypted PEM key has no DEK-Info header".to_string())
    })?;
    let (name, iv) = dek_info
        .split_once(',')
        .ok_or_else(|| SignError::Signing(format!("malformed DEK-Info '{}'", dek_info)))?;
    let cipher = LegacyCipher::from_name(name.trim())
        .ok_or_else(|| SignError::Signing(format!("unsupported PEM cipher '{}'", name)))?;
    let iv = hex::decode(iv.trim())
        .map_err(|e| SignError::Signing(format!("malformed DEK-Info IV: {}", e)))?;
    if iv.len() != cipher.iv_len() {
        return Err(SignError::Signing(format!(
            "DEK-Info IV is {} bytes, {:?} needs {}",
            iv.len(),
            cipher,
            cipher.iv_len()
        )));
    }

    let key = openssl_key(passphrase.as_bytes(), &iv[..8], cipher.key_len());
    cipher.decrypt(&key, &iv, pem.contents())
}

/// OpenSSL `EVP_BytesToKey` with MD5 and a single iteration
fn openssl_key(passphrase: &[u8], salt: &[u8], len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(len + 16);
    let mut block = Vec::new();
    while key.len() < len {
        let mut hasher = Md5::new();
        hasher.update(&block);
        hasher.update(passphrase);
        hasher.update(salt);
        block = hasher.finalize().to_vec();
        key.extend_from_slice(&block);
    }
    key.truncate(len);
    key
}
