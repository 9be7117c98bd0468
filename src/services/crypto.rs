use crate::models::config::LegacyHashAlgorithm;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::debug;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer as OpenSslSigner;
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Failed to sign payload: {0}")]
    SigningError(String),

    #[error("OpenSSL error: {0}")]
    OpenSslError(#[from] openssl::error::ErrorStack),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Current protocol hash base: compact JSON, keys in insertion order.
///
/// Numbers and booleans keep their JSON types; an empty field set is `{}`.
pub fn canonical_json(fields: &Map<String, Value>) -> Result<String, CryptoError> {
    Ok(serde_json::to_string(fields)?)
}

/// Legacy hash base: every value as `<byte length><value>`, no separators.
pub fn legacy_hash_base<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut base = String::new();
    for value in values {
        let value = value.as_ref();
        base.push_str(&value.len().to_string());
        base.push_str(value);
    }
    base
}

/// Keyed signature over a canonical payload.
pub trait Signer {
    fn sign(&self, key: &str, payload: &[u8]) -> Result<String, CryptoError>;

    /// Recomputes the signature and compares in constant time.
    /// Malformed or empty input never verifies and never panics.
    fn verify(&self, key: &str, payload: &[u8], signature: &str) -> bool {
        match self.sign(key, payload) {
            Ok(computed) => constant_time_eq(&computed, signature.trim()),
            Err(e) => {
                debug!("Signature recomputation failed: {}", e);
                false
            }
        }
    }
}

/// HMAC-SHA384, base64 encoded. Used by every current-protocol message.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSha384Signer;

impl Signer for HmacSha384Signer {
    fn sign(&self, key: &str, payload: &[u8]) -> Result<String, CryptoError> {
        let mac = hmac(MessageDigest::sha384(), key, payload)?;
        Ok(BASE64.encode(mac))
    }
}

/// Legacy HMAC with a configurable digest, lowercase hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyHmacSigner {
    pub algorithm: LegacyHashAlgorithm,
}

impl LegacyHmacSigner {
    pub fn new(algorithm: LegacyHashAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Hash of a value list, as sent in `ORDER_HASH` / `HASH` fields.
    pub fn hash_values<I, S>(&self, key: &str, values: I) -> Result<String, CryptoError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let base = legacy_hash_base(values);
        self.sign(key, base.as_bytes())
    }

    fn digest(&self) -> MessageDigest {
        match self.algorithm {
            LegacyHashAlgorithm::Md5 => MessageDigest::md5(),
            LegacyHashAlgorithm::Sha1 => MessageDigest::sha1(),
            LegacyHashAlgorithm::Sha256 => MessageDigest::sha256(),
        }
    }
}

impl Signer for LegacyHmacSigner {
    fn sign(&self, key: &str, payload: &[u8]) -> Result<String, CryptoError> {
        let mac = hmac(self.digest(), key, payload)?;
        Ok(mac
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<String>>()
            .join(""))
    }
}

fn hmac(digest: MessageDigest, key: &str, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(CryptoError::SigningError(
            "Empty key for signature".to_string(),
        ));
    }

    let pkey = PKey::hmac(key.as_bytes())?;
    let mut signer = OpenSslSigner::new(digest, &pkey)
        .map_err(|e| CryptoError::SigningError(format!("Failed to create signer: {}", e)))?;
    signer.update(payload)?;
    let mac = signer
        .sign_to_vec()
        .map_err(|e| CryptoError::SigningError(format!("Failed to sign payload: {}", e)))?;
    Ok(mac)
}

pub fn constant_time_eq(computed: &str, received: &str) -> bool {
    computed.as_bytes().ct_eq(received.as_bytes()).unwrap_u8() == 1
}
