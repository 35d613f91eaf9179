use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::models::input::MediaSource;

/// SHA-256 over the canonical form of a media source.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FingerprintKey([u8; 32]);

impl FingerprintKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(value: &str) -> Result<Self, FingerprintError> {
        let bytes = hex::decode(value).map_err(|_| FingerprintError::MalformedKey)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| FingerprintError::MalformedKey)?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FingerprintKey({})", self.to_hex())
    }
}

impl Serialize for FingerprintKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FingerprintKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        FingerprintKey::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("invalid media URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported URL scheme `{0}` (expected http or https)")]
    UnsupportedScheme(String),

    #[error("uploaded file is empty")]
    EmptyUpload,

    #[error("fingerprint must be 64 hex characters")]
    MalformedKey,
}

/// Compute the deduplication key for a media source.
///
/// URLs and uploads hash under different prefixes, so an upload whose bytes
/// happen to spell a URL never collides with that URL.
pub fn fingerprint(source: &MediaSource) -> Result<FingerprintKey, FingerprintError> {
    let mut hasher = Sha256::new();
    match source {
        MediaSource::Url(raw) => {
            let normalized = normalize_url(raw)?;
            hasher.update(b"url\0");
            hasher.update(normalized.as_bytes());
        }
        MediaSource::Upload { bytes, .. } => {
            if bytes.is_empty() {
                return Err(FingerprintError::EmptyUpload);
            }
            hasher.update(b"upload\0");
            hasher.update(bytes);
        }
    }
    Ok(FingerprintKey(hasher.finalize().into()))
}

/// Canonical URL string: scheme and host lowercased, default port and fragment dropped.
/// Path and query are kept verbatim since signed media links depend on them.
pub fn normalize_url(raw: &str) -> Result<String, FingerprintError> {
    let trimmed = raw.trim();
    let mut url = Url::parse(trimmed).map_err(|e| FingerprintError::InvalidUrl(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(FingerprintError::UnsupportedScheme(url.scheme().to_string()));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(FingerprintError::InvalidUrl(format!("missing host in {trimmed}")));
    }

    url.set_fragment(None);
    Ok(url.to_string())
}
