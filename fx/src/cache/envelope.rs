//! Versioned wire format for durable cache entries.
//!
//! Current writers emit `{"v":1,"compressed":bool,"payload":{..}}`. Large
//! entries are additionally wrapped as `gz:` + base64(gzip(envelope JSON)).
//! Readers also accept an envelope whose `payload` is a base64 gzip string
//! flagged by `compressed`, and legacy bare payload JSON with no envelope.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use super::{CacheEntry, TierError};

/// Envelope schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Prefix marking a gzip + base64 wire value.
pub const COMPRESSED_PREFIX: &str = "gz:";

/// Durable cache envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEnvelope {
    #[serde(rename = "v")]
    pub version: u32,
    pub compressed: bool,
    pub payload: serde_json::Value,
}

impl CacheEnvelope {
    /// Wrap a pre-envelope entry, which is the bare payload JSON and may
    /// lack the `cachedAt`/`ttl` stamps.
    pub fn from_legacy(payload: serde_json::Value) -> Self {
        Self {
            version: SCHEMA_VERSION,
            compressed: false,
            payload,
        }
    }
}

/// Payload fields plus the stamps added on write.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Stamped<T> {
    #[serde(flatten)]
    data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cached_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl: Option<u64>,
}

/// How an entry was found on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Envelope,
    CompressedEnvelope,
    Legacy,
}

/// Encode `payload` for the durable tier. Compression applies only when
/// requested and the envelope JSON is longer than `threshold` bytes.
pub fn encode<T: Serialize>(
    payload: &T,
    cached_at: DateTime<Utc>,
    ttl_seconds: u64,
    compress: bool,
    threshold: usize,
) -> Result<String, TierError> {
    let stamped = serde_json::to_value(Stamped {
        data: payload,
        cached_at: Some(cached_at),
        ttl: Some(ttl_seconds),
    })
    .map_err(|e| TierError::Codec(format!("serialize payload: {e}")))?;

    let mut envelope = CacheEnvelope {
        version: SCHEMA_VERSION,
        compressed: false,
        payload: stamped,
    };
    let plain = to_json(&envelope)?;
    if !compress || plain.len() <= threshold {
        return Ok(plain);
    }

    envelope.compressed = true;
    let json = to_json(&envelope)?;
    Ok(format!("{COMPRESSED_PREFIX}{}", BASE64.encode(gzip(json.as_bytes())?)))
}

/// Decode any supported wire value into an entry.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<(CacheEntry<T>, WireFormat), TierError> {
    let (text, mut format) = match raw.strip_prefix(COMPRESSED_PREFIX) {
        Some(encoded) => (inflate_base64(encoded)?, WireFormat::CompressedEnvelope),
        None => (raw.to_string(), WireFormat::Envelope),
    };

    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| TierError::Codec(format!("invalid JSON: {e}")))?;

    let envelope = if is_envelope(&value) {
        serde_json::from_value(value)
            .map_err(|e| TierError::Codec(format!("invalid envelope: {e}")))?
    } else {
        format = WireFormat::Legacy;
        CacheEnvelope::from_legacy(value)
    };

    if envelope.version != SCHEMA_VERSION {
        return Err(TierError::Codec(format!(
            "unsupported envelope version {}",
            envelope.version
        )));
    }

    let payload = match envelope.payload {
        serde_json::Value::String(encoded) if envelope.compressed => {
            format = WireFormat::CompressedEnvelope;
            let inner = inflate_base64(&encoded)?;
            serde_json::from_str(&inner)
                .map_err(|e| TierError::Codec(format!("invalid compressed payload: {e}")))?
        }
        payload => payload,
    };

    let stamped: Stamped<T> = serde_json::from_value(payload)
        .map_err(|e| TierError::Codec(format!("invalid payload: {e}")))?;

    Ok((
        CacheEntry {
            payload: stamped.data,
            cached_at: stamped.cached_at,
            ttl_seconds: stamped.ttl,
        },
        format,
    ))
}

fn is_envelope(value: &serde_json::Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.contains_key("v") && map.contains_key("payload"))
}

fn to_json(envelope: &CacheEnvelope) -> Result<String, TierError> {
    serde_json::to_string(envelope).map_err(|e| TierError::Codec(format!("serialize envelope: {e}")))
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>, TierError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| TierError::Codec(format!("gzip: {e}")))?;
    encoder
        .finish()
        .map_err(|e| TierError::Codec(format!("gzip: {e}")))
}

fn inflate_base64(encoded: &str) -> Result<String, TierError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| TierError::Codec(format!("invalid base64: {e}")))?;
    let mut text = String::new();
    GzDecoder::new(bytes.as_slice())
        .read_to_string(&mut text)
        .map_err(|e| TierError::Codec(format!("gunzip: {e}")))?;
    Ok(text)
}
