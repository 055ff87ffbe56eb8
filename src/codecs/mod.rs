//! Cache Codec Implementations
//!
//! This module provides built-in implementations of the [`CacheCodec`](crate::traits::CacheCodec) trait
//! for different serialization backends, plus the payload header every cached
//! value carries.
//!
//! # Payload Layout
//!
//! ```text
//! +------+---------+-----------+------------------+
//! | 0xCA | version | format id | codec bytes ...  |
//! +------+---------+-----------+------------------+
//! ```

mod json;
pub use json::JsonCodec;

#[cfg(feature = "msgpack")]
mod msgpack;
#[cfg(feature = "msgpack")]
#[cfg_attr(docsrs, doc(cfg(feature = "msgpack")))]
pub use msgpack::MsgPackCodec;

use crate::config::CodecKind;
use crate::error::{CacheError, Result};
use crate::traits::CacheCodec;
use serde::Serialize;
use serde::de::DeserializeOwned;

const PAYLOAD_MAGIC: u8 = 0xCA;
const PAYLOAD_VERSION: u8 = 1;
const HEADER_LEN: usize = 3;

/// Encode `value` with `codec` and prepend the payload header.
///
/// # Errors
///
/// Returns [`CacheError::Serialization`] if the codec rejects the value.
pub fn seal<C, T>(codec: &C, value: &T) -> Result<Vec<u8>>
where
    C: CacheCodec,
    T: Serialize + ?Sized,
{
    let body = codec.serialize(value)?;
    let mut payload = Vec::with_capacity(HEADER_LEN + body.len());
    payload.extend_from_slice(&[PAYLOAD_MAGIC, PAYLOAD_VERSION, codec.format_id()]);
    payload.extend_from_slice(&body);
    Ok(payload)
}

/// Verify the payload header and decode the body with `codec`.
///
/// # Errors
///
/// Returns [`CacheError::Serialization`] when the header is missing, was
/// written by another encoding version or codec, or the body does not match `T`.
pub fn open<C, T>(codec: &C, payload: &[u8]) -> Result<T>
where
    C: CacheCodec,
    T: DeserializeOwned,
{
    let Some((header, body)) = payload.split_first_chunk::<HEADER_LEN>() else {
        return Err(CacheError::Serialization(format!(
            "payload too short ({} bytes)",
            payload.len()
        )));
    };

    match *header {
        [PAYLOAD_MAGIC, PAYLOAD_VERSION, id] if id == codec.format_id() => codec.deserialize(body),
        [PAYLOAD_MAGIC, PAYLOAD_VERSION, id] => Err(CacheError::Serialization(format!(
            "payload written by codec #{id}, expected {} (#{})",
            codec.name(),
            codec.format_id()
        ))),
        [PAYLOAD_MAGIC, version, _] => Err(CacheError::Serialization(format!(
            "unsupported payload version {version}"
        ))),
        _ => Err(CacheError::Serialization("missing payload header".to_string())),
    }
}

/// Codec chosen from configuration at startup
///
/// Dispatches to one of the built-in codecs so that the codec can be picked
/// from config without making every call site generic.
#[derive(Debug, Clone, Copy)]
pub enum AnyCodec {
    Json(JsonCodec),
    #[cfg(feature = "msgpack")]
    MsgPack(MsgPackCodec),
}

impl AnyCodec {
    /// Build the codec for a configured kind
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if the kind needs a disabled feature.
    pub fn from_kind(kind: CodecKind) -> Result<Self> {
        match kind {
            CodecKind::Json => Ok(Self::Json(JsonCodec)),
            #[cfg(feature = "msgpack")]
            CodecKind::MsgPack => Ok(Self::MsgPack(MsgPackCodec)),
            #[cfg(not(feature = "msgpack"))]
            CodecKind::MsgPack => Err(CacheError::Config(
                "msgpack codec requires the `msgpack` feature".to_string(),
            )),
        }
    }
}

impl Default for AnyCodec {
    fn default() -> Self {
        Self::Json(JsonCodec)
    }
}

impl CacheCodec for AnyCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Self::Json(c) => c.serialize(value),
            #[cfg(feature = "msgpack")]
            Self::MsgPack(c) => c.serialize(value),
        }
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Self::Json(c) => c.deserialize(bytes),
            #[cfg(feature = "msgpack")]
            Self::MsgPack(c) => c.deserialize(bytes),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Json(c) => c.name(),
            #[cfg(feature = "msgpack")]
            Self::MsgPack(c) => c.name(),
        }
    }

    fn format_id(&self) -> u8 {
        match self {
            Self::Json(c) => c.format_id(),
            #[cfg(feature = "msgpack")]
            Self::MsgPack(c) => c.format_id(),
        }
    }
}
