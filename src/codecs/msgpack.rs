//! `MessagePack` Codec using `rmp-serde`
//!
//! Compact binary payloads. Structs are written with field names so that
//! reordering fields does not silently corrupt cached values.

use crate::error::{CacheError, Result};
use crate::traits::CacheCodec;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// `MessagePack` Codec using `rmp-serde`
#[cfg_attr(docsrs, doc(cfg(feature = "msgpack")))]
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPackCodec;

impl CacheCodec for MsgPackCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        rmp_serde::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn format_id(&self) -> u8 {
        2
    }
}
