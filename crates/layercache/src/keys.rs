//! Cache key generation.
//!
//! ## Key Format
//!
//! `{prefix}{sha256(json(parts))}`, e.g. `user:` followed by 64 hex digits.
//!
//! Parts are hashed in the order given, so `gen_key(p, &["a", "b"])` and
//! `gen_key(p, &["b", "a"])` differ. Parts that cannot be serialized yield the
//! empty key, which every tier treats as "no value".

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CacheResult;

/// Build a stable opaque key from a prefix and ordered parts.
pub fn gen_key<P: Serialize + ?Sized>(prefix: &str, parts: &P) -> String {
    match serde_json::to_vec(parts) {
        Ok(bytes) => {
            let digest = Sha256::digest(&bytes);
            format!("{prefix}{}", hex::encode(digest))
        }
        Err(e) => {
            tracing::warn!(prefix = %prefix, error = %e, "unserializable key parts");
            String::new()
        }
    }
}

/// Convert a caller-supplied key into the JSON value tiers hash.
pub fn key_part<K: Serialize + ?Sized>(key: &K) -> CacheResult<Value> {
    Ok(serde_json::to_value(key)?)
}
