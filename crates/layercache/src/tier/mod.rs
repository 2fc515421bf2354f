//! Cache tiers: one storage medium each, with its own alias bookkeeping.
//!
//! ## Key Triple
//!
//! For a request key `k`, record name `n` and record id `id`:
//!
//! ```text
//! key_key       = hash(prefix, [k])        ─┐
//! id_key        = hash(prefix, [id])       ─┼─→ canonical = hash(prefix, [n, id]) → value
//! alias set     = {key_key, id_key, ...}   ─┘
//! ```
//!
//! `id_key` is computed exactly like the `key_key` of a request whose key is
//! the id, so lookups by id resolve through the id alias.

pub mod local;
pub mod remote;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::keys;
use crate::outcome::Outcome;

pub use local::LocalTier;
pub use remote::RemoteTier;

/// Which storage medium a tier uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Local,
    Remote,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Local => "local",
            TierKind::Remote => "remote",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage abstraction shared by the local and remote tiers.
///
/// A miss is a successful outcome carrying the zero value. Tiers never decide
/// whether a value is "present"; the orchestrator applies `is_zero`.
#[async_trait]
pub trait Tier<T: Send + 'static>: Send + Sync {
    fn kind(&self) -> TierKind;

    /// Whether the tier is usable. Unconfigured tiers are skipped.
    fn is_configured(&self) -> bool {
        true
    }

    /// Whether calls should go through the retry executor.
    fn supports_retry(&self) -> bool;

    fn gen_key(&self, prefix: &str, parts: &[Value]) -> String {
        keys::gen_key(prefix, parts)
    }

    /// Resolve `key` through its alias to the stored value.
    async fn get(&self, key: &Value, prefix: &str) -> Outcome<T>;

    /// Store `value` under `hash(prefix, [name, id])` and alias it from `key`
    /// and `id`.
    async fn set(&self, key: &Value, name: &str, prefix: &str, id: &Value, value: T)
    -> Outcome<T>;

    /// Remove the value `key` resolves to together with every alias of it,
    /// returning the removed value (or the zero value).
    async fn delete(&self, key: &Value, prefix: &str) -> Outcome<T>;
}
