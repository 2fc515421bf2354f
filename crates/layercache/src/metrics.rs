//! Cache counters recorded through the `metrics` facade.
//!
//! The library never installs a recorder; without one every call is a no-op.
//! Binaries that want the numbers install an exporter of their choice.

use metrics::{counter, gauge};

use crate::tier::TierKind;

/// Metric names as constants for consistency.
pub mod names {
    pub const HITS_TOTAL: &str = "layercache_hits_total";
    pub const MISSES_TOTAL: &str = "layercache_misses_total";
    pub const LOADS_TOTAL: &str = "layercache_loads_total";
    pub const RETRIES_TOTAL: &str = "layercache_retries_total";
    pub const PANICS_TOTAL: &str = "layercache_panics_total";
    pub const BACKFILL_TOTAL: &str = "layercache_backfill_total";
    pub const DELETE_ERRORS_TOTAL: &str = "layercache_delete_errors_total";
    pub const LOCAL_ENTRIES: &str = "layercache_local_entries";
}

/// Record a hit in the given tier.
pub fn record_hit(tier: TierKind) {
    counter!(names::HITS_TOTAL, "tier" => tier.as_str()).increment(1);
}

/// Record a miss across every tier.
pub fn record_miss() {
    counter!(names::MISSES_TOTAL).increment(1);
}

/// Record a loader run: `stored`, `zero` or `error`.
pub fn record_load(result: &'static str) {
    counter!(names::LOADS_TOTAL, "result" => result).increment(1);
}

pub fn record_retry() {
    counter!(names::RETRIES_TOTAL).increment(1);
}

pub fn record_panic() {
    counter!(names::PANICS_TOTAL).increment(1);
}

/// Record a backfill job: `applied`, `failed` or `dropped`.
pub fn record_backfill(result: &'static str) {
    counter!(names::BACKFILL_TOTAL, "result" => result).increment(1);
}

pub fn record_delete_error(tier: TierKind) {
    counter!(names::DELETE_ERRORS_TOTAL, "tier" => tier.as_str()).increment(1);
}

pub fn set_local_entries(count: usize) {
    gauge!(names::LOCAL_ENTRIES).set(count as f64);
}
