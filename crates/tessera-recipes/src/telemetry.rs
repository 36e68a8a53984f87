// Metrics for lock acquisition and release
// Recorded through the `metrics` facade; without an installed recorder these are no-ops

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};

pub const LOCK_ACQUIRED_TOTAL: &str = "tessera_lock_acquired_total";
pub const LOCK_TIMEOUTS_TOTAL: &str = "tessera_lock_timeouts_total";
pub const LOCK_RELEASED_TOTAL: &str = "tessera_lock_released_total";
pub const LOCK_ACQUIRE_SECONDS: &str = "tessera_lock_acquire_seconds";

/// Register metric descriptions with the installed recorder
/// Should be called once after the recorder is installed
pub fn describe_metrics() {
    describe_counter!(
        LOCK_ACQUIRED_TOTAL,
        "Total number of candidate nodes that acquired a lock"
    );
    describe_counter!(
        LOCK_TIMEOUTS_TOTAL,
        "Total number of acquisition attempts that ran out of time"
    );
    describe_counter!(
        LOCK_RELEASED_TOTAL,
        "Total number of locks fully released"
    );
    describe_histogram!(
        LOCK_ACQUIRE_SECONDS,
        "Time spent waiting for a lock in seconds"
    );
}

pub fn record_acquired(lock: &str, waited: Duration) {
    counter!(LOCK_ACQUIRED_TOTAL, "lock" => lock.to_string()).increment(1);
    histogram!(LOCK_ACQUIRE_SECONDS, "lock" => lock.to_string()).record(waited.as_secs_f64());
}

pub fn record_timeout(lock: &str, waited: Duration) {
    counter!(LOCK_TIMEOUTS_TOTAL, "lock" => lock.to_string()).increment(1);
    histogram!(LOCK_ACQUIRE_SECONDS, "lock" => lock.to_string()).record(waited.as_secs_f64());
}

pub fn record_released(lock: &str) {
    counter!(LOCK_RELEASED_TOTAL, "lock" => lock.to_string()).increment(1);
}
