use k8s_openapi::chrono::{DateTime, Utc};

use super::*;

pub trait TimeExt {
    fn now() -> metav1::Time;
    fn from_unix(seconds: f64) -> metav1::Time;
}

impl TimeExt for metav1::Time {
    /// Create a metav1::Time set to the current UTC time.
    fn now() -> metav1::Time {
        Self(Utc::now())
    }

    /// Create a metav1::Time from a Unix timestamp in (possibly fractional)
    /// seconds, the representation the Prometheus HTTP API uses.
    ///
    /// Timestamps outside the representable range collapse to the epoch.
    fn from_unix(seconds: f64) -> metav1::Time {
        let millis = (seconds * 1_000.0) as i64;
        Self(DateTime::from_timestamp_millis(millis).unwrap_or_default())
    }
}
