//! Serde adapter for the Go-style duration strings the metrics API uses for
//! the `window` field (`"30s"`, `"1m"`, ...).

use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize as _, Deserializer, Serializer};

pub(super) fn serialize<S>(window: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&to_go_string(window))
}

pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let nanos = go_parse_duration::parse_duration(&raw)
        .map_err(|err| D::Error::custom(format!("invalid duration {raw:?}: {err:?}")))?;
    Ok(Duration::from_nanos(nanos.max(0) as u64))
}

fn to_go_string(window: &Duration) -> String {
    let secs = window.as_secs();
    if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}
