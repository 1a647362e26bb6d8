//! Custom serde helpers for limiter configuration and state snapshots.
//!
//! Durations are exchanged as whole milliseconds so configuration files and
//! JSON snapshots stay readable (`"window_size_ms": 60000` rather than
//! `{"secs": 60, "nanos": 0}`).

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serialize/deserialize a `Duration` as an integer number of milliseconds.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use serde::{Serialize, Deserialize};
/// use adaptive_rate_limit::types::serde_helpers::duration_ms;
///
/// #[derive(Serialize, Deserialize, Debug, PartialEq)]
/// struct Window {
///     #[serde(with = "duration_ms")]
///     size: Duration,
/// }
///
/// let json = serde_json::to_string(&Window { size: Duration::from_secs(60) }).unwrap();
/// assert_eq!(json, r#"{"size":60000}"#);
/// ```
pub mod duration_ms {
    use super::*;

    /// Serialize a Duration as milliseconds.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    /// Deserialize milliseconds into a Duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Serialize/deserialize an `Option<Duration>` as optional milliseconds.
///
/// `null` (or a missing field when combined with `#[serde(default)]`) maps to `None`.
pub mod option_duration_ms {
    use super::*;

    /// Serialize an optional Duration as milliseconds or null.
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize optional milliseconds into an optional Duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = Option::<u64>::deserialize(deserializer)?;
        Ok(ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Sample {
        #[serde(with = "duration_ms")]
        window: Duration,
        #[serde(with = "option_duration_ms", default)]
        sweep: Option<Duration>,
    }

    #[test]
    fn test_duration_ms_serialization() {
        let sample = Sample {
            window: Duration::from_millis(1500),
            sweep: None,
        };
        assert_eq!(
            serde_json::to_string(&sample).unwrap(),
            r#"{"window":1500,"sweep":null}"#
        );
    }

    #[test]
    fn test_option_duration_missing_field() {
        let sample: Sample = serde_json::from_str(r#"{"window":250}"#).unwrap();
        assert_eq!(sample.window, Duration::from_millis(250));
        assert_eq!(sample.sweep, None);

        let sample: Sample = serde_json::from_str(r#"{"window":1,"sweep":300000}"#).unwrap();
        assert_eq!(sample.sweep, Some(Duration::from_secs(300)));
    }
}
