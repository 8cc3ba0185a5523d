//! Serde helpers for configuration fields

/// Serializes a Duration as whole milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Same as [`duration_ms`] for optional durations; `null` disables the timer
pub mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use crate::core::EngineConfig;
    use serde_json;
    use std::time::Duration;

    #[test]
    fn test_config_serialization() {
        let original = EngineConfig::default();

        let serialized = serde_json::to_string(&original).unwrap();
        assert!(serialized.contains("\"ack_timeout\":200"));

        let deserialized: EngineConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, original);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_retries": 5, "device_timeout": null}"#).unwrap();

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.device_timeout, None);
        assert_eq!(config.ack_timeout, Duration::from_millis(200));
    }
}
