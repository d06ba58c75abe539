//! Serde helpers for human-readable durations (`"30s"`, `"1m 30s"`, `"250ms"`).

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

/// Same format for `Option<Duration>` fields.
pub mod option {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super")]
        timeout: Duration,
        #[serde(default, with = "super::option")]
        deadline: Option<Duration>,
    }

    #[test]
    fn test_parse_human_durations() {
        let holder: Holder =
            serde_json::from_str(r#"{"timeout": "1m 30s", "deadline": "250ms"}"#).unwrap();
        assert_eq!(holder.timeout, Duration::from_secs(90));
        assert_eq!(holder.deadline, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_missing_optional_duration() {
        let holder: Holder = serde_json::from_str(r#"{"timeout": "5s"}"#).unwrap();
        assert_eq!(holder.deadline, None);
    }

    #[test]
    fn test_rejects_bare_numbers_without_unit() {
        let result: Result<Holder, _> = serde_json::from_str(r#"{"timeout": "30"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serializes_back_to_text() {
        let holder = Holder {
            timeout: Duration::from_secs(30),
            deadline: None,
        };
        let json = serde_json::to_value(&holder).unwrap();
        assert_eq!(json["timeout"], "30s");
    }
}
