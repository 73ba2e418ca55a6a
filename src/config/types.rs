use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    pub archive: ArchiveConfig,
    pub store: StoreConfig,
    pub web: WebConfig,
}

/// Connection settings for the document API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    pub oauth_realm: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Pre-encoded base64 of `client_id:client_secret`, used when id/secret are absent.
    #[serde(default)]
    pub basic_credentials: Option<String>,
    #[serde(default = "default_request_timeout", with = "duration_format")]
    pub timeout: Duration,
    #[serde(default = "default_connect_timeout", with = "duration_format")]
    pub connect_timeout: Duration,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_page_size() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_wait", with = "duration_format")]
    pub default_wait: Duration,
    #[serde(default = "default_poll", with = "duration_format")]
    pub default_poll: Duration,
    #[serde(default = "default_min_poll", with = "duration_format")]
    pub min_poll: Duration,
    #[serde(default = "default_max_wait", with = "duration_format")]
    pub max_wait: Duration,
    #[serde(default = "default_session_retention", with = "duration_format")]
    pub session_retention: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            default_wait: default_wait(),
            default_poll: default_poll(),
            min_poll: default_min_poll(),
            max_wait: default_max_wait(),
            session_retention: default_session_retention(),
        }
    }
}

fn default_wait() -> Duration {
    Duration::from_secs(120)
}

fn default_poll() -> Duration {
    Duration::from_secs(5)
}

fn default_min_poll() -> Duration {
    Duration::from_millis(500)
}

fn default_max_wait() -> Duration {
    Duration::from_secs(3600)
}

fn default_session_retention() -> Duration {
    Duration::from_secs(600)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub path: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_extension() -> String {
    "pdf".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub listen: String,
}

/// Serde helpers for durations written as `500ms`, `5s`, `2m` or `1h`.
pub mod duration_format {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration string".to_string());
        }

        let (value_str, unit) = if let Some(v) = s.strip_suffix("ms") {
            (v, "ms")
        } else if let Some(v) = s.strip_suffix('s') {
            (v, "s")
        } else if let Some(v) = s.strip_suffix('m') {
            (v, "m")
        } else if let Some(v) = s.strip_suffix('h') {
            (v, "h")
        } else {
            return Err(format!("invalid duration format: {}", s));
        };

        let value: u64 = value_str
            .trim()
            .parse()
            .map_err(|_| format!("invalid numeric value: {}", value_str))?;

        let duration = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(
                value
                    .checked_mul(60)
                    .ok_or_else(|| format!("duration out of range: {}", s))?,
            ),
            _ => Duration::from_secs(
                value
                    .checked_mul(3600)
                    .ok_or_else(|| format!("duration out of range: {}", s))?,
            ),
        };

        Ok(duration)
    }

    pub fn format_duration(d: Duration) -> String {
        let secs = d.as_secs();
        if d.subsec_millis() != 0 || secs == 0 {
            format!("{}ms", d.as_millis())
        } else if secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_parse_units() {
            assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
            assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
            assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
            assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        }

        #[test]
        fn test_parse_rejects_garbage() {
            assert!(parse_duration("").is_err());
            assert!(parse_duration("10").is_err());
            assert!(parse_duration("fast").is_err());
        }

        #[test]
        fn test_parse_rejects_overflow() {
            assert!(parse_duration(&format!("{}m", u64::MAX)).is_err());
            assert!(parse_duration(&format!("{}h", u64::MAX / 1000)).is_err());
            assert!(parse_duration(&format!("{}s", u64::MAX)).is_ok());
        }

        #[test]
        fn test_format_prefers_largest_unit() {
            assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
            assert_eq!(format_duration(Duration::from_secs(90)), "90s");
            assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
            assert_eq!(format_duration(Duration::ZERO), "0ms");
        }
    }
}
