use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Backend credentials and external tool settings, passed explicitly into the
/// generator client and media toolkit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub endpoint: String,
    pub deployment: String,
    pub api_key: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_bin: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe_bin: String,
    #[serde(default = "default_size")]
    pub default_size: String,
}

fn default_api_version() -> String {
    "preview".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_poll_timeout() -> u64 {
    1800
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_size() -> String {
    "1280x720".to_string()
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).await.map_err(|e| {
            ChainError::configuration(format!(
                "failed to read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: Config = serde_json::from_str(&content).map_err(|e| {
            ChainError::configuration(format!(
                "failed to parse config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        config.normalized()
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ChainError::configuration(format!("{} missing", key)))
        };
        let number = |key: &str, fallback: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                    ChainError::configuration(format!("{} is not a number: {}", key, raw))
                }),
                None => Ok(fallback),
            }
        };

        let config = Config {
            endpoint: required("AZURE_OPENAI_ENDPOINT")?,
            deployment: required("AZURE_OPENAI_DEPLOYMENT")?,
            api_key: required("AZURE_OPENAI_API_KEY")?,
            api_version: lookup("AZURE_OPENAI_API_VERSION").unwrap_or_else(default_api_version),
            poll_interval_secs: number("CLIP_CHAIN_POLL_INTERVAL", default_poll_interval())?,
            poll_timeout_secs: number("CLIP_CHAIN_POLL_TIMEOUT", default_poll_timeout())?,
            ffmpeg_bin: lookup("FFMPEG_BIN").unwrap_or_else(default_ffmpeg),
            ffprobe_bin: lookup("FFPROBE_BIN").unwrap_or_else(default_ffprobe),
            default_size: default_size(),
        };
        config.normalized()
    }

    fn normalized(mut self) -> Result<Self> {
        if self.endpoint.trim().is_empty() {
            return Err(ChainError::configuration("endpoint missing"));
        }
        if self.deployment.trim().is_empty() {
            return Err(ChainError::configuration("deployment missing"));
        }
        if self.api_key.trim().is_empty() {
            return Err(ChainError::configuration("api_key missing"));
        }
        if self.poll_interval_secs == 0 {
            return Err(ChainError::configuration("poll interval must be at least 1s"));
        }
        if self.poll_timeout_secs == 0 {
            return Err(ChainError::configuration("poll timeout must be at least 1s"));
        }
        if !self.endpoint.ends_with('/') {
            self.endpoint.push('/');
        }
        Ok(self)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_config_defaults_and_endpoint_slash() {
        let config = Config::from_lookup(lookup_from(&[
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com"),
            ("AZURE_OPENAI_DEPLOYMENT", "sora-2"),
            ("AZURE_OPENAI_API_KEY", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint, "https://example.openai.azure.com/");
        assert_eq!(config.api_version, "preview");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.ffmpeg_bin, "ffmpeg");
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let err = Config::from_lookup(lookup_from(&[
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com/"),
            ("AZURE_OPENAI_DEPLOYMENT", "sora-2"),
        ]))
        .unwrap_err();

        assert!(matches!(err, ChainError::Configuration(ref m) if m.contains("AZURE_OPENAI_API_KEY")));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com/"),
            ("AZURE_OPENAI_DEPLOYMENT", "sora-2"),
            ("AZURE_OPENAI_API_KEY", "secret"),
            ("CLIP_CHAIN_POLL_INTERVAL", "0"),
        ]))
        .unwrap_err();

        assert!(matches!(err, ChainError::Configuration(_)));
    }

    #[test]
    fn test_zero_poll_timeout_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com/"),
            ("AZURE_OPENAI_DEPLOYMENT", "sora-2"),
            ("AZURE_OPENAI_API_KEY", "secret"),
            ("CLIP_CHAIN_POLL_TIMEOUT", "0"),
        ]))
        .unwrap_err();

        match err {
            ChainError::Configuration(msg) => assert!(msg.contains("poll timeout")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"endpoint":"https://e.example/","deployment":"sora-2","api_key":"k","poll_interval_secs":2}"#,
        )
        .unwrap();

        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.poll_timeout_secs, 1800);
        assert_eq!(config.default_size, "1280x720");
    }
}
