use serde::Deserialize;
use std::path::Path;

use crate::models::GeoPoint;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Refresh interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Upper bound on sources polled at the same time
    #[serde(default = "default_max_concurrent_polls")]
    pub max_concurrent_polls: usize,
    #[serde(default)]
    pub organisations: Vec<OrganisationConfig>,
}

fn default_refresh_interval() -> u64 {
    15
}

fn default_max_concurrent_polls() -> usize {
    4
}

fn default_source_type() -> String {
    "RSS".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrganisationConfig {
    pub name: String,
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(rename = "type", default = "default_source_type")]
    pub source_type: String,
    pub filter: Option<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_polls == 0 {
            anyhow::bail!("max_concurrent_polls must be at least 1");
        }
        if self.refresh_interval == 0 {
            anyhow::bail!("refresh_interval must be at least 1 minute");
        }
        Ok(())
    }

    pub fn source_count(&self) -> usize {
        self.organisations.iter().map(|o| o.sources.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        assert_eq!(default_refresh_interval(), 15);
        assert_eq!(default_max_concurrent_polls(), 4);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
            refresh_interval = 30
            max_concurrent_polls = 8

            [[organisations]]
            name = "Town Gazette"
            location = { lat = 52.52, lng = 13.40 }

            [[organisations.sources]]
            name = "Gazette RSS"
            url = "https://gazette.example.com/rss"
            filter = "election"

            [[organisations.sources]]
            name = "Gazette desk"
            url = "https://gazette.example.com/local"
            type = "local"

            [[organisations]]
            name = "Radio Nord"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.refresh_interval, 30);
        assert_eq!(config.max_concurrent_polls, 8);
        assert_eq!(config.organisations.len(), 2);
        assert_eq!(config.source_count(), 2);

        let gazette = &config.organisations[0];
        assert_eq!(gazette.location, Some(GeoPoint::new(52.52, 13.40)));
        assert_eq!(gazette.sources[0].source_type, "RSS");
        assert_eq!(gazette.sources[0].filter.as_deref(), Some("election"));
        assert_eq!(gazette.sources[1].source_type, "local");

        let radio = &config.organisations[1];
        assert!(radio.location.is_none());
        assert!(radio.sources.is_empty());
    }

    #[test]
    fn test_load_config_with_defaults() {
        let config = Config::from_str("").unwrap();

        assert_eq!(config.refresh_interval, 15);
        assert_eq!(config.max_concurrent_polls, 4);
        assert!(config.organisations.is_empty());
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let content = "this is not valid toml {{{";

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let result = Config::load(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_source_missing_url() {
        let content = r#"
            [[organisations]]
            name = "Gazette"

            [[organisations.sources]]
            name = "Gazette RSS"
            # Missing url field
        "#;

        let result = Config::from_str(content);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = Config::from_str("max_concurrent_polls = 0");
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_refresh_interval_rejected() {
        let result = Config::from_str("refresh_interval = 0");
        assert!(result.is_err());
    }
}
