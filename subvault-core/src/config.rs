use crate::error::ConfigError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which collection strategies run, and in what order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Sort,
    Time,
    Search,
    User,
}

fn default_strategy_order() -> Vec<StrategyKind> {
    // Sort/time/search seed the author set the user strategy draws from.
    vec![
        StrategyKind::Sort,
        StrategyKind::Time,
        StrategyKind::Search,
        StrategyKind::User,
    ]
}

fn default_max_requests_per_minute() -> u32 {
    60
}

fn default_page_size() -> u32 {
    100
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_backoff_base_secs() -> u64 {
    1
}

fn default_backoff_cap_secs() -> u64 {
    300
}

fn default_user_strategy_cap() -> usize {
    50
}

fn default_database_path() -> String {
    "reddit_data.db".to_string()
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid literal date")
}

fn default_search_terms() -> Vec<String> {
    [
        "question",
        "help",
        "issue",
        "problem",
        "tutorial",
        "guide",
        "announcement",
        "update",
        "discussion",
        "review",
        "comparison",
        "tips",
        "tricks",
        "best",
        "worst",
        "opinion",
        "thoughts",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Static run configuration. Loaded once at startup and never re-read
/// mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Target subreddit, without the r/ prefix.
    pub subreddit: String,

    /// Reddit requires a descriptive user agent including a username.
    pub user_agent: String,

    /// Script-app credentials. Overridable via REDDIT_CLIENT_ID and
    /// REDDIT_CLIENT_SECRET.
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,

    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    /// Floor for the time-segmented strategy, usually the community
    /// creation month.
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,

    #[serde(default = "default_search_terms")]
    pub search_terms: Vec<String>,

    /// How many discovered authors the user strategy visits.
    #[serde(default = "default_user_strategy_cap")]
    pub user_strategy_cap: usize,

    #[serde(default = "default_strategy_order")]
    pub strategy_order: Vec<StrategyKind>,
}

impl ScraperConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut config: ScraperConfig = toml::from_str(raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("REDDIT_CLIENT_ID") {
            self.client_id = id;
        }
        if let Ok(secret) = std::env::var("REDDIT_CLIENT_SECRET") {
            self.client_secret = secret;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.subreddit.is_empty() {
            return Err(ConfigError::MissingField {
                field: "subreddit".to_string(),
            });
        }
        if self.user_agent.is_empty() {
            return Err(ConfigError::MissingField {
                field: "user_agent".to_string(),
            });
        }
        if self.max_requests_per_minute == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_requests_per_minute".to_string(),
                value: "0".to_string(),
            });
        }
        if self.page_size == 0 || self.page_size > 100 {
            return Err(ConfigError::InvalidValue {
                field: "page_size".to_string(),
                value: self.page_size.to_string(),
            });
        }
        if self.strategy_order.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "strategy_order".to_string(),
                value: "[]".to_string(),
            });
        }
        Ok(())
    }

    /// Scraping needs API credentials; the read-only subcommands do not,
    /// so this is checked separately from `validate`.
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        if self.client_id.is_empty() {
            return Err(ConfigError::MissingEnvironmentVariable {
                var_name: "REDDIT_CLIENT_ID".to_string(),
            });
        }
        if self.client_secret.is_empty() {
            return Err(ConfigError::MissingEnvironmentVariable {
                var_name: "REDDIT_CLIENT_SECRET".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        subreddit = "notebooklm"
        user_agent = "subvault/0.1 by example_user"
        client_id = "abc"
        client_secret = "def"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = ScraperConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.max_requests_per_minute, 60);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.start_date, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(config.strategy_order.len(), 4);
        assert!(config.search_terms.contains(&"question".to_string()));
    }

    #[test]
    fn missing_subreddit_is_rejected() {
        let raw = r#"
            subreddit = ""
            user_agent = "subvault/0.1"
            client_id = "abc"
            client_secret = "def"
        "#;
        assert!(matches!(
            ScraperConfig::from_toml_str(raw),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn oversized_page_is_rejected() {
        let raw = r#"
            subreddit = "notebooklm"
            user_agent = "subvault/0.1"
            client_id = "abc"
            client_secret = "def"
            page_size = 500
        "#;
        assert!(matches!(
            ScraperConfig::from_toml_str(raw),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn credentials_are_only_required_for_scraping() {
        let raw = r#"
            subreddit = "notebooklm"
            user_agent = "subvault/0.1"
        "#;
        let config = ScraperConfig::from_toml_str(raw).unwrap();
        assert!(matches!(
            config.require_credentials(),
            Err(ConfigError::MissingEnvironmentVariable { .. })
        ));
    }

    #[test]
    fn custom_strategy_order_parses() {
        let raw = r#"
            subreddit = "notebooklm"
            user_agent = "subvault/0.1"
            client_id = "abc"
            client_secret = "def"
            strategy_order = ["search", "sort"]
        "#;
        let config = ScraperConfig::from_toml_str(raw).unwrap();
        assert_eq!(
            config.strategy_order,
            vec![StrategyKind::Search, StrategyKind::Sort]
        );
    }
}
