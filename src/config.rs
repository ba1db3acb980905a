//! Configuration management for the election engine
//!
//! Loads settings from environment variables (and a `.env` file when present)
//! with validation.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Longest election duration accepted, one year
pub const MAX_ELECTION_HOURS: i64 = 24 * 366;

/// Parameters governing ballots and vote weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Path of the SQLite database, `:memory:` for an in-process store
    pub database_url: String,

    /// Weight of a vote cast by an inner-circle member
    pub weight_inner: f64,

    /// Weight of a vote cast by an outer-circle member
    pub weight_outer: f64,

    /// Number of books placed on a newly opened ballot
    pub ballot_size: usize,

    /// How many closed ballots a book may appear on before it is retired
    pub max_appearances: u32,

    /// Staging mode skips the positive-engagement filter
    pub is_staging: bool,

    /// Default election duration in hours
    pub election_hours: i64,

    /// Send a closing reminder this many hours before the deadline
    pub reminder_lead_hours: Option<i64>,
}

impl ElectionConfig {
    /// Load election configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "bookclub.db".to_string());

        let weight_inner = parse_var("VOTE_WEIGHT_INNER", "100")?;
        let weight_outer = parse_var("VOTE_WEIGHT_OUTER", "30")?;
        let ballot_size = parse_var("BALLOT_SIZE", "5")?;
        let max_appearances = parse_var("MAX_APPEARANCES", "3")?;
        let election_hours = parse_var("ELECTION_HOURS", "72")?;

        let is_staging = std::env::var("IS_STAGING")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let reminder_lead_hours = parse_optional(
            "REMINDER_LEAD_HOURS",
            std::env::var("REMINDER_LEAD_HOURS").ok(),
        )?;

        let config = Self {
            database_url,
            weight_inner,
            weight_outer,
            ballot_size,
            max_appearances,
            is_staging,
            election_hours,
            reminder_lead_hours,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        Self {
            database_url: ":memory:".to_string(),
            weight_inner: 100.0,
            weight_outer: 30.0,
            ballot_size: 5,
            max_appearances: 3,
            is_staging: false,
            election_hours: 72,
            reminder_lead_hours: None,
        }
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.ballot_size == 0 {
            return Err(Error::config("BALLOT_SIZE must be at least 1"));
        }
        if self.max_appearances == 0 {
            return Err(Error::config("MAX_APPEARANCES must be at least 1"));
        }
        if self.weight_inner <= 0.0 || self.weight_outer <= 0.0 {
            return Err(Error::config("vote weights must be positive"));
        }
        if self.weight_outer > self.weight_inner {
            return Err(Error::config(
                "VOTE_WEIGHT_OUTER must not exceed VOTE_WEIGHT_INNER",
            ));
        }
        if !(1..=MAX_ELECTION_HOURS).contains(&self.election_hours) {
            return Err(Error::config(format!(
                "ELECTION_HOURS must be between 1 and {MAX_ELECTION_HOURS}"
            )));
        }
        if let Some(lead) = self.reminder_lead_hours {
            if lead <= 0 || lead >= self.election_hours {
                return Err(Error::config(
                    "REMINDER_LEAD_HOURS must be positive and shorter than ELECTION_HOURS",
                ));
            }
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| Error::config(format!("Invalid {name}")))
}

/// Unset or blank means `None`; anything else must parse
fn parse_optional<T: std::str::FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| Error::config(format!("Invalid {name}"))),
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub election: ElectionConfig,
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self> {
        let election = ElectionConfig::from_env()?;

        let logging = LoggingConfig {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
        };

        Ok(Self { election, logging })
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        Self {
            election: ElectionConfig::for_testing(),
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_testing_config_is_valid() {
        let config = Config::for_testing();
        assert!(config.election.validate().is_ok());
        assert_eq!(config.election.database_url, ":memory:");
        assert!(!config.election.is_staging);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let zero_ballot = ElectionConfig {
            ballot_size: 0,
            ..ElectionConfig::for_testing()
        };
        assert!(zero_ballot.validate().is_err());

        let inverted_weights = ElectionConfig {
            weight_inner: 10.0,
            weight_outer: 50.0,
            ..ElectionConfig::for_testing()
        };
        assert!(inverted_weights.validate().is_err());

        let long_reminder = ElectionConfig {
            reminder_lead_hours: Some(72),
            ..ElectionConfig::for_testing()
        };
        assert!(long_reminder.validate().is_err());
    }

    #[test]
    fn test_optional_var_rejects_garbage() {
        let unset: Option<i64> = parse_optional("REMINDER_LEAD_HOURS", None).unwrap();
        assert_eq!(unset, None);
        let blank: Option<i64> = parse_optional("REMINDER_LEAD_HOURS", Some(" ".into())).unwrap();
        assert_eq!(blank, None);
        let set: Option<i64> = parse_optional("REMINDER_LEAD_HOURS", Some("12".into())).unwrap();
        assert_eq!(set, Some(12));

        let bad = parse_optional::<i64>("REMINDER_LEAD_HOURS", Some("twelve".into()));
        assert!(matches!(bad, Err(Error::Config { .. })));
    }

    #[test]
    fn test_election_hours_upper_bound() {
        let endless = ElectionConfig {
            election_hours: 10_000_000_000,
            ..ElectionConfig::for_testing()
        };
        assert!(endless.validate().is_err());

        let year = ElectionConfig {
            election_hours: MAX_ELECTION_HOURS,
            ..ElectionConfig::for_testing()
        };
        assert!(year.validate().is_ok());
    }

    #[test]
    fn test_parse_var_default() {
        let size: usize = parse_var("BOOKCLUB_TEST_UNSET_VARIABLE", "7").unwrap();
        assert_eq!(size, 7);
    }
}
