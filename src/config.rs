//! Runtime configuration.
//!
//! Everything is read from the environment once at startup (a `.env` file is
//! honoured via `dotenvy` in `main`) and then passed around by reference.

use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_NOTION_API_URL: &str = "https://api.notion.com/v1";
const DEFAULT_FLAG_PROPERTY: &str = "Active";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
const DEFAULT_OCR_TIMEOUT_SECS: u64 = 120;

/// Fatal configuration problems. Raised before any request is made.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("Invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("Unknown scan strategy '{0}' (expected 'explicit-flag' or 'recency-window')")]
    UnknownStrategy(String),
}

/// Which pages are candidates for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStrategy {
    /// Pages whose checkbox property is ticked.
    ExplicitFlag { property: String },
    /// Pages created within the last `window_minutes` (plus one minute of slack).
    RecencyWindow { window_minutes: u32 },
}

impl ScanStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExplicitFlag { .. } => "explicit-flag",
            Self::RecencyWindow { .. } => "recency-window",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotionSettings {
    pub token: String,
    pub database_id: String,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub endpoint: String,
    pub api_key: String,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub notion: NotionSettings,
    pub ocr: OcrSettings,
    pub strategy: ScanStrategy,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let notion = NotionSettings {
            token: required("NOTION_TOKEN")?,
            database_id: required("DATABASE_ID")?,
            api_url: get("NOTION_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_NOTION_API_URL.to_string()),
        };

        let ocr = OcrSettings {
            endpoint: required("MICROSOFT_ENDPOINT")?
                .trim_end_matches('/')
                .to_string(),
            api_key: required("MICROSOFT_API_KEY")?,
            poll_interval: Duration::from_secs(parse_secs(
                "OCR_POLL_INTERVAL_SECS",
                get("OCR_POLL_INTERVAL_SECS"),
                DEFAULT_POLL_INTERVAL_SECS,
            )?),
            timeout: Duration::from_secs(parse_secs(
                "OCR_TIMEOUT_SECS",
                get("OCR_TIMEOUT_SECS"),
                DEFAULT_OCR_TIMEOUT_SECS,
            )?),
        };

        // The window only matters to the recency strategy and is parsed lazily.
        let window = || get("SCAN_WINDOW_MINUTES").or_else(|| get("SCAN_FREQUENCY"));

        let strategy = match get("SCAN_STRATEGY").as_deref().map(str::trim) {
            Some("explicit-flag") => ScanStrategy::ExplicitFlag {
                property: get("OCR_FLAG_PROPERTY")
                    .unwrap_or_else(|| DEFAULT_FLAG_PROPERTY.to_string()),
            },
            Some("recency-window") | None => match window() {
                Some(raw) => ScanStrategy::RecencyWindow {
                    window_minutes: parse_window(&raw)?,
                },
                None => return Err(ConfigError::Missing("SCAN_WINDOW_MINUTES")),
            },
            Some(other) => return Err(ConfigError::UnknownStrategy(other.to_string())),
        };

        Ok(Self {
            notion,
            ocr,
            strategy,
        })
    }
}

fn parse_window(raw: &str) -> Result<u32, ConfigError> {
    match raw.trim().parse::<u32>() {
        Ok(0) => Err(ConfigError::Invalid {
            name: "SCAN_WINDOW_MINUTES",
            value: raw.to_string(),
            reason: "must be greater than zero",
        }),
        Ok(minutes) => Ok(minutes),
        Err(_) => Err(ConfigError::Invalid {
            name: "SCAN_WINDOW_MINUTES",
            value: raw.to_string(),
            reason: "not a whole number of minutes",
        }),
    }
}

fn parse_secs(name: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(ConfigError::Invalid {
            name,
            value: raw,
            reason: "expected a positive number of seconds",
        }),
    }
}
