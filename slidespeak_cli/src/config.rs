use crate::error::{Error, Result};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const API_KEY_VAR: &str = "SLIDE_SPEAK_API_KEY";
pub const BASE_URL_VAR: &str = "SLIDE_SPEAK_BASE_URL";
pub const LOG_FILE_VAR: &str = "SLIDE_SPEAK_LOG_FILE";
pub const MAX_POLLS_VAR: &str = "SLIDE_SPEAK_MAX_POLLS";
pub const POLL_INTERVAL_VAR: &str = "SLIDE_SPEAK_POLL_INTERVAL_SECS";

pub const DEFAULT_BASE_URL: &str = "https://api.slidespeak.co/api/v1";
pub const DEFAULT_LOG_FILE: &str = "presentations.csv";
pub const DEFAULT_LENGTH: u32 = 10;

/// Everything the client needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: Url,
    pub log_path: PathBuf,
    pub poll_interval: Duration,
    /// `None` polls until the task reaches a terminal state.
    pub max_polls: Option<NonZeroU32>,
    pub default_length: u32,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup, so callers other than
    /// `main` never have to touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(API_KEY_VAR)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config(format!("{API_KEY_VAR} environment variable not set")))?;

        let base_url = match lookup(BASE_URL_VAR).filter(|v| !v.trim().is_empty()) {
            Some(raw) => parse_base_url(&raw)?,
            None => parse_base_url(DEFAULT_BASE_URL)?,
        };

        let log_path = lookup(LOG_FILE_VAR)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));

        let max_polls = parse_var::<NonZeroU32>(&lookup, MAX_POLLS_VAR)?;
        let poll_interval = parse_var::<u64>(&lookup, POLL_INTERVAL_VAR)?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(2));

        Ok(Self {
            api_key,
            base_url,
            log_path,
            poll_interval,
            max_polls,
            default_length: DEFAULT_LENGTH,
            request_timeout: Duration::from_secs(30),
        })
    }

    pub fn with_base_url(mut self, raw: &str) -> Result<Self> {
        self.base_url = parse_base_url(raw)?;
        Ok(self)
    }
}

/// Normalizes the base so `Url::join` appends endpoint paths instead of
/// replacing the last segment.
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash).map_err(|e| Error::Config(format!("invalid base URL {trimmed:?}: {e}")))
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}"))),
        None => Ok(None),
    }
}
