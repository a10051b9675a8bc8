use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub upstox: UpstoxConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub indicator: IndicatorConfig,
    pub recommendation: RecommendationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstoxConfig {
    pub rest_base_url: String,
    pub ws_url: String,
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    #[serde(default = "default_fetch_retry_delay_ms")]
    pub fetch_retry_delay_ms: u64,
    #[serde(skip)]
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub instrument_key: String,
    pub symbol: String,
    pub interval: Interval,
    #[serde(default)]
    pub from_date: Option<NaiveDate>,
    #[serde(default)]
    pub to_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub heartbeat_interval_ms: u64,
    pub stall_threshold_ms: u64,
    pub tick_buffer_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            stall_threshold_ms: 15_000,
            tick_buffer_capacity: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub sma_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self { sma_period: 20 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationConfig {
    pub endpoint: String,
    #[serde(default = "default_horizon")]
    pub horizon: String,
    #[serde(default = "default_max_candles")]
    pub max_candles: usize,
    #[serde(default = "default_true")]
    pub auto_submit: bool,
    #[serde(default = "default_recommendation_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_fetch_attempts() -> u32 {
    3
}

fn default_fetch_retry_delay_ms() -> u64 {
    1_000
}

fn default_horizon() -> String {
    "swing".to_string()
}

fn default_max_candles() -> usize {
    400
}

fn default_true() -> bool {
    true
}

fn default_recommendation_timeout_ms() -> u64 {
    60_000
}

/// Candle interval accepted by the historical API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    OneMinute,
    ThirtyMinute,
    Day,
    Week,
    Month,
}

impl Interval {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "1minute" => Ok(Self::OneMinute),
            "30minute" => Ok(Self::ThirtyMinute),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => bail!(
                "invalid interval '{}': expected one of 1minute/30minute/day/week/month",
                other
            ),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1minute",
            Self::ThirtyMinute => "30minute",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Unit and multiplier path segments of the v3 historical candle endpoint.
    pub fn api_unit(&self) -> (&'static str, u32) {
        match self {
            Self::OneMinute => ("minutes", 1),
            Self::ThirtyMinute => ("minutes", 30),
            Self::Day => ("days", 1),
            Self::Week => ("weeks", 1),
            Self::Month => ("months", 1),
        }
    }

    /// Longest range the historical API serves for this interval.
    pub fn max_lookback_days(&self) -> i64 {
        match self {
            Self::OneMinute => 30,
            Self::ThirtyMinute => 90,
            Self::Day | Self::Week | Self::Month => 3_650,
        }
    }

    /// Default a missing start, order the bounds, and clamp the start into
    /// the lookback window ending at `to`.
    pub fn normalize_range(&self, from: Option<NaiveDate>, to: NaiveDate) -> (NaiveDate, NaiveDate) {
        let window = Duration::days(self.max_lookback_days() - 1);
        let (mut start, end) = match from {
            Some(from) if from > to => (to, from),
            Some(from) => (from, to),
            None => (to - window, to),
        };
        let min_allowed = end - window;
        if start < min_allowed {
            start = min_allowed;
        }
        (start, end)
    }
}

impl TryFrom<String> for Interval {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Interval::parse(&value).map_err(|e| e.to_string())
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn config_path() -> PathBuf {
    std::env::var("SIGNAL_DESK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/default.toml"))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_path(&config_path())?;

        config.upstox.access_token = std::env::var("UPSTOX_ACCESS_TOKEN")
            .context("UPSTOX_ACCESS_TOKEN not set in .env or environment")?;
        config.recommendation.api_key = std::env::var("RECOMMENDATION_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream.tick_buffer_capacity == 0 {
            bail!("stream.tick_buffer_capacity must be > 0");
        }
        if self.stream.heartbeat_interval_ms == 0 {
            bail!("stream.heartbeat_interval_ms must be > 0");
        }
        if self.indicator.sma_period == 0 {
            bail!("indicator.sma_period must be > 0");
        }
        if self.session.instrument_key.trim().is_empty() {
            bail!("session.instrument_key must not be empty");
        }
        if self.recommendation.max_candles == 0 {
            bail!("recommendation.max_candles must be > 0");
        }
        Ok(())
    }
}
