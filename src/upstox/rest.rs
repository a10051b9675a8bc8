use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use url::Url;

use crate::collaborators::{CredentialProvider, HistoricalLoader};
use crate::config::Interval;
use crate::error::AppError;
use crate::model::candle::Candle;

use super::types::{HistoricalCandleResponse, UpstoxErrorResponse};

pub struct UpstoxRestClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    attempts: u32,
    retry_delay: Duration,
}

impl UpstoxRestClient {
    pub fn new(base_url: &str, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_retry(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// `{base}/v3/historical-candle/{key}/{unit}/{n}/{to}/{from}`, with the
    /// instrument key escaped as a single path segment.
    pub fn historical_url(
        &self,
        instrument_key: &str,
        interval: Interval,
        from_date: NaiveDate,
        to_date: NaiveDate,
    ) -> Result<Url, AppError> {
        let (unit, n) = interval.api_unit();
        let n = n.to_string();
        let to = to_date.format("%Y-%m-%d").to_string();
        let from = from_date.format("%Y-%m-%d").to_string();
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| AppError::Config(format!("invalid rest base url '{}': {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config(format!("rest base url '{}' cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend([
                "v3",
                "historical-candle",
                instrument_key,
                unit,
                n.as_str(),
                to.as_str(),
                from.as_str(),
            ]);
        Ok(url)
    }

    async fn fetch_once(&self, url: &Url) -> Result<Vec<Candle>, AppError> {
        let token = self.credentials.credential()?;
        let resp = self
            .http
            .get(url.clone())
            .bearer_auth(token)
            .header("accept", "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<UpstoxErrorResponse>(&body)
                .ok()
                .and_then(|e| e.summary())
                .unwrap_or(body);
            return Err(AppError::Fetch(format!("status {}: {}", status, detail)));
        }

        let payload: HistoricalCandleResponse = resp.json().await?;
        let rows = payload
            .data
            .and_then(|d| d.candles)
            .unwrap_or_default();
        parse_candle_rows(&rows)
    }
}

#[async_trait]
impl HistoricalLoader for UpstoxRestClient {
    async fn fetch_candles(
        &self,
        instrument_key: &str,
        interval: Interval,
        from_date: NaiveDate,
        to_date: NaiveDate,
    ) -> Result<Vec<Candle>, AppError> {
        let url = self.historical_url(instrument_key, interval, from_date, to_date)?;
        tracing::info!(instrument_key, %interval, %from_date, %to_date, "Fetching historical candles");

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_once(&url).await {
                Ok(candles) => {
                    tracing::info!(instrument_key, count = candles.len(), "Historical candles received");
                    return Ok(candles);
                }
                Err(e) if attempt < self.attempts => {
                    tracing::warn!(instrument_key, attempt, error = %e, "Historical fetch failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    return Err(match e {
                        AppError::Fetch(_) => e,
                        other => AppError::Fetch(other.to_string()),
                    })
                }
            }
        }
    }
}

/// Parse `[time, open, high, low, close, volume, oi]` rows, oldest first.
pub fn parse_candle_rows(rows: &[Vec<Value>]) -> Result<Vec<Candle>, AppError> {
    let mut candles = rows
        .iter()
        .map(|row| parse_candle_row(row))
        .collect::<Result<Vec<_>, _>>()?;
    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

fn parse_candle_row(row: &[Value]) -> Result<Candle, AppError> {
    if row.len() < 5 {
        return Err(AppError::Fetch(format!("candle row too short: {:?}", row)));
    }
    let time = row[0]
        .as_str()
        .ok_or_else(|| AppError::Fetch("candle time is not a string".to_string()))?;
    let open_time = parse_time_ms(time)?;
    let num = |i: usize| -> Result<f64, AppError> {
        row.get(i)
            .and_then(|v| match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .ok_or_else(|| AppError::Fetch(format!("candle field {} is not numeric", i)))
    };
    let volume = if row.len() > 5 { num(5)? } else { 0.0 };
    Ok(Candle::historical(open_time, num(1)?, num(2)?, num(3)?, num(4)?, volume))
}

fn parse_time_ms(s: &str) -> Result<u64, AppError> {
    let ms = DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp_millis())
        .or_else(|_| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").map(|dt| dt.and_utc().timestamp_millis())
        })
        .or_else(|_| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|d| d.and_time(NaiveTime::MIN).and_utc().timestamp_millis())
        })
        .map_err(|e| AppError::Fetch(format!("invalid candle time '{}': {}", s, e)))?;
    u64::try_from(ms).map_err(|_| AppError::Fetch(format!("candle time before epoch: {}", s)))
}
