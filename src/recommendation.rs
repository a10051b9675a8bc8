use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::collaborators::RecommendationEngine;
use crate::error::AppError;
use crate::indicator::studies::annotate;
use crate::model::recommendation::{RecommendationRequest, RecommendationResponse};

pub const DEFAULT_MAX_CANDLES: usize = 400;

/// Recommendation engine reached over HTTPS.
///
/// Studies are computed over the whole request window, then only the last
/// `max_candles` rows are sent.
pub struct HttpRecommendationEngine {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    max_candles: usize,
}

impl HttpRecommendationEngine {
    pub fn new(endpoint: &str, timeout: Duration, api_key: Option<String>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            max_candles: DEFAULT_MAX_CANDLES,
        })
    }

    pub fn with_max_candles(mut self, max_candles: usize) -> Self {
        self.max_candles = max_candles.max(1);
        self
    }

    pub fn payload(&self, request: &RecommendationRequest) -> Value {
        let rows = annotate(&request.candles);
        let tail = &rows[rows.len().saturating_sub(self.max_candles)..];
        json!({
            "instrument_key": request.instrument_key,
            "symbol": request.symbol,
            "horizon": request.horizon,
            "interval": request.interval.as_str(),
            "from_date": request.from_date.format("%Y-%m-%d").to_string(),
            "to_date": request.to_date.format("%Y-%m-%d").to_string(),
            "epoch": request.epoch,
            "request_id": request.request_id,
            "latest_close": request.candles.last().map(|c| c.close),
            "candle_count": request.candles.len(),
            "candles": tail,
        })
    }
}

#[async_trait]
impl RecommendationEngine for HttpRecommendationEngine {
    async fn analyze(&self, request: &RecommendationRequest) -> Result<RecommendationResponse, AppError> {
        let mut builder = self.http.post(&self.endpoint).json(&self.payload(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| AppError::Analysis(format!("request failed: {}", e)))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AppError::Analysis(format!("read body failed: {}", e)))?;
        if !status.is_success() {
            return Err(AppError::Analysis(format!("status {}: {}", status, body)));
        }
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| AppError::Analysis(format!("invalid JSON reply: {}", e)))?;
        RecommendationResponse::from_value(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Interval;
    use crate::model::candle::Candle;
    use chrono::NaiveDate;

    fn request(n: usize) -> RecommendationRequest {
        let candles = (0..n)
            .map(|i| {
                let p = 100.0 + i as f64;
                Candle::historical(i as u64 * 86_400_000, p, p + 1.0, p - 1.0, p + 0.5, 1_000.0)
            })
            .collect();
        RecommendationRequest {
            instrument_key: "NSE_EQ|INE002A01018".to_string(),
            symbol: "RELIANCE".to_string(),
            candles,
            horizon: "swing".to_string(),
            interval: Interval::Day,
            from_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            to_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            epoch: 3,
            request_id: 9,
        }
    }

    #[test]
    fn payload_sends_tail_with_studies() {
        let engine = HttpRecommendationEngine::new("http://localhost:8000/analyze", Duration::from_secs(1), None)
            .unwrap()
            .with_max_candles(10);
        let body = engine.payload(&request(60));
        let rows = body["candles"].as_array().unwrap();
        assert_eq!(rows.len(), 10);
        assert_eq!(body["candle_count"], 60);
        assert_eq!(body["interval"], "day");
        assert_eq!(body["from_date"], "2024-01-01");
        assert_eq!(body["latest_close"].as_f64(), Some(159.5));
        // sma_50 needs the full window, not just the tail
        assert!(rows[0]["sma_50"].is_number());
    }

    #[test]
    fn blank_api_key_is_ignored() {
        let engine =
            HttpRecommendationEngine::new("http://localhost:8000/analyze", Duration::from_secs(1), Some(" ".into()))
                .unwrap();
        assert!(engine.api_key.is_none());
    }
}
