use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::stream::BoxStream;

use crate::config::Interval;
use crate::error::AppError;
use crate::model::candle::Candle;
use crate::model::recommendation::{RecommendationRequest, RecommendationResponse};

/// Source of authoritative candles, ascending by `open_time`.
#[async_trait]
pub trait HistoricalLoader: Send + Sync {
    async fn fetch_candles(
        &self,
        instrument_key: &str,
        interval: Interval,
        from_date: NaiveDate,
        to_date: NaiveDate,
    ) -> Result<Vec<Candle>, AppError>;
}

/// Stream of raw JSON feed envelopes for one instrument.
pub type FeedStream = BoxStream<'static, Result<String, AppError>>;

#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Resolves once the channel is open; the stream ends on close.
    async fn subscribe(&self, instrument_key: &str, credential: &str) -> Result<FeedStream, AppError>;
}

#[async_trait]
pub trait RecommendationEngine: Send + Sync {
    async fn analyze(&self, request: &RecommendationRequest) -> Result<RecommendationResponse, AppError>;
}

/// Supplies a bearer credential. Token refresh is the provider's concern.
pub trait CredentialProvider: Send + Sync {
    fn credential(&self) -> Result<String, AppError>;
}

/// A fixed token, e.g. read once from the environment.
#[derive(Debug, Clone)]
pub struct StaticCredential(pub String);

impl CredentialProvider for StaticCredential {
    fn credential(&self) -> Result<String, AppError> {
        if self.0.trim().is_empty() {
            return Err(AppError::Connection("no access token available".to_string()));
        }
        Ok(self.0.clone())
    }
}
