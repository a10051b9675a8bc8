use chrono::NaiveDate;
use serde::Serialize;

use crate::config::Interval;
use crate::error::AppError;
use crate::model::candle::Candle;
use crate::model::recommendation::{RecommendationRequest, RecommendationResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisState {
    #[default]
    Idle,
    Analyzing,
    Ready,
    Error,
}

impl AnalysisState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Analyzing => "analyzing",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the request is about, apart from the candles.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub instrument_key: &'a str,
    pub symbol: &'a str,
    pub interval: Interval,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
}

/// Analysis lifecycle of one instrument session.
///
/// Each submit gets a new request id and only the latest one may complete
/// the analysis; older completions and completions from another epoch are
/// dropped. A failed analysis keeps the last good recommendation around.
#[derive(Debug, Clone)]
pub struct RecommendationCoordinator {
    epoch: u64,
    horizon: String,
    state: AnalysisState,
    next_request_id: u64,
    outstanding: Option<u64>,
    recommendation: Option<RecommendationResponse>,
    last_error: Option<String>,
}

impl RecommendationCoordinator {
    pub fn new(epoch: u64, horizon: &str) -> Self {
        Self {
            epoch,
            horizon: horizon.to_string(),
            state: AnalysisState::Idle,
            next_request_id: 1,
            outstanding: None,
            recommendation: None,
            last_error: None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    pub fn recommendation(&self) -> Option<&RecommendationResponse> {
        self.recommendation.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Request id of the submit whose completion is still awaited.
    pub fn outstanding(&self) -> Option<u64> {
        self.outstanding
    }

    /// Instrument changed: back to idle under the new epoch, prior
    /// recommendation discarded.
    pub fn reset(&mut self, epoch: u64) {
        self.epoch = epoch;
        self.state = AnalysisState::Idle;
        self.outstanding = None;
        self.recommendation = None;
        self.last_error = None;
    }

    pub fn build_request(
        &self,
        ctx: RequestContext<'_>,
        candles: Vec<Candle>,
    ) -> Result<RecommendationRequest, AppError> {
        if candles.is_empty() {
            return Err(AppError::InvalidRequest(format!(
                "no candles to analyze for {}",
                ctx.instrument_key
            )));
        }
        Ok(RecommendationRequest {
            instrument_key: ctx.instrument_key.to_string(),
            symbol: ctx.symbol.to_string(),
            candles,
            horizon: self.horizon.clone(),
            interval: ctx.interval,
            from_date: ctx.from_date,
            to_date: ctx.to_date,
            epoch: self.epoch,
            request_id: self.next_request_id,
        })
    }

    /// Issue a request for the current window. An empty window is rejected
    /// before anything changes.
    pub fn submit(
        &mut self,
        ctx: RequestContext<'_>,
        candles: Vec<Candle>,
    ) -> Result<RecommendationRequest, AppError> {
        let request = self.build_request(ctx, candles)?;
        if let Some(prev) = self.outstanding {
            tracing::debug!(epoch = self.epoch, superseded = prev, "Superseding outstanding analysis");
        }
        self.next_request_id += 1;
        self.outstanding = Some(request.request_id);
        self.state = AnalysisState::Analyzing;
        tracing::info!(
            epoch = self.epoch,
            request_id = request.request_id,
            instrument_key = %request.instrument_key,
            candles = request.candles.len(),
            "Analysis submitted"
        );
        Ok(request)
    }

    /// Fold an engine reply. Returns false when it was discarded.
    pub fn on_completed(
        &mut self,
        epoch: u64,
        request_id: u64,
        result: Result<RecommendationResponse, String>,
    ) -> bool {
        if epoch != self.epoch || self.outstanding != Some(request_id) {
            tracing::debug!(
                epoch,
                request_id,
                current_epoch = self.epoch,
                outstanding = ?self.outstanding,
                "Discarding stale analysis result"
            );
            return false;
        }
        self.outstanding = None;
        match result {
            Ok(rec) => {
                tracing::info!(epoch, request_id, signal = %rec.signal, confidence = rec.confidence, "Analysis ready");
                self.recommendation = Some(rec);
                self.last_error = None;
                self.state = AnalysisState::Ready;
            }
            Err(message) => {
                tracing::warn!(epoch, request_id, error = %message, "Analysis failed");
                self.last_error = Some(message);
                self.state = AnalysisState::Error;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::signal::Signal;

    fn ctx() -> RequestContext<'static> {
        RequestContext {
            instrument_key: "NSE_EQ|INE002A01018",
            symbol: "RELIANCE",
            interval: Interval::Day,
            from_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            to_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        }
    }

    fn candles() -> Vec<Candle> {
        vec![Candle::historical(0, 100.0, 101.0, 99.0, 100.5, 10.0)]
    }

    fn response(signal: Signal) -> RecommendationResponse {
        RecommendationResponse {
            signal,
            confidence: 0.7,
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            risk_reward: None,
            expected_move_pct: None,
            explanation_points: Vec::new(),
            metrics: Vec::new(),
            caveats: Vec::new(),
            key_levels: Vec::new(),
        }
    }

    #[test]
    fn empty_window_is_rejected_without_state_change() {
        let mut c = RecommendationCoordinator::new(1, "swing");
        let err = c.submit(ctx(), Vec::new()).unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert_eq!(c.state(), AnalysisState::Idle);
        assert_eq!(c.outstanding(), None);
    }

    #[test]
    fn request_carries_epoch_and_session_details() {
        let mut c = RecommendationCoordinator::new(4, "intraday");
        let req = c.submit(ctx(), candles()).unwrap();
        assert_eq!(req.epoch, 4);
        assert_eq!(req.request_id, 1);
        assert_eq!(req.horizon, "intraday");
        assert_eq!(req.symbol, "RELIANCE");
        assert_eq!(c.state(), AnalysisState::Analyzing);
    }

    #[test]
    fn failure_keeps_previous_recommendation() {
        let mut c = RecommendationCoordinator::new(1, "swing");
        let req = c.submit(ctx(), candles()).unwrap();
        assert!(c.on_completed(1, req.request_id, Ok(response(Signal::Buy))));
        assert_eq!(c.state(), AnalysisState::Ready);

        let req = c.submit(ctx(), candles()).unwrap();
        assert!(c.on_completed(1, req.request_id, Err("timeout".to_string())));
        assert_eq!(c.state(), AnalysisState::Error);
        assert_eq!(c.last_error(), Some("timeout"));
        assert_eq!(c.recommendation().map(|r| r.signal), Some(Signal::Buy));
    }

    #[test]
    fn reset_clears_and_drops_late_replies() {
        let mut c = RecommendationCoordinator::new(1, "swing");
        let req = c.submit(ctx(), candles()).unwrap();
        c.reset(2);
        assert_eq!(c.state(), AnalysisState::Idle);
        assert!(!c.on_completed(1, req.request_id, Ok(response(Signal::Sell))));
        assert_eq!(c.state(), AnalysisState::Idle);
        assert!(c.recommendation().is_none());
    }
}
