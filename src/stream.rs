use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::collaborators::FeedTransport;
use crate::error::AppError;
use crate::event::SessionEvent;
use crate::model::tick::Tick;
use crate::upstox::types::{FeedEnvelope, FeedRecord};

/// Decodes feed envelopes for one subscribed instrument into ticks.
///
/// Malformed envelopes and records are logged and skipped; they never end
/// the connection.
#[derive(Debug, Clone)]
pub struct StreamIngestor {
    instrument_key: String,
    last_tick_timestamp: Option<u64>,
    decoded: u64,
    skipped: u64,
}

impl StreamIngestor {
    pub fn new(instrument_key: &str) -> Self {
        Self {
            instrument_key: instrument_key.to_string(),
            last_tick_timestamp: None,
            decoded: 0,
            skipped: 0,
        }
    }

    pub fn instrument_key(&self) -> &str {
        &self.instrument_key
    }

    /// Highest tick timestamp seen so far.
    pub fn last_tick_timestamp(&self) -> Option<u64> {
        self.last_tick_timestamp
    }

    pub fn decoded_count(&self) -> u64 {
        self.decoded
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped
    }

    pub fn on_message(&mut self, raw: &str) -> Vec<Tick> {
        let envelope: FeedEnvelope = match serde_json::from_str(raw) {
            Ok(env) => env,
            Err(e) => {
                self.skipped += 1;
                tracing::debug!(error = %e, "Failed to parse feed envelope");
                return Vec::new();
            }
        };

        let mut ticks = Vec::with_capacity(envelope.feeds.len());
        for (key, record) in &envelope.feeds {
            match self.decode_record(key, record, envelope.current_ts) {
                Ok(tick) => {
                    self.last_tick_timestamp = Some(
                        self.last_tick_timestamp
                            .map_or(tick.timestamp_ms, |t| t.max(tick.timestamp_ms)),
                    );
                    self.decoded += 1;
                    ticks.push(tick);
                }
                Err(e) => {
                    self.skipped += 1;
                    tracing::debug!(feed_key = %key, error = %e, "Skipping feed record");
                }
            }
        }
        ticks
    }

    fn decode_record(&self, key: &str, record: &Value, current_ts: Option<u64>) -> Result<Tick, AppError> {
        if key != self.instrument_key {
            return Err(AppError::Decode(format!("unsubscribed instrument {}", key)));
        }
        let record: FeedRecord = serde_json::from_value(record.clone())
            .map_err(|e| AppError::Decode(e.to_string()))?;
        let full = record
            .full_feed
            .ok_or_else(|| AppError::Decode("missing fullFeed".to_string()))?;
        let body = full
            .index_ff
            .or(full.market_ff)
            .ok_or_else(|| AppError::Decode("missing indexFF/marketFF".to_string()))?;
        let ltpc = body
            .ltpc
            .ok_or_else(|| AppError::Decode("missing ltpc".to_string()))?;
        let ltp = ltpc
            .ltp
            .filter(|p| p.is_finite())
            .ok_or_else(|| AppError::Decode("missing ltp".to_string()))?;

        Ok(Tick {
            ltp,
            change_abs: ltpc.cp.unwrap_or(0.0),
            change_pct: ltpc.chp.unwrap_or(0.0),
            timestamp_ms: ltpc.ltt.or(current_ts).unwrap_or_else(crate::now_ms),
            volume: ltpc.volume,
        })
    }

    /// Open the feed for this instrument on a background task. Ticks and
    /// channel events are posted to `inbox` tagged with `epoch` and `feed_id`.
    pub fn connect(
        mut self,
        transport: Arc<dyn FeedTransport>,
        credential: String,
        epoch: u64,
        feed_id: u64,
        inbox: mpsc::Sender<SessionEvent>,
    ) -> FeedSubscription {
        let (shutdown_tx, mut shutdown) = watch::channel(false);
        let task = tokio::spawn(async move {
            let subscribed = tokio::select! {
                res = transport.subscribe(&self.instrument_key, &credential) => res,
                _ = shutdown.changed() => return,
            };
            let mut stream = match subscribed {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(instrument_key = %self.instrument_key, epoch, feed_id, error = %e, "Feed subscribe failed");
                    let _ = inbox
                        .send(SessionEvent::ErrorOccurred {
                            epoch,
                            feed_id,
                            message: e.to_string(),
                        })
                        .await;
                    return;
                }
            };
            if inbox.send(SessionEvent::Connected { epoch, feed_id }).await.is_err() {
                return;
            }

            loop {
                tokio::select! {
                    msg = stream.next() => {
                        match msg {
                            Some(Ok(text)) => {
                                for tick in self.on_message(&text) {
                                    if inbox.send(SessionEvent::TickReceived { epoch, feed_id, tick }).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                let _ = inbox
                                    .send(SessionEvent::ErrorOccurred { epoch, feed_id, message: e.to_string() })
                                    .await;
                                return;
                            }
                            None => {
                                let _ = inbox.send(SessionEvent::Closed { epoch, feed_id }).await;
                                return;
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::debug!(
                            epoch,
                            feed_id,
                            decoded = self.decoded,
                            skipped = self.skipped,
                            "Feed task stopping"
                        );
                        return;
                    }
                }
            }
        });

        FeedSubscription {
            epoch,
            feed_id,
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }
}

/// Handle to a running feed task.
#[derive(Debug)]
pub struct FeedSubscription {
    epoch: u64,
    feed_id: u64,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn feed_id(&self) -> u64 {
        self.feed_id
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the feed. Safe to call any number of times.
    pub fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.shutdown.send(true);
            task.abort();
            tracing::debug!(epoch = self.epoch, feed_id = self.feed_id, "Feed disconnected");
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "NSE_EQ|INE002A01018";

    fn envelope(body: &str) -> String {
        format!(r#"{{"feeds":{{"{}":{}}},"currentTs":"1700000000000"}}"#, KEY, body)
    }

    #[test]
    fn decodes_market_and_index_records() {
        let mut ing = StreamIngestor::new(KEY);
        let raw = envelope(r#"{"fullFeed":{"marketFF":{"ltpc":{"ltp":2501.5,"cp":12.5,"chp":"0.5","volume":100}}}}"#);
        let ticks = ing.on_message(&raw);
        assert_eq!(ticks.len(), 1);
        assert!((ticks[0].ltp - 2501.5).abs() < f64::EPSILON);
        assert!((ticks[0].change_pct - 0.5).abs() < f64::EPSILON);
        assert_eq!(ticks[0].volume, Some(100.0));
        assert_eq!(ticks[0].timestamp_ms, 1_700_000_000_000);

        let raw = envelope(r#"{"fullFeed":{"indexFF":{"ltpc":{"ltp":"19500.25","ltt":"1700000005000"}}}}"#);
        let ticks = ing.on_message(&raw);
        assert_eq!(ticks[0].timestamp_ms, 1_700_000_005_000);
        assert_eq!(ing.last_tick_timestamp(), Some(1_700_000_005_000));
    }

    #[test]
    fn malformed_input_is_skipped() {
        let mut ing = StreamIngestor::new(KEY);
        assert!(ing.on_message("not json").is_empty());
        assert!(ing.on_message(&envelope(r#"{"fullFeed":{"otherFF":{}}}"#)).is_empty());
        assert!(ing.on_message(&envelope(r#"{"fullFeed":{"marketFF":{"depth":[]}}}"#)).is_empty());
        assert!(ing.on_message(&envelope(r#"{"fullFeed":{"marketFF":{"ltpc":{"ltp":"abc"}}}}"#)).is_empty());
        assert!(ing.on_message(r#"{"type":"market_info"}"#).is_empty());
        assert_eq!(ing.skipped_count(), 4);
        assert_eq!(ing.last_tick_timestamp(), None);
    }

    #[test]
    fn bad_optional_fields_do_not_drop_the_tick() {
        let mut ing = StreamIngestor::new(KEY);
        let raw = envelope(r#"{"fullFeed":{"marketFF":{"ltpc":{"ltp":101.5,"cp":"n/a","chp":1.5,"volume":"NA","ltt":"x"}}}}"#);
        let ticks = ing.on_message(&raw);
        assert_eq!(ticks.len(), 1);
        assert!((ticks[0].ltp - 101.5).abs() < f64::EPSILON);
        assert_eq!(ticks[0].change_abs, 0.0);
        assert!((ticks[0].change_pct - 1.5).abs() < f64::EPSILON);
        assert_eq!(ticks[0].volume, None);
        assert_eq!(ticks[0].timestamp_ms, 1_700_000_000_000);
        assert_eq!(ing.skipped_count(), 0);
    }

    #[test]
    fn timestamp_is_monotonic() {
        let mut ing = StreamIngestor::new(KEY);
        ing.on_message(&envelope(r#"{"fullFeed":{"marketFF":{"ltpc":{"ltp":1,"ltt":2000}}}}"#));
        ing.on_message(&envelope(r#"{"fullFeed":{"marketFF":{"ltpc":{"ltp":1,"ltt":1000}}}}"#));
        assert_eq!(ing.last_tick_timestamp(), Some(2000));
    }

    #[test]
    fn foreign_instrument_records_are_skipped() {
        let mut ing = StreamIngestor::new("NSE_INDEX|Nifty 50");
        let raw = envelope(r#"{"fullFeed":{"marketFF":{"ltpc":{"ltp":1}}}}"#);
        assert!(ing.on_message(&raw).is_empty());
        assert_eq!(ing.skipped_count(), 1);
    }
}
