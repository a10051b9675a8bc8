use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use signal_desk::collaborators::{FeedStream, FeedTransport};
use signal_desk::error::AppError;
use signal_desk::event::SessionEvent;
use signal_desk::stream::StreamIngestor;

const KEY: &str = "NSE_INDEX|Nifty 50";

fn envelope(ltp: &str) -> String {
    format!(
        r#"{{"type":"live_feed","feeds":{{"{}":{{"fullFeed":{{"indexFF":{{"ltpc":{{"ltp":{},"cp":22100.0,"chp":0.42}}}}}}}}}},"currentTs":"1718000000000"}}"#,
        KEY, ltp
    )
}

struct ScriptedTransport {
    frames: Vec<Result<String, AppError>>,
    hold_open: bool,
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn subscribe(&self, _instrument_key: &str, credential: &str) -> Result<FeedStream, AppError> {
        if credential.is_empty() {
            return Err(AppError::Connection("unauthorized".to_string()));
        }
        let frames: Vec<Result<String, AppError>> = self
            .frames
            .iter()
            .map(|f| match f {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(AppError::Connection(e.to_string())),
            })
            .collect();
        let head = stream::iter(frames);
        if self.hold_open {
            Ok(head.chain(stream::pending()).boxed())
        } else {
            Ok(head.boxed())
        }
    }
}

async fn collect(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(Some(ev)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        out.push(ev);
    }
    out
}

#[test]
fn decodes_index_feed_and_skips_garbage() {
    let mut ingestor = StreamIngestor::new(KEY);
    let ticks = ingestor.on_message(&envelope("22150.5"));
    assert_eq!(ticks.len(), 1);
    assert_eq!(ticks[0].ltp, 22150.5);
    assert_eq!(ticks[0].change_abs, 22100.0);
    assert_eq!(ticks[0].timestamp_ms, 1_718_000_000_000);

    assert!(ingestor.on_message("{").is_empty());
    assert!(ingestor.on_message(r#"{"feeds":{}}"#).is_empty());
    assert_eq!(ingestor.decoded_count(), 1);
    assert_eq!(ingestor.skipped_count(), 1);
}

#[test]
/// Verifies a record with a usable `ltp` still yields a tick when its
/// volume or change fields are garbage; volume then counts as zero.
fn garbage_volume_keeps_tick_with_zero_volume() {
    use signal_desk::aggregator::{CandleAggregator, DEFAULT_TICK_BUFFER_CAPACITY};
    use signal_desk::model::candle::Candle;

    let mut ingestor = StreamIngestor::new("K");
    let ticks = ingestor.on_message(
        r#"{"feeds":{"K":{"fullFeed":{"marketFF":{"ltpc":{"ltp":101.5,"cp":100,"chp":1.5,"volume":"NA"}}}}}}"#,
    );
    assert_eq!(ticks.len(), 1);
    assert_eq!(ticks[0].change_abs, 100.0);
    assert_eq!(ticks[0].volume, None);

    let mut aggregator = CandleAggregator::new(DEFAULT_TICK_BUFFER_CAPACITY);
    aggregator.replace_historical(vec![Candle::historical(0, 100.0, 100.0, 100.0, 100.0, 5.0)]);
    aggregator.push_tick(ticks[0].clone());
    let merged = aggregator.merged_series();
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[1].volume, 0.0);
}

#[tokio::test]
/// Verifies malformed frames never end the connection and decoded ticks
/// arrive tagged with the subscription epoch.
async fn malformed_frames_do_not_end_the_feed() {
    let transport = Arc::new(ScriptedTransport {
        frames: vec![
            Ok(envelope("100.0")),
            Ok("garbage".to_string()),
            Ok(r#"{"feeds":{"NSE_INDEX|Nifty 50":{"fullFeed":{}}}}"#.to_string()),
            Ok(envelope("101.5")),
        ],
        hold_open: true,
    });
    let (tx, mut rx) = mpsc::channel(16);
    let mut sub = StreamIngestor::new(KEY).connect(transport, "token".to_string(), 4, 7, tx);

    let events = collect(&mut rx).await;
    assert!(matches!(events[0], SessionEvent::Connected { epoch: 4, feed_id: 7 }));
    let prices: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::TickReceived { epoch: 4, feed_id: 7, tick } => Some(tick.ltp),
            _ => None,
        })
        .collect();
    assert_eq!(prices, vec![100.0, 101.5]);
    assert_eq!(sub.feed_id(), 7);
    assert!(sub.is_active());

    sub.disconnect();
    sub.disconnect();
    assert!(!sub.is_active());
}

#[tokio::test]
async fn transport_error_and_close_are_reported() {
    let transport = Arc::new(ScriptedTransport {
        frames: vec![Ok(envelope("1.0")), Err(AppError::Connection("reset".to_string()))],
        hold_open: false,
    });
    let (tx, mut rx) = mpsc::channel(16);
    let _sub = StreamIngestor::new(KEY).connect(transport, "token".to_string(), 1, 1, tx);
    let events = collect(&mut rx).await;
    assert!(matches!(events.last(), Some(SessionEvent::ErrorOccurred { epoch: 1, feed_id: 1, .. })));

    let transport = Arc::new(ScriptedTransport {
        frames: vec![Ok(envelope("1.0"))],
        hold_open: false,
    });
    let (tx, mut rx) = mpsc::channel(16);
    let _sub = StreamIngestor::new(KEY).connect(transport, "token".to_string(), 2, 2, tx);
    let events = collect(&mut rx).await;
    assert!(matches!(events.last(), Some(SessionEvent::Closed { epoch: 2, feed_id: 2 })));
}

#[tokio::test]
async fn failed_subscribe_is_an_error_event() {
    let transport = Arc::new(ScriptedTransport {
        frames: Vec::new(),
        hold_open: true,
    });
    let (tx, mut rx) = mpsc::channel(4);
    let _sub = StreamIngestor::new(KEY).connect(transport, String::new(), 3, 1, tx);
    let events = collect(&mut rx).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], SessionEvent::ErrorOccurred { epoch: 3, message, .. } if message.contains("unauthorized")));
}
