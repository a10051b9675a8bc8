use chrono::NaiveDate;

use crate::config::Interval;
use crate::model::candle::Candle;
use crate::model::recommendation::RecommendationResponse;
use crate::model::tick::Tick;

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentSelection {
    pub instrument_key: String,
    pub symbol: String,
    pub interval: Interval,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
}

/// Everything the session actor reacts to, in arrival order.
///
/// Transport and completion events carry the epoch of the session that
/// produced them so stale ones can be dropped after an instrument switch.
/// Feed events also carry the id of the subscription that produced them,
/// since a reconnect or stop replaces the feed within one epoch.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SelectInstrument(InstrumentSelection),
    Refetch {
        interval: Interval,
        from_date: Option<NaiveDate>,
        to_date: Option<NaiveDate>,
    },
    SubmitAnalysis,
    Reconnect,
    Stop,
    Shutdown,

    Connected {
        epoch: u64,
        feed_id: u64,
    },
    TickReceived {
        epoch: u64,
        feed_id: u64,
        tick: Tick,
    },
    Closed {
        epoch: u64,
        feed_id: u64,
    },
    ErrorOccurred {
        epoch: u64,
        feed_id: u64,
        message: String,
    },
    HeartbeatCheck {
        epoch: u64,
        now_ms: u64,
    },
    HistoricalLoaded {
        epoch: u64,
        fetch_id: u64,
        result: Result<Vec<Candle>, String>,
    },
    RecommendationCompleted {
        epoch: u64,
        request_id: u64,
        result: Result<RecommendationResponse, String>,
    },
}

impl SessionEvent {
    /// Epoch tag of transport/completion events; commands have none.
    pub fn epoch(&self) -> Option<u64> {
        match self {
            Self::Connected { epoch, .. }
            | Self::TickReceived { epoch, .. }
            | Self::Closed { epoch, .. }
            | Self::ErrorOccurred { epoch, .. }
            | Self::HeartbeatCheck { epoch, .. }
            | Self::HistoricalLoaded { epoch, .. }
            | Self::RecommendationCompleted { epoch, .. } => Some(*epoch),
            _ => None,
        }
    }

    /// Subscription that produced a feed event.
    pub fn feed_id(&self) -> Option<u64> {
        match self {
            Self::Connected { feed_id, .. }
            | Self::TickReceived { feed_id, .. }
            | Self::Closed { feed_id, .. }
            | Self::ErrorOccurred { feed_id, .. } => Some(*feed_id),
            _ => None,
        }
    }
}
