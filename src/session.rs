use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::aggregator::CandleAggregator;
use crate::collaborators::{CredentialProvider, FeedTransport, HistoricalLoader, RecommendationEngine};
use crate::config::{Config, Interval};
use crate::coordinator::{AnalysisState, RecommendationCoordinator, RequestContext};
use crate::error::AppError;
use crate::event::{InstrumentSelection, SessionEvent};
use crate::health::{Heartbeat, HealthTransition, StreamHealthMonitor, StreamHealthState};
use crate::indicator::{IndicatorEngine, MarketStats};
use crate::model::candle::Candle;
use crate::model::recommendation::{RecommendationRequest, RecommendationResponse};
use crate::model::tick::Tick;
use crate::stream::{FeedSubscription, StreamIngestor};

const INBOX_CAPACITY: usize = 1024;
const HEALTH_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum DataStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    Error(String),
}

/// Tunables shared by every session a desk creates.
#[derive(Debug, Clone)]
pub struct DeskSettings {
    pub heartbeat_interval: Duration,
    pub stall_threshold_ms: u64,
    pub tick_buffer_capacity: usize,
    pub sma_period: usize,
    pub horizon: String,
    pub auto_submit: bool,
}

impl Default for DeskSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(crate::health::DEFAULT_HEARTBEAT_INTERVAL_MS),
            stall_threshold_ms: crate::health::DEFAULT_STALL_THRESHOLD_MS,
            tick_buffer_capacity: crate::aggregator::DEFAULT_TICK_BUFFER_CAPACITY,
            sma_period: crate::indicator::DEFAULT_SMA_PERIOD,
            horizon: "swing".to_string(),
            auto_submit: true,
        }
    }
}

impl DeskSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(config.stream.heartbeat_interval_ms),
            stall_threshold_ms: config.stream.stall_threshold_ms,
            tick_buffer_capacity: config.stream.tick_buffer_capacity,
            sma_period: config.indicator.sma_period,
            horizon: config.recommendation.horizon.clone(),
            auto_submit: config.recommendation.auto_submit,
        }
    }
}

/// A historical load the session is waiting for.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub epoch: u64,
    pub fetch_id: u64,
    pub instrument_key: String,
    pub interval: Interval,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
}

/// Read-only view of the active session, published after every event.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub epoch: u64,
    pub selection: Option<InstrumentSelection>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub health: StreamHealthState,
    pub stream_error: Option<String>,
    pub data_status: DataStatus,
    pub analysis: AnalysisState,
    pub recommendation: Option<RecommendationResponse>,
    pub analysis_error: Option<String>,
    pub series: Arc<Vec<Candle>>,
    pub sma: Arc<Vec<Option<f64>>>,
    pub stats: MarketStats,
    pub last_tick: Option<Tick>,
    /// Live feed subscription, if one is running.
    pub feed_id: Option<u64>,
}

impl SessionSnapshot {
    pub fn empty() -> Self {
        Self {
            epoch: 0,
            selection: None,
            from_date: None,
            to_date: None,
            health: StreamHealthState::Disconnected,
            stream_error: None,
            data_status: DataStatus::Idle,
            analysis: AnalysisState::Idle,
            recommendation: None,
            analysis_error: None,
            series: Arc::new(Vec::new()),
            sma: Arc::new(Vec::new()),
            stats: MarketStats::default(),
            last_tick: None,
            feed_id: None,
        }
    }

    pub fn instrument_key(&self) -> Option<&str> {
        self.selection.as_ref().map(|s| s.instrument_key.as_str())
    }
}

/// State of one instrument selection. Mutated only by the desk task, one
/// event at a time.
#[derive(Debug)]
pub struct Session {
    epoch: u64,
    selection: InstrumentSelection,
    from_date: NaiveDate,
    to_date: NaiveDate,
    aggregator: CandleAggregator,
    indicators: IndicatorEngine,
    health: StreamHealthMonitor,
    coordinator: RecommendationCoordinator,
    data_status: DataStatus,
    series: Arc<Vec<Candle>>,
    next_fetch_id: u64,
    pending_fetch: Option<u64>,
}

impl Session {
    pub fn new(
        epoch: u64,
        selection: InstrumentSelection,
        today: NaiveDate,
        settings: &DeskSettings,
        health_tx: broadcast::Sender<HealthTransition>,
    ) -> Self {
        let (from_date, to_date) = selection
            .interval
            .normalize_range(selection.from_date, selection.to_date.unwrap_or(today));
        Self {
            epoch,
            selection,
            from_date,
            to_date,
            aggregator: CandleAggregator::new(settings.tick_buffer_capacity),
            indicators: IndicatorEngine::new(settings.sma_period),
            health: StreamHealthMonitor::new(epoch, settings.stall_threshold_ms, health_tx),
            coordinator: RecommendationCoordinator::new(epoch, &settings.horizon),
            data_status: DataStatus::Idle,
            series: Arc::new(Vec::new()),
            next_fetch_id: 1,
            pending_fetch: None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn selection(&self) -> &InstrumentSelection {
        &self.selection
    }

    pub fn data_status(&self) -> &DataStatus {
        &self.data_status
    }

    pub fn health(&self) -> &StreamHealthMonitor {
        &self.health
    }

    pub fn health_mut(&mut self) -> &mut StreamHealthMonitor {
        &mut self.health
    }

    pub fn coordinator(&self) -> &RecommendationCoordinator {
        &self.coordinator
    }

    pub fn series(&self) -> &Arc<Vec<Candle>> {
        &self.series
    }

    /// Start a (re)load of the historical base. Any older outstanding load
    /// of this session is superseded.
    pub fn begin_fetch(
        &mut self,
        interval: Option<Interval>,
        from_date: Option<NaiveDate>,
        to_date: Option<NaiveDate>,
    ) -> FetchRequest {
        if let Some(interval) = interval {
            self.selection.interval = interval;
        }
        if from_date.is_some() {
            self.selection.from_date = from_date;
        }
        if to_date.is_some() {
            self.selection.to_date = to_date;
        }
        let to = self.selection.to_date.unwrap_or(self.to_date);
        let (from, to) = self.selection.interval.normalize_range(self.selection.from_date, to);
        self.from_date = from;
        self.to_date = to;

        let fetch_id = self.next_fetch_id;
        self.next_fetch_id += 1;
        self.pending_fetch = Some(fetch_id);
        self.data_status = DataStatus::Loading;
        FetchRequest {
            epoch: self.epoch,
            fetch_id,
            instrument_key: self.selection.instrument_key.clone(),
            interval: self.selection.interval,
            from_date: self.from_date,
            to_date: self.to_date,
        }
    }

    /// Apply a finished load. Returns true when it was applied successfully.
    pub fn on_historical(&mut self, fetch_id: u64, result: Result<Vec<Candle>, String>) -> bool {
        if self.pending_fetch != Some(fetch_id) {
            tracing::debug!(epoch = self.epoch, fetch_id, pending = ?self.pending_fetch, "Discarding superseded fetch");
            return false;
        }
        self.pending_fetch = None;
        match result {
            Ok(candles) => {
                tracing::info!(
                    epoch = self.epoch,
                    instrument_key = %self.selection.instrument_key,
                    count = candles.len(),
                    "Historical series replaced"
                );
                let change = self.aggregator.replace_historical(candles);
                self.refresh_series(change);
                self.data_status = DataStatus::Ready;
                true
            }
            Err(message) => {
                tracing::warn!(
                    epoch = self.epoch,
                    instrument_key = %self.selection.instrument_key,
                    error = %message,
                    "Historical fetch failed, keeping previous series"
                );
                self.data_status = DataStatus::Error(message);
                false
            }
        }
    }

    pub fn on_tick(&mut self, tick: Tick, now_ms: u64) {
        let change = self.aggregator.push_tick(tick);
        self.refresh_series(change);
        self.health.on_tick(now_ms);
    }

    fn refresh_series(&mut self, change: crate::aggregator::SeriesChange) {
        self.series = Arc::new(self.aggregator.merged_series());
        self.indicators.apply(change, &self.series);
    }

    pub fn submit_analysis(&mut self) -> Result<RecommendationRequest, AppError> {
        let ctx = RequestContext {
            instrument_key: &self.selection.instrument_key,
            symbol: &self.selection.symbol,
            interval: self.selection.interval,
            from_date: self.from_date,
            to_date: self.to_date,
        };
        self.coordinator.submit(ctx, self.series.as_ref().clone())
    }

    pub fn on_recommendation(
        &mut self,
        epoch: u64,
        request_id: u64,
        result: Result<RecommendationResponse, String>,
    ) -> bool {
        self.coordinator.on_completed(epoch, request_id, result)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let indicators = self.indicators.snapshot();
        SessionSnapshot {
            epoch: self.epoch,
            selection: Some(self.selection.clone()),
            from_date: Some(self.from_date),
            to_date: Some(self.to_date),
            health: self.health.state(),
            stream_error: self.health.last_error().map(str::to_string),
            data_status: self.data_status.clone(),
            analysis: self.coordinator.state(),
            recommendation: self.coordinator.recommendation().cloned(),
            analysis_error: self.coordinator.last_error().map(str::to_string),
            series: Arc::clone(&self.series),
            sma: Arc::new(indicators.sma20),
            stats: indicators.stats,
            last_tick: self.aggregator.last_tick().cloned(),
            feed_id: None,
        }
    }
}

/// External services a desk talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub loader: Arc<dyn HistoricalLoader>,
    pub transport: Arc<dyn FeedTransport>,
    pub engine: Arc<dyn RecommendationEngine>,
    pub credentials: Arc<dyn CredentialProvider>,
}

/// Owns the single active session and every task serving it.
pub struct Desk {
    settings: DeskSettings,
    collaborators: Collaborators,
    inbox_tx: mpsc::Sender<SessionEvent>,
    inbox: mpsc::Receiver<SessionEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    health_tx: broadcast::Sender<HealthTransition>,
    last_epoch: u64,
    last_feed_id: u64,
    session: Option<Session>,
    heartbeat: Option<Heartbeat>,
    feed: Option<FeedSubscription>,
    in_flight: Vec<JoinHandle<()>>,
}

/// Caller side of a running desk.
pub struct DeskHandle {
    tx: mpsc::Sender<SessionEvent>,
    snapshots: watch::Receiver<SessionSnapshot>,
    health_tx: broadcast::Sender<HealthTransition>,
    task: JoinHandle<()>,
}

impl DeskHandle {
    pub async fn send(&self, event: SessionEvent) -> Result<(), AppError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| AppError::Connection("desk is not running".to_string()))
    }

    pub async fn select_instrument(&self, selection: InstrumentSelection) -> Result<(), AppError> {
        self.send(SessionEvent::SelectInstrument(selection)).await
    }

    pub async fn refetch(
        &self,
        interval: Interval,
        from_date: Option<NaiveDate>,
        to_date: Option<NaiveDate>,
    ) -> Result<(), AppError> {
        self.send(SessionEvent::Refetch {
            interval,
            from_date,
            to_date,
        })
        .await
    }

    pub async fn submit_analysis(&self) -> Result<(), AppError> {
        self.send(SessionEvent::SubmitAnalysis).await
    }

    pub async fn reconnect(&self) -> Result<(), AppError> {
        self.send(SessionEvent::Reconnect).await
    }

    pub async fn stop(&self) -> Result<(), AppError> {
        self.send(SessionEvent::Stop).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthTransition> {
        self.health_tx.subscribe()
    }

    /// Tear down the active session and wait for the desk task to end.
    pub async fn shutdown(self) -> Result<(), AppError> {
        let _ = self.tx.send(SessionEvent::Shutdown).await;
        self.task
            .await
            .map_err(|e| AppError::Connection(format!("desk task failed: {}", e)))
    }
}

impl Desk {
    pub fn spawn(settings: DeskSettings, collaborators: Collaborators) -> DeskHandle {
        let (inbox_tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        let (snapshot_tx, snapshots) = watch::channel(SessionSnapshot::empty());
        let (health_tx, _) = broadcast::channel(HEALTH_CHANNEL_CAPACITY);
        let desk = Desk {
            settings,
            collaborators,
            inbox_tx: inbox_tx.clone(),
            inbox,
            snapshot_tx,
            health_tx: health_tx.clone(),
            last_epoch: 0,
            last_feed_id: 0,
            session: None,
            heartbeat: None,
            feed: None,
            in_flight: Vec::new(),
        };
        let task = tokio::spawn(desk.run());
        DeskHandle {
            tx: inbox_tx,
            snapshots,
            health_tx,
            task,
        }
    }

    async fn run(mut self) {
        while let Some(event) = self.inbox.recv().await {
            if let Some(epoch) = event.epoch() {
                if self.session.as_ref().map(Session::epoch) != Some(epoch) {
                    tracing::debug!(epoch, current = self.last_epoch, "Discarding stale session event");
                    continue;
                }
            }
            if let Some(feed_id) = event.feed_id() {
                if self.feed.as_ref().map(FeedSubscription::feed_id) != Some(feed_id) {
                    tracing::debug!(feed_id, "Discarding event from replaced feed");
                    continue;
                }
            }
            if matches!(event, SessionEvent::Shutdown) {
                break;
            }
            self.handle(event);
            self.publish();
        }
        self.teardown();
        self.publish();
        tracing::info!("Desk stopped");
    }

    fn handle(&mut self, event: SessionEvent) {
        let now = crate::now_ms();
        match event {
            SessionEvent::SelectInstrument(selection) => self.select(selection),
            SessionEvent::Refetch {
                interval,
                from_date,
                to_date,
            } => {
                if let Some(session) = self.session.as_mut() {
                    let request = session.begin_fetch(Some(interval), from_date, to_date);
                    self.spawn_fetch(request);
                }
            }
            SessionEvent::SubmitAnalysis => self.submit(),
            SessionEvent::Reconnect => {
                if let Some(session) = self.session.as_mut() {
                    session.health_mut().on_reconnect(now);
                    self.start_feed();
                }
            }
            SessionEvent::Stop => {
                self.stop_stream();
                if let Some(session) = self.session.as_mut() {
                    session.health_mut().on_stop(now);
                }
            }
            SessionEvent::Shutdown => {}
            SessionEvent::Connected { .. } => {
                if let Some(session) = self.session.as_mut() {
                    session.health_mut().on_connected(now);
                }
            }
            SessionEvent::TickReceived { tick, .. } => {
                if let Some(session) = self.session.as_mut() {
                    session.on_tick(tick, now);
                }
            }
            SessionEvent::Closed { .. } => {
                self.drop_feed();
                if let Some(session) = self.session.as_mut() {
                    session.health_mut().on_error("stream closed by remote", now);
                }
            }
            SessionEvent::ErrorOccurred { message, .. } => {
                self.drop_feed();
                if let Some(session) = self.session.as_mut() {
                    session.health_mut().on_error(&message, now);
                }
            }
            SessionEvent::HeartbeatCheck { now_ms, .. } => {
                if let Some(session) = self.session.as_mut() {
                    session.health_mut().on_heartbeat(now_ms);
                }
            }
            SessionEvent::HistoricalLoaded { fetch_id, result, .. } => {
                let loaded = self
                    .session
                    .as_mut()
                    .is_some_and(|s| s.on_historical(fetch_id, result));
                if loaded && self.settings.auto_submit {
                    self.submit();
                }
            }
            SessionEvent::RecommendationCompleted {
                epoch,
                request_id,
                result,
            } => {
                if let Some(session) = self.session.as_mut() {
                    session.on_recommendation(epoch, request_id, result);
                }
            }
        }
    }

    fn select(&mut self, selection: InstrumentSelection) {
        self.teardown();
        self.last_epoch += 1;
        let epoch = self.last_epoch;
        tracing::info!(
            epoch,
            instrument_key = %selection.instrument_key,
            symbol = %selection.symbol,
            interval = %selection.interval,
            "Instrument selected"
        );

        let today = chrono::Utc::now().date_naive();
        let mut session = Session::new(epoch, selection, today, &self.settings, self.health_tx.clone());
        let request = session.begin_fetch(None, None, None);
        self.session = Some(session);
        self.spawn_fetch(request);
        self.start_feed();
    }

    /// Stop everything serving the current session. Results of requests
    /// that still complete are dropped by the epoch check.
    fn teardown(&mut self) {
        self.stop_stream();
        for task in self.in_flight.drain(..) {
            task.abort();
        }
        if let Some(session) = self.session.as_mut() {
            session.health_mut().on_stop(crate::now_ms());
            tracing::debug!(epoch = session.epoch(), "Session torn down");
        }
    }

    fn stop_stream(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.cancel();
        }
        self.drop_feed();
    }

    fn drop_feed(&mut self) {
        if let Some(mut feed) = self.feed.take() {
            feed.disconnect();
        }
    }

    fn start_feed(&mut self) {
        self.drop_feed();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let epoch = session.epoch();
        let credential = match self.collaborators.credentials.credential() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(epoch, error = %e, "No credential for market feed");
                session.health_mut().on_error(&e.to_string(), crate::now_ms());
                return;
            }
        };
        self.last_feed_id += 1;
        let ingestor = StreamIngestor::new(&session.selection().instrument_key);
        self.feed = Some(ingestor.connect(
            Arc::clone(&self.collaborators.transport),
            credential,
            epoch,
            self.last_feed_id,
            self.inbox_tx.clone(),
        ));
        if self.heartbeat.is_none() {
            self.heartbeat = Some(Heartbeat::spawn(
                epoch,
                self.settings.heartbeat_interval,
                self.inbox_tx.clone(),
            ));
        }
    }

    fn spawn_fetch(&mut self, request: FetchRequest) {
        let loader = Arc::clone(&self.collaborators.loader);
        let tx = self.inbox_tx.clone();
        let task = tokio::spawn(async move {
            let result = loader
                .fetch_candles(
                    &request.instrument_key,
                    request.interval,
                    request.from_date,
                    request.to_date,
                )
                .await
                .map_err(|e| e.to_string());
            let _ = tx
                .send(SessionEvent::HistoricalLoaded {
                    epoch: request.epoch,
                    fetch_id: request.fetch_id,
                    result,
                })
                .await;
        });
        self.track(task);
    }

    fn submit(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let request = match session.submit_analysis() {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(epoch = session.epoch(), error = %e, "Analysis not submitted");
                return;
            }
        };
        let engine = Arc::clone(&self.collaborators.engine);
        let tx = self.inbox_tx.clone();
        let task = tokio::spawn(async move {
            let result = engine.analyze(&request).await.map_err(|e| e.to_string());
            let _ = tx
                .send(SessionEvent::RecommendationCompleted {
                    epoch: request.epoch,
                    request_id: request.request_id,
                    result,
                })
                .await;
        });
        self.track(task);
    }

    fn track(&mut self, task: JoinHandle<()>) {
        self.in_flight.retain(|t| !t.is_finished());
        self.in_flight.push(task);
    }

    fn publish(&self) {
        let mut snapshot = self
            .session
            .as_ref()
            .map_or_else(SessionSnapshot::empty, Session::snapshot);
        snapshot.feed_id = self.feed.as_ref().map(FeedSubscription::feed_id);
        self.snapshot_tx.send_replace(snapshot);
    }
}
