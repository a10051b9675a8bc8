use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use signal_desk::collaborators::StaticCredential;
use signal_desk::config::{Config, LoggingConfig};
use signal_desk::coordinator::AnalysisState;
use signal_desk::event::InstrumentSelection;
use signal_desk::recommendation::HttpRecommendationEngine;
use signal_desk::session::{Collaborators, DataStatus, Desk, DeskSettings, SessionSnapshot};
use signal_desk::upstox::{UpstoxRestClient, UpstoxWsClient};

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        logging
            .level
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &logging.file {
        Some(path) => {
            let log_file = std::fs::File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            let builder = builder.with_writer(log_file).with_ansi(false);
            if logging.json {
                builder.json().init();
            } else {
                builder.init();
            }
        }
        None => {
            let builder = builder.with_writer(std::io::stderr);
            if logging.json {
                builder.json().init();
            } else {
                builder.init();
            }
        }
    }
    Ok(())
}

/// Last values already reported, so only changes get logged.
#[derive(Default)]
struct Reported {
    epoch: u64,
    data_status: DataStatus,
    analysis: AnalysisState,
    series_len: usize,
}

fn report(snapshot: &SessionSnapshot, seen: &mut Reported) {
    if snapshot.epoch != seen.epoch {
        *seen = Reported {
            epoch: snapshot.epoch,
            ..Reported::default()
        };
    }

    if snapshot.data_status != seen.data_status {
        match &snapshot.data_status {
            DataStatus::Ready => tracing::info!(
                instrument_key = ?snapshot.instrument_key(),
                candles = snapshot.series.len(),
                from = ?snapshot.from_date,
                to = ?snapshot.to_date,
                "Series loaded"
            ),
            DataStatus::Error(e) => tracing::warn!(error = %e, "Series load failed"),
            other => tracing::debug!(status = ?other, "Data status"),
        }
        seen.data_status = snapshot.data_status.clone();
    }

    if snapshot.series.len() != seen.series_len {
        seen.series_len = snapshot.series.len();
        if let Some(tick) = &snapshot.last_tick {
            tracing::debug!(
                ltp = tick.ltp,
                change_pct = tick.change_pct,
                sma = ?snapshot.sma.last().copied().flatten(),
                high = snapshot.stats.high,
                low = snapshot.stats.low,
                change_percent = snapshot.stats.change_percent,
                "Tick"
            );
        }
    }

    if snapshot.analysis != seen.analysis {
        match snapshot.analysis {
            AnalysisState::Ready => {
                if let Some(rec) = &snapshot.recommendation {
                    tracing::info!(signal = %rec.signal, confidence = rec.confidence, "Recommendation ready");
                    for line in rec.render_lines() {
                        println!("{}", line);
                    }
                }
            }
            AnalysisState::Error => tracing::warn!(
                error = ?snapshot.analysis_error,
                kept_previous = snapshot.recommendation.is_some(),
                "Recommendation failed"
            ),
            other => tracing::debug!(state = %other, "Analysis state"),
        }
        seen.analysis = snapshot.analysis;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required by rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Make sure .env file exists with UPSTOX_ACCESS_TOKEN");
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging)?;

    tracing::info!(
        instrument_key = %config.session.instrument_key,
        interval = %config.session.interval,
        rest_url = %config.upstox.rest_base_url,
        ws_url = %config.upstox.ws_url,
        "Starting signal-desk"
    );

    let credentials = Arc::new(StaticCredential(config.upstox.access_token.clone()));
    let loader = UpstoxRestClient::new(&config.upstox.rest_base_url, credentials.clone()).with_retry(
        config.upstox.fetch_attempts,
        Duration::from_millis(config.upstox.fetch_retry_delay_ms),
    );
    let engine = HttpRecommendationEngine::new(
        &config.recommendation.endpoint,
        Duration::from_millis(config.recommendation.timeout_ms),
        config.recommendation.api_key.clone(),
    )
    .context("failed to build recommendation client")?
    .with_max_candles(config.recommendation.max_candles);

    let desk = Desk::spawn(
        DeskSettings::from_config(&config),
        Collaborators {
            loader: Arc::new(loader),
            transport: Arc::new(UpstoxWsClient::new(&config.upstox.ws_url)),
            engine: Arc::new(engine),
            credentials,
        },
    );

    let mut snapshots = desk.subscribe();
    let mut health = desk.subscribe_health();

    desk.select_instrument(InstrumentSelection {
        instrument_key: config.session.instrument_key.clone(),
        symbol: config.session.symbol.clone(),
        interval: config.session.interval,
        from_date: config.session.from_date,
        to_date: config.session.to_date,
    })
    .await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut seen = Reported::default();

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Ctrl-C received, shutting down");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                report(&snapshot, &mut seen);
            }
            transition = health.recv() => {
                match transition {
                    Ok(t) => tracing::info!(epoch = t.epoch, from = %t.from, to = %t.to, reason = ?t.reason, "Stream health"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Health updates lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    desk.shutdown().await?;
    Ok(())
}
