use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenvy::dotenv;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::actors::{Actor, ActorType};
use common::config::DeskConfig;
use common::logger;
use reconciler::{DeskEvent, DeskView, FilterSpec, SignalDesk};
use signal_feed::{Backoff, ChannelConfig, SignalChannel, SnapshotClient, SnapshotSource};

use crate::actors::supervisor::Supervisor;
use crate::services::desk_service::DeskService;
use crate::services::snapshot_poller::SnapshotPoller;

mod actors;
mod services;

const DESK_QUEUE_SIZE: usize = 2_000;
const VIEW_REFRESH: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    logger::setup_logger();
    debug!("Signal desk starting up...");

    let config = DeskConfig::from_env().context("Invalid desk configuration")?;
    let filter = match config.initial_filter.as_deref() {
        Some(raw) => serde_json::from_str::<FilterSpec>(raw).context("SIGNAL_FILTER is not a valid filter")?,
        None => FilterSpec::default(),
    };
    info!(
        "Desk configured: api {}, push {}, capacity {}, filter {:?}",
        config.api_url, config.ws_url, config.buffer_capacity, filter
    );

    let (desk_tx, desk_rx) = mpsc::channel::<DeskEvent>(DESK_QUEUE_SIZE);
    let desk = SignalDesk::new(config.buffer_capacity, filter);
    let (view_tx, view_rx) = watch::channel(desk.view(chrono::Utc::now()));
    let desk = Arc::new(Mutex::new(desk));
    let desk_rx = Arc::new(Mutex::new(desk_rx));
    let view_tx = Arc::new(view_tx);

    let channel = SignalChannel::new(ChannelConfig {
        url: config.ws_url.clone(),
        token: config.api_token.clone(),
        backoff: Backoff::new(config.reconnect_min, config.reconnect_max),
    });

    let tx_for_channel = desk_tx.clone();
    let subscription = channel.subscribe(move |event| {
        // A dropped push is recovered by the next snapshot resync.
        if let Err(e) = tx_for_channel.try_send(DeskEvent::Channel(event.clone())) {
            warn!("Dropping channel event until next snapshot resync, desk queue unavailable: {}", e);
        }
    });

    let mut state_rx = channel.watch_state();
    let tx_for_link = desk_tx.clone();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow_and_update();
            if tx_for_link.send(DeskEvent::Link(state)).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(log_views(view_rx));

    let source: Arc<dyn SnapshotSource> = Arc::new(
        SnapshotClient::new(&config.api_url, config.api_token.clone(), config.fetch_timeout)
            .context("Failed to build snapshot client")?,
    );

    let shutdown = CancellationToken::new();
    let mut supervisor = Supervisor::new();

    let tx_for_poller = desk_tx.clone();
    let poller_shutdown = shutdown.clone();
    let (limit, every) = (config.snapshot_limit, config.snapshot_interval);
    supervisor.register_actor(
        ActorType::SnapshotPoller,
        Box::new(move || -> Box<dyn Actor> {
            Box::new(SnapshotPoller::new(
                Arc::clone(&source),
                limit,
                every,
                tx_for_poller.clone(),
                poller_shutdown.clone(),
            ))
        }),
    );

    supervisor.register_actor(
        ActorType::DeskActor,
        Box::new(move || -> Box<dyn Actor> {
            Box::new(DeskService::new(
                Arc::clone(&desk),
                Arc::clone(&desk_rx),
                Arc::clone(&view_tx),
                VIEW_REFRESH,
            ))
        }),
    );
    drop(desk_tx);

    channel.connect();

    let stopper = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down.");
                stopper.cancel();
            }
            Err(e) => warn!("Unable to listen for interrupt: {}", e),
        }
    });

    supervisor.start(shutdown).await;

    subscription.unsubscribe();
    channel.disconnect();
    info!("Signal desk stopped.");
    Ok(())
}

/// Stand-in presentation layer: logs each published view.
async fn log_views(mut view_rx: watch::Receiver<DeskView>) {
    while view_rx.changed().await.is_ok() {
        let view = view_rx.borrow_and_update().clone();
        if view.link.is_live() {
            info!("[{}] {} of {} signals shown", view.link, view.signals.len(), view.buffered);
        } else {
            warn!(
                "[{}] {} of {} signals shown, may be stale until the link recovers",
                view.link,
                view.signals.len(),
                view.buffered
            );
        }
        for signal in view.signals.iter().take(5) {
            let score = signal
                .score
                .map(|score| format!("{score:.1}"))
                .unwrap_or_else(|| "-".to_string());
            let regime = signal
                .detail("regime")
                .and_then(|value| value.as_str())
                .unwrap_or("-");
            debug!(
                "  #{} {} {} score {} {} regime {}",
                signal.id,
                signal.timestamp.format("%Y-%m-%d %H:%M:%S"),
                signal.symbol,
                score,
                signal.decision,
                regime
            );
        }
    }
}
