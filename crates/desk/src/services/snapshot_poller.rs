use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::actors::{Actor, ActorType, ControlMessage};
use common::error::FeedError;
use reconciler::DeskEvent;
use signal_feed::SnapshotSource;

#[derive(Debug, PartialEq)]
pub enum PollOutcome {
    Delivered(usize),
    Failed(FeedError),
    Cancelled,
}

/// Re-pulls the recent-history snapshot on a fixed interval, independent of
/// push activity, so gaps left by reconnects close within one interval.
pub struct SnapshotPoller {
    id: Uuid,
    source: Arc<dyn SnapshotSource>,
    limit: usize,
    every: Duration,
    desk_tx: mpsc::Sender<DeskEvent>,
    shutdown: CancellationToken,
}

#[async_trait]
impl Actor for SnapshotPoller {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> ActorType {
        ActorType::SnapshotPoller
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let heartbeat_handle = self.spawn_heartbeat(supervisor_tx.clone());

        info!(
            "Starting snapshot poller (limit {}, every {:?})",
            self.limit, self.every
        );

        let mut ticker = time::interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(PollOutcome::Delivered(count)) => {
                            debug!("Forwarded snapshot of {} signals", count);
                        }
                        Ok(PollOutcome::Failed(e)) => {
                            supervisor_tx
                                .send(ControlMessage::Error(
                                    self.id,
                                    format!("{:?}: snapshot fetch failed: {}", self.name(), e),
                                ))
                                .await?;
                        }
                        Ok(PollOutcome::Cancelled) => break,
                        Err(e) => {
                            heartbeat_handle.abort();
                            supervisor_tx
                                .send(ControlMessage::Error(self.id, format!("{:?}: {}", self.name(), e)))
                                .await?;
                            return Err(e);
                        }
                    }
                }
            }
        }

        heartbeat_handle.abort();
        info!("Snapshot poller stopped.");
        supervisor_tx.send(ControlMessage::Shutdown(self.id)).await?;
        Ok(())
    }
}

impl SnapshotPoller {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        limit: usize,
        every: Duration,
        desk_tx: mpsc::Sender<DeskEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            limit,
            every,
            desk_tx,
            shutdown,
        }
    }

    /// One fetch. A failed fetch leaves the desk untouched; only a closed desk
    /// queue is an error. Shutdown drops an in-flight request.
    pub async fn poll_once(&self) -> anyhow::Result<PollOutcome> {
        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(PollOutcome::Cancelled),
            result = self.source.fetch_recent(self.limit) => result,
        };

        match result {
            Ok(signals) => {
                let count = signals.len();
                self.desk_tx
                    .send(DeskEvent::Snapshot(signals))
                    .await
                    .context("Desk event queue closed")?;
                Ok(PollOutcome::Delivered(count))
            }
            Err(e) => {
                warn!("Snapshot fetch failed, keeping last known buffer: {}", e);
                Ok(PollOutcome::Failed(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use common::models::{Decision, Signal};
    use mockall::mock;
    use mockall::predicate::eq;

    mock! {
        Source {}

        #[async_trait]
        impl SnapshotSource for Source {
            async fn fetch_recent(&self, limit: usize) -> Result<Vec<Signal>, FeedError>;
        }
    }

    fn signal(id: i64) -> Signal {
        Signal {
            id,
            timestamp: Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, id as u32 % 60).unwrap(),
            symbol: "MSFT".to_string(),
            score: Some(66.0),
            decision: Decision::ScanBest,
            conviction: None,
            details: Default::default(),
        }
    }

    fn poller(
        source: MockSource,
        every: Duration,
    ) -> (SnapshotPoller, mpsc::Receiver<DeskEvent>, CancellationToken) {
        let (desk_tx, desk_rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let poller = SnapshotPoller::new(Arc::new(source), 25, every, desk_tx, shutdown.clone());
        (poller, desk_rx, shutdown)
    }

    fn snapshot_ids(event: DeskEvent) -> Vec<i64> {
        match event {
            DeskEvent::Snapshot(signals) => signals.iter().map(|s| s.id).collect(),
            other => panic!("expected a snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_successful_fetch_is_forwarded_to_desk() {
        let mut source = MockSource::new();
        source
            .expect_fetch_recent()
            .with(eq(25))
            .times(1)
            .returning(|_| Ok(vec![signal(3), signal(2)]));
        let (poller, mut desk_rx, _shutdown) = poller(source, Duration::from_secs(60));

        let outcome = poller.poll_once().await.unwrap();

        assert_eq!(outcome, PollOutcome::Delivered(2));
        assert_eq!(snapshot_ids(desk_rx.recv().await.unwrap()), vec![3, 2]);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_desk_untouched() {
        let mut source = MockSource::new();
        source.expect_fetch_recent().times(1).returning(|_| {
            Err(FeedError::Server {
                status: 502,
                body: "bad gateway".to_string(),
            })
        });
        let (poller, mut desk_rx, _shutdown) = poller(source, Duration::from_secs(60));

        let outcome = poller.poll_once().await.unwrap();

        assert!(matches!(outcome, PollOutcome::Failed(FeedError::Server { status: 502, .. })));
        assert!(desk_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_poll_forwards_nothing() {
        let mut source = MockSource::new();
        source.expect_fetch_recent().returning(|_| Ok(vec![signal(1)]));
        let (poller, mut desk_rx, shutdown) = poller(source, Duration::from_secs(60));

        shutdown.cancel();
        let outcome = poller.poll_once().await.unwrap();

        assert_eq!(outcome, PollOutcome::Cancelled);
        assert!(desk_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_desk_queue_is_an_error() {
        let mut source = MockSource::new();
        source.expect_fetch_recent().returning(|_| Ok(vec![signal(1)]));
        let (poller, desk_rx, _shutdown) = poller(source, Duration::from_secs(60));
        drop(desk_rx);

        assert!(poller.poll_once().await.is_err());
    }

    #[tokio::test]
    async fn test_run_polls_repeatedly_until_shutdown() {
        let mut source = MockSource::new();
        source.expect_fetch_recent().returning(|_| Ok(vec![signal(1)]));
        let (mut poller, mut desk_rx, shutdown) = poller(source, Duration::from_millis(20));
        let id = poller.id();

        let (supervisor_tx, mut supervisor_rx) = mpsc::channel(64);
        let task = tokio::spawn(async move { poller.run(supervisor_tx).await });

        for _ in 0..3 {
            assert_eq!(snapshot_ids(desk_rx.recv().await.unwrap()), vec![1]);
        }
        shutdown.cancel();
        task.await.unwrap().unwrap();

        let mut saw_shutdown = false;
        while let Ok(msg) = supervisor_rx.try_recv() {
            if let ControlMessage::Shutdown(actor_id) = msg {
                assert_eq!(actor_id, id);
                saw_shutdown = true;
            }
        }
        assert!(saw_shutdown);
    }
}
