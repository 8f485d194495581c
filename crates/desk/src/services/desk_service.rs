use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use common::actors::{Actor, ActorType, ControlMessage};
use reconciler::{DeskEvent, DeskView, SignalDesk};

/// Single writer of the desk. Drains the event queue in arrival order and
/// republishes the filtered view whenever it changes.
///
/// The desk and the queue outlive any one instance, so a restarted actor
/// carries on with the same buffer.
pub struct DeskService {
    id: Uuid,
    desk: Arc<Mutex<SignalDesk>>,
    events_rx: Arc<Mutex<mpsc::Receiver<DeskEvent>>>,
    view_tx: Arc<watch::Sender<DeskView>>,
    refresh_every: Duration,
}

#[async_trait]
impl Actor for DeskService {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> ActorType {
        ActorType::DeskActor
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let heartbeat_handle = self.spawn_heartbeat(supervisor_tx.clone());
        let mut events_rx = self.events_rx.lock().await;

        info!("Desk actor {} started.", self.id);
        self.publish().await;

        // Age windows slide even when nothing arrives.
        let mut refresh = time::interval(self.refresh_every);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    let changed = self.desk.lock().await.handle(event);
                    if changed {
                        self.publish().await;
                    }
                }
                _ = refresh.tick() => {
                    self.publish().await;
                }
            }
        }

        heartbeat_handle.abort();
        info!("Desk event queue closed, desk actor stopping.");
        supervisor_tx.send(ControlMessage::Shutdown(self.id)).await?;
        Ok(())
    }
}

impl DeskService {
    pub fn new(
        desk: Arc<Mutex<SignalDesk>>,
        events_rx: Arc<Mutex<mpsc::Receiver<DeskEvent>>>,
        view_tx: Arc<watch::Sender<DeskView>>,
        refresh_every: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            desk,
            events_rx,
            view_tx,
            refresh_every,
        }
    }

    async fn publish(&self) {
        let view = self.desk.lock().await.view(Utc::now());
        let updated = self.view_tx.send_if_modified(|current| {
            let same = current.signals == view.signals
                && current.buffered == view.buffered
                && current.link == view.link
                && current.filter == view.filter;
            if same {
                return false;
            }
            *current = view;
            true
        });
        if updated {
            debug!("Published desk view");
        }
    }
}
