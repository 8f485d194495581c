use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use common::actors::{Actor, ActorType, ControlMessage};

pub type ActorFactory = Box<dyn Fn() -> Box<dyn Actor> + Send + Sync>;

struct Running {
    id: Uuid,
    pulse: Instant,
    handle: JoinHandle<()>,
}

pub struct Supervisor {
    actor_factories: HashMap<ActorType, ActorFactory>,
    running: HashMap<ActorType, Running>,
    // Actors that shut down on their own; never restarted.
    retired: HashSet<ActorType>,
    timeout: Duration,
    check_every: Duration,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::with_timing(Duration::from_secs(3), Duration::from_secs(1))
    }

    pub fn with_timing(timeout: Duration, check_every: Duration) -> Self {
        Self {
            actor_factories: HashMap::new(),
            running: HashMap::new(),
            retired: HashSet::new(),
            timeout,
            check_every,
        }
    }

    pub fn register_actor(&mut self, actor_type: ActorType, factory: ActorFactory) {
        self.actor_factories.insert(actor_type, factory);
    }

    /// Runs every registered actor until `shutdown` fires, restarting any
    /// actor whose heartbeat goes stale or whose task ends without a
    /// `Shutdown` (an error return or a panic).
    pub async fn start(&mut self, shutdown: CancellationToken) {
        let mut check_interval = time::interval(self.check_every);

        let (supervisor_tx, mut supervisor_rx) = mpsc::channel::<ControlMessage>(512);

        let actors: Vec<ActorType> = self.actor_factories.keys().copied().collect();
        actors.into_iter().for_each(|actor| {
            self.spawn_actor(actor, supervisor_tx.clone());
        });

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Supervisor shutting down {} actors.", self.running.len());
                    for (_, running) in self.running.drain() {
                        running.handle.abort();
                    }
                    return;
                }

                Some(msg) = supervisor_rx.recv() => self.handle_control(msg),

                _ = check_interval.tick() => {
                    // Settle pending shutdowns first so a retiring actor is
                    // not mistaken for a crashed one.
                    while let Ok(msg) = supervisor_rx.try_recv() {
                        self.handle_control(msg);
                    }

                    let dead_timeout = Instant::now().checked_sub(self.timeout);

                    let dead_actors: Vec<(ActorType, bool)> = self
                        .running
                        .iter()
                        .filter_map(|(actor_type, running)| {
                            if running.handle.is_finished() {
                                Some((*actor_type, true))
                            } else if dead_timeout.is_some_and(|limit| running.pulse < limit) {
                                Some((*actor_type, false))
                            } else {
                                None
                            }
                        })
                        .collect();

                    dead_actors.into_iter().for_each(|(actor_type, crashed)| {
                        if crashed {
                            warn!("{:?} exited without shutting down! Restarting.", actor_type);
                        } else {
                            warn!("{:?} is unresponsive! Restarting.", actor_type);
                        }
                        if let Some(running) = self.running.remove(&actor_type) {
                            running.handle.abort();
                        }
                        self.spawn_actor(actor_type, supervisor_tx.clone());
                    });
                }
            }
        }
    }

    fn handle_control(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::Heartbeat(id) => {
                if let Some(running) = self.running.values_mut().find(|r| r.id == id) {
                    running.pulse = Instant::now();
                }
            }
            ControlMessage::Shutdown(id) => {
                if let Some(actor_type) = self.actor_type_of(id) {
                    warn!("{:?} is shutting down gracefully.", actor_type);
                    self.retired.insert(actor_type);
                    if let Some(running) = self.running.remove(&actor_type) {
                        running.handle.abort();
                    }
                }
            }
            ControlMessage::Error(id, error_msg) => match self.actor_type_of(id) {
                Some(actor_type) => error!("Actor {:?} reported error: {}", actor_type, error_msg),
                None => error!("Retired actor {} reported error: {}", id, error_msg),
            },
        }
    }

    pub fn is_running(&self, actor_type: ActorType) -> bool {
        self.running.contains_key(&actor_type)
    }

    fn actor_type_of(&self, id: Uuid) -> Option<ActorType> {
        self.running
            .iter()
            .find(|(_, running)| running.id == id)
            .map(|(actor_type, _)| *actor_type)
    }

    fn spawn_actor(&mut self, actor_type: ActorType, tx: mpsc::Sender<ControlMessage>) {
        if self.retired.contains(&actor_type) {
            return;
        }
        let Some(factory) = self.actor_factories.get(&actor_type) else {
            error!("No factory registered for {:?}", actor_type);
            return;
        };

        let mut new_actor = factory();
        let id = new_actor.id();
        let handle = tokio::spawn(async move {
            if let Err(e) = new_actor.run(tx).await {
                error!("Actor {:?} crashed: {}", actor_type, e);
            }
        });

        self.running.insert(
            actor_type,
            Running {
                id,
                pulse: Instant::now(),
                handle,
            },
        );
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
