//! `RoomManagerActor` - singleton supervisor for rooms and the worker pool.
//!
//! The manager:
//! - Spawns a fixed pool of media workers at startup
//! - Assigns brand-new rooms to workers in round-robin order
//! - Caches the `roomId -> RoomHandle` table
//! - Treats an unexpected worker death as fatal: after a short grace period
//!   it cancels the `fatal` token the binary observes and exits on, unless a
//!   shutdown is already in progress. There is no in-process respawn;
//!   recovery belongs to the external supervisor.

use crate::actors::messages::{ManagerMessage, ManagerStatus};
use crate::actors::room::{RoomActor, RoomHandle};
use crate::config::Config;
use crate::errors::RoomError;

use media_engine::{MediaEngine, MediaWorker};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Default channel buffer size for the manager mailbox.
const MANAGER_CHANNEL_BUFFER: usize = 1000;

/// Grace period between a worker death and process termination.
const WORKER_DEATH_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Handle to the `RoomManagerActor`.
#[derive(Debug, Clone)]
pub struct RoomManagerHandle {
    sender: mpsc::Sender<ManagerMessage>,
    cancel_token: CancellationToken,
    fatal_token: CancellationToken,
}

impl RoomManagerHandle {
    /// Spawn the worker pool and the manager actor.
    pub async fn new(
        config: Arc<Config>,
        engine: Arc<dyn MediaEngine>,
    ) -> Result<Self, RoomError> {
        let (sender, receiver) = mpsc::channel(MANAGER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let fatal_token = CancellationToken::new();

        let settings = config.worker_settings();
        let mut workers: Vec<Arc<dyn MediaWorker>> = Vec::with_capacity(config.num_workers);
        for _ in 0..config.num_workers {
            let worker = engine.create_worker(&settings).await?;

            let died = worker.died();
            let death_sender = sender.clone();
            let pid = worker.pid();
            tokio::spawn(async move {
                died.cancelled().await;
                let _ = death_sender.send(ManagerMessage::WorkerDied { pid }).await;
            });

            workers.push(worker);
        }

        info!(
            target: "room.manager",
            num_workers = workers.len(),
            "media workers started"
        );

        let actor = RoomManagerActor {
            receiver,
            self_sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            fatal_token: fatal_token.clone(),
            engine_version: engine.version(),
            config,
            workers,
            next_worker: 0,
            rooms: HashMap::new(),
            shutting_down: false,
        };

        tokio::spawn(actor.run());

        Ok(Self {
            sender,
            cancel_token,
            fatal_token,
        })
    }

    /// Resolve or lazily create the room for a room id.
    pub async fn get_or_create_room(&self, room_id: String) -> Result<RoomHandle, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerMessage::GetOrCreateRoom {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(RoomError::mailbox)?;
        rx.await.map_err(RoomError::mailbox)?
    }

    /// Manager status snapshot.
    pub async fn status(&self) -> Result<ManagerStatus, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerMessage::GetStatus { respond_to: tx })
            .await
            .map_err(RoomError::mailbox)?;
        rx.await.map_err(RoomError::mailbox)
    }

    /// Initiate graceful shutdown: rooms close, worker deaths stop being
    /// fatal.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(ManagerMessage::Shutdown { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
        self.cancel_token.cancel();
    }

    /// Token cancelled when a worker death makes the process unrecoverable.
    #[must_use]
    pub fn fatal_token(&self) -> CancellationToken {
        self.fatal_token.clone()
    }

    /// Cancel the manager and every room (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The `RoomManagerActor` implementation.
struct RoomManagerActor {
    receiver: mpsc::Receiver<ManagerMessage>,
    self_sender: mpsc::Sender<ManagerMessage>,
    cancel_token: CancellationToken,
    fatal_token: CancellationToken,
    engine_version: String,
    config: Arc<Config>,
    workers: Vec<Arc<dyn MediaWorker>>,
    next_worker: usize,
    rooms: HashMap<String, RoomHandle>,
    shutting_down: bool,
}

impl RoomManagerActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "room.manager")]
    async fn run(mut self) {
        info!(target: "room.manager", "RoomManagerActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.shutting_down = true;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => break,
                    }
                }
            }
        }

        info!(
            target: "room.manager",
            rooms = self.rooms.len(),
            "RoomManagerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ManagerMessage) {
        match message {
            ManagerMessage::GetOrCreateRoom {
                room_id,
                respond_to,
            } => {
                let result = self.get_or_create_room(room_id).await;
                let _ = respond_to.send(result);
            }

            ManagerMessage::RoomClosed { room_id } => {
                self.rooms.remove(&room_id);
                debug!(
                    target: "room.manager",
                    room_id = %room_id,
                    rooms = self.rooms.len(),
                    "room removed"
                );
            }

            ManagerMessage::WorkerDied { pid } => {
                self.worker_died(pid);
            }

            ManagerMessage::GetStatus { respond_to } => {
                let mut rooms: Vec<String> = self.rooms.keys().cloned().collect();
                rooms.sort();
                let worker_pids = self.workers.iter().map(|worker| worker.pid()).collect();
                let _ = respond_to.send(ManagerStatus {
                    rooms,
                    worker_pids,
                    shutting_down: self.shutting_down,
                });
            }

            ManagerMessage::Shutdown { respond_to } => {
                info!(target: "room.manager", "shutdown requested");
                self.shutting_down = true;
                for worker in &self.workers {
                    worker.close();
                }
                let _ = respond_to.send(());
            }
        }
    }

    async fn get_or_create_room(&mut self, room_id: String) -> Result<RoomHandle, RoomError> {
        if self.shutting_down {
            return Err(RoomError::ShuttingDown);
        }

        // A closed room may still be in the table if its RoomClosed message
        // has not been processed yet; treat it as absent.
        if let Some(room) = self.rooms.get(&room_id) {
            if !room.is_closed() {
                return Ok(room.clone());
            }
        }

        let worker = self.next_worker_round_robin()?;
        let room = RoomActor::create(
            room_id.clone(),
            Arc::clone(&worker),
            Arc::clone(&self.config),
            self.engine_version.clone(),
            self.self_sender.clone(),
            self.cancel_token.child_token(),
        )
        .await?;

        info!(
            target: "room.manager",
            room_id = %room_id,
            worker_pid = worker.pid(),
            "room created"
        );

        self.rooms.insert(room_id, room.clone());
        Ok(room)
    }

    fn next_worker_round_robin(&mut self) -> Result<Arc<dyn MediaWorker>, RoomError> {
        let worker = self
            .workers
            .get(self.next_worker)
            .cloned()
            .ok_or_else(|| RoomError::Internal("worker pool is empty".to_string()))?;

        self.next_worker += 1;
        if self.next_worker == self.workers.len() {
            self.next_worker = 0;
        }

        Ok(worker)
    }

    fn worker_died(&self, pid: u32) {
        if self.shutting_down {
            debug!(
                target: "room.manager",
                pid,
                "worker died during shutdown, ignoring"
            );
            return;
        }

        error!(
            target: "room.manager",
            pid,
            grace_seconds = WORKER_DEATH_GRACE_PERIOD.as_secs(),
            "media worker died unexpectedly, terminating after grace period"
        );

        let fatal = self.fatal_token.clone();
        let cancel = self.cancel_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                // A shutdown that started during the grace period wins.
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(WORKER_DEATH_GRACE_PERIOD) => {
                    fatal.cancel();
                }
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use media_engine::loopback::LoopbackEngine;
    use std::collections::HashMap as StdHashMap;

    fn test_config(num_workers: usize) -> Arc<Config> {
        let vars = StdHashMap::from([(
            "ROOM_NUM_WORKERS".to_string(),
            num_workers.to_string(),
        )]);
        Arc::new(Config::from_vars(&vars).expect("test config"))
    }

    async fn manager(num_workers: usize) -> (RoomManagerHandle, LoopbackEngine) {
        let engine = LoopbackEngine::new();
        let handle = RoomManagerHandle::new(test_config(num_workers), Arc::new(engine.clone()))
            .await
            .expect("manager should start");
        (handle, engine)
    }

    #[tokio::test]
    async fn test_worker_pool_created_at_startup() {
        let (handle, engine) = manager(3).await;

        let status = handle.status().await.unwrap();
        assert_eq!(status.worker_pids.len(), 3);
        assert_eq!(engine.worker_pids().len(), 3);
        assert!(!status.shutting_down);
        assert!(status.rooms.is_empty());
    }

    #[tokio::test]
    async fn test_get_or_create_room_is_cached() {
        let (handle, _engine) = manager(1).await;

        let first = handle.get_or_create_room("r1".to_string()).await.unwrap();
        let second = handle.get_or_create_room("r1".to_string()).await.unwrap();
        assert_eq!(first.room_id(), second.room_id());

        let status = handle.status().await.unwrap();
        assert_eq!(status.rooms, vec!["r1".to_string()]);

        let _other = handle.get_or_create_room("r2".to_string()).await.unwrap();
        let status = handle.status().await.unwrap();
        assert_eq!(status.rooms.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_death_cancels_fatal_token_after_grace() {
        let (handle, engine) = manager(1).await;
        let fatal = handle.fatal_token();

        let pid = engine.worker_pids().remove(0);
        assert!(engine.kill_worker(pid));

        // Still alive within the grace period.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!fatal.is_cancelled());

        tokio::time::sleep(WORKER_DEATH_GRACE_PERIOD + Duration::from_millis(100)).await;
        assert!(fatal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_death_during_shutdown_is_not_fatal() {
        let (handle, engine) = manager(1).await;
        let fatal = handle.fatal_token();

        handle.shutdown().await;

        let pid = engine.worker_pids().remove(0);
        engine.kill_worker(pid);

        tokio::time::sleep(WORKER_DEATH_GRACE_PERIOD * 2).await;
        assert!(!fatal.is_cancelled());
    }

    #[tokio::test]
    async fn test_no_new_rooms_after_shutdown() {
        let (handle, _engine) = manager(1).await;
        handle.shutdown().await;

        let result = handle.get_or_create_room("r1".to_string()).await;
        assert!(matches!(
            result,
            Err(RoomError::ShuttingDown) | Err(RoomError::Internal(_))
        ));
    }
}
