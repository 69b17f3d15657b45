//! Supervisor actor owning every named queue.

use std::collections::HashMap;

use chrono::Utc;
use db::Database;
use pipeline_core::{JobEvent, Queue, QueueConfig};
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;

use crate::QueueError;
use crate::messages::{QueueMessage, SupervisorMessage};
use crate::queue_actor::{QueueActor, QueueActorArgs};
use crate::rpc::{CALL_TIMEOUT, call};

/// Arguments for the supervisor actor.
pub struct SupervisorArgs {
    pub db: Database,
    pub event_tx: broadcast::Sender<JobEvent>,
}

struct QueueHandle {
    actor: ActorRef<QueueMessage>,
    config: QueueConfig,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    db: Database,
    /// Queue actors by name.
    queues: HashMap<String, QueueHandle>,
    /// Queue name by actor, for supervision events.
    names: HashMap<ActorId, String>,
    event_tx: broadcast::Sender<JobEvent>,
    stopping: bool,
}

impl SupervisorState {
    async fn spawn_queue(
        &mut self,
        myself: &ActorRef<SupervisorMessage>,
        queue: Queue,
    ) -> Result<ActorRef<QueueMessage>, QueueError> {
        let name = queue.name.clone();
        let config = queue.config.clone();
        let args = QueueActorArgs {
            queue,
            db: self.db.clone(),
            event_tx: self.event_tx.clone(),
        };

        let (actor, _handle) = Actor::spawn_linked(None, QueueActor, args, myself.get_cell())
            .await
            .map_err(|e| QueueError::Spawn(e.to_string()))?;

        self.names.insert(actor.get_id(), name.clone());
        self.queues.insert(
            name,
            QueueHandle {
                actor: actor.clone(),
                config,
            },
        );
        Ok(actor)
    }

    async fn create_queue(
        &mut self,
        myself: &ActorRef<SupervisorMessage>,
        name: String,
        config: QueueConfig,
    ) -> Result<Queue, QueueError> {
        if let Some(handle) = self.queues.get(&name) {
            return call(&handle.actor, |reply| QueueMessage::GetInfo { reply }, CALL_TIMEOUT).await;
        }

        // Keep a stored pause across restarts, take the new config.
        let queue = match self.db.queues().find_by_name(&name).await? {
            Some(mut stored) => {
                stored.config = config;
                stored.updated_at = Utc::now();
                stored
            }
            None => Queue::new(name).with_config(config),
        };
        let queue = self.db.queues().upsert(&queue).await?;

        self.spawn_queue(myself, queue.clone()).await?;

        let _ = self.event_tx.send(JobEvent::QueueCreated {
            queue: queue.name.clone(),
            timestamp: Utc::now(),
        });
        Ok(queue)
    }
}

/// Supervisor actor that manages all queues.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting job queue supervisor");

        Ok(SupervisorState {
            db: args.db,
            queues: HashMap::new(),
            names: HashMap::new(),
            event_tx: args.event_tx,
            stopping: false,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::CreateQueue {
                name,
                config,
                reply,
            } => {
                let result = state.create_queue(&myself, name, config).await;
                if let Err(ref e) = result {
                    tracing::error!("Failed to create queue: {}", e);
                }
                let _ = reply.send(result);
            }

            SupervisorMessage::GetQueue { name, reply } => {
                let _ = reply.send(state.queues.get(&name).map(|h| h.actor.clone()));
            }

            SupervisorMessage::ListQueues { reply } => {
                let mut names: Vec<String> = state.queues.keys().cloned().collect();
                names.sort();
                let _ = reply.send(names);
            }

            SupervisorMessage::Shutdown { reply } => {
                tracing::info!("Shutting down supervisor");
                state.stopping = true;
                for (name, handle) in &state.queues {
                    if let Err(e) =
                        call(&handle.actor, |reply| QueueMessage::Shutdown { reply }, CALL_TIMEOUT)
                            .await
                    {
                        tracing::warn!(queue = %name, "Queue did not acknowledge shutdown: {}", e);
                    }
                }
                let _ = reply.send(());
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                if let Some(name) = state.names.remove(&cell.get_id()) {
                    tracing::info!(queue = %name, "Queue actor terminated: {:?}", reason);
                    state.queues.remove(&name);
                }
            }
            SupervisionEvent::ActorFailed(cell, err) => {
                let Some(name) = state.names.remove(&cell.get_id()) else {
                    return Ok(());
                };
                tracing::error!(queue = %name, "Queue actor failed: {}", err);
                let Some(handle) = state.queues.remove(&name) else {
                    return Ok(());
                };
                if state.stopping {
                    return Ok(());
                }

                // Jobs are in the store; a fresh actor reloads them.
                let queue = match state.db.queues().find_by_name(&name).await {
                    Ok(Some(queue)) => queue,
                    _ => Queue::new(name.clone()).with_config(handle.config),
                };
                match state.spawn_queue(&myself, queue).await {
                    Ok(_) => tracing::info!(queue = %name, "Queue actor restarted"),
                    Err(e) => tracing::error!(queue = %name, "Failed to restart queue actor: {}", e),
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Start the supervisor.
pub async fn start_supervisor(
    db: Database,
    event_tx: broadcast::Sender<JobEvent>,
) -> Result<(ActorRef<SupervisorMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    let (actor, handle) = Actor::spawn(None, Supervisor, SupervisorArgs { db, event_tx }).await?;

    Ok((actor, handle))
}
