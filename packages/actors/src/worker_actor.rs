//! Worker actor for executing jobs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::FutureExt;
use pipeline_core::{AdmissionGate, JobEvent, JobId, contain_panics};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;

use crate::handler::JobHandler;
use crate::messages::{QueueMessage, WorkerMessage};

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub queue_name: String,
    pub queue: ActorRef<QueueMessage>,
    pub handler: Arc<dyn JobHandler>,
    pub gate: Arc<dyn AdmissionGate>,
    pub poll_interval: Duration,
    pub event_tx: broadcast::Sender<JobEvent>,
}

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID.
    pub worker_id: String,
    pub queue_name: String,
    /// Job being processed, if any.
    pub current_job: Option<JobId>,
    queue: ActorRef<QueueMessage>,
    handler: Arc<dyn JobHandler>,
    gate: Arc<dyn AdmissionGate>,
    poll_interval: Duration,
    event_tx: broadcast::Sender<JobEvent>,
    /// Whether the worker should continue running.
    running: bool,
}

impl WorkerActorState {
    /// Check if the worker is idle.
    pub fn is_idle(&self) -> bool {
        self.current_job.is_none()
    }
}

/// Worker actor that pulls jobs from its queue and runs the handler.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        let state = WorkerActorState {
            worker_id: args.worker_id,
            queue_name: args.queue_name,
            current_job: None,
            queue: args.queue,
            handler: args.handler,
            gate: args.gate,
            poll_interval: args.poll_interval,
            event_tx: args.event_tx,
            running: true,
        };

        // Start the work loop
        let poll_interval = state.poll_interval;
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                if myself_clone.send_message(WorkerMessage::Poll).is_err() {
                    break;
                }
            }
        });

        let _ = state.event_tx.send(JobEvent::WorkerConnected {
            worker_id: state.worker_id.clone(),
            queue: state.queue_name.clone(),
            timestamp: Utc::now(),
        });

        Ok(state)
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let _ = state.event_tx.send(JobEvent::WorkerDisconnected {
            worker_id: state.worker_id.clone(),
            queue: state.queue_name.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if !state.running {
                    myself.stop(None);
                    return Ok(());
                }

                // Busy: keep the lease alive
                if let Some(job_id) = state.current_job {
                    state.queue.send_message(QueueMessage::Heartbeat {
                        job_id,
                        worker_id: state.worker_id.clone(),
                    })?;
                    return Ok(());
                }

                if !state.gate.can_admit() {
                    return Ok(());
                }

                let result = ractor::rpc::call(
                    &state.queue,
                    |reply| QueueMessage::RequestJob {
                        worker_id: state.worker_id.clone(),
                        reply,
                    },
                    Some(Duration::from_secs(5)),
                )
                .await;
                let Ok(CallResult::Success(Some(job))) = result else {
                    return Ok(());
                };

                let job_key = job.id.to_string();
                if !state.gate.try_admit(&job_key) {
                    tracing::debug!(job_id = %job.id, "Admission refused, releasing job");
                    state.queue.send_message(QueueMessage::ReleaseJob {
                        job_id: job.id,
                        worker_id: state.worker_id.clone(),
                    })?;
                    return Ok(());
                }

                let job_id = job.id;
                state.current_job = Some(job_id);

                let handler = state.handler.clone();
                let gate = state.gate.clone();
                let myself_clone = myself.clone();
                let started = Instant::now();
                tokio::spawn(async move {
                    let run =
                        AssertUnwindSafe(contain_panics(async move { handler.handle(&job).await }));
                    let outcome = match run.catch_unwind().await {
                        Ok(outcome) => outcome,
                        Err(_) => Err("job handler panicked".to_string()),
                    };
                    gate.release(&job_key);
                    let _ = myself_clone.send_message(WorkerMessage::JobFinished {
                        job_id,
                        started,
                        outcome,
                    });
                });
            }

            WorkerMessage::JobFinished {
                job_id,
                started,
                outcome,
            } => {
                if state.current_job == Some(job_id) {
                    state.current_job = None;
                }

                tracing::debug!(
                    job_id = %job_id,
                    worker_id = %state.worker_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    ok = outcome.is_ok(),
                    "Handler finished"
                );

                let worker_id = state.worker_id.clone();
                match outcome {
                    Ok(result) => state.queue.send_message(QueueMessage::JobCompleted {
                        job_id,
                        worker_id,
                        result,
                    })?,
                    Err(error) => state.queue.send_message(QueueMessage::JobFailed {
                        job_id,
                        worker_id,
                        error,
                    })?,
                }
            }

            WorkerMessage::IsIdle { reply } => {
                let _ = reply.send(state.is_idle());
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.worker_id);
                state.running = false;
                myself.stop(None);
            }
        }

        Ok(())
    }
}
