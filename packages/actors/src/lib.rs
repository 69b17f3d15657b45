//! Actor system for the stage job queues.
//!
//! This crate provides the Ractor-based actor system for managing named
//! job queues, their workers, and the supervisor.
//!
//! # Architecture
//!
//! - `Supervisor` - Top-level actor that owns one queue actor per name
//! - `QueueActor` - Holds a queue's jobs, dispatches them and tracks leases
//! - `WorkerActor` - Pulls jobs from its queue and runs the handler
//! - `JobQueue` - Cloneable handle used by the rest of the system
//!
//! # Usage
//!
//! ```ignore
//! let queue = JobQueue::start(db).await?;
//! queue.create_queue("resume-processing", QueueConfig::default()).await?;
//! queue.enqueue("resume-processing", payload, EnqueueOptions::default()).await?;
//! queue.consume("resume-processing", 4, handler, gate).await?;
//! ```

mod error;
mod handler;
mod job_queue;
mod messages;
mod queue_actor;
mod rpc;
mod supervisor;
mod worker_actor;

pub use error::QueueError;
pub use handler::{FnHandler, HandlerFuture, HandlerResult, JobHandler};
pub use job_queue::JobQueue;
pub use messages::{JobFilter, QueueMessage, SupervisorMessage, WorkerMessage};
pub use queue_actor::{QueueActor, QueueActorArgs};
pub use rpc::CALL_TIMEOUT;
pub use supervisor::{Supervisor, SupervisorArgs, start_supervisor};
pub use worker_actor::{WorkerActor, WorkerArgs};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort};
