//! Request/response helper over ractor's rpc module.

use std::time::Duration;

use ractor::rpc::CallResult;
use ractor::{ActorRef, Message, RpcReplyPort};

use crate::QueueError;

/// Default time to wait for an actor reply.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Send a request to `actor` and wait for its reply.
pub(crate) async fn call<M, T, F>(actor: &ActorRef<M>, build: F, timeout: Duration) -> Result<T, QueueError>
where
    M: Message,
    T: Send + 'static,
    F: FnOnce(RpcReplyPort<T>) -> M,
{
    match ractor::rpc::call(actor, build, Some(timeout)).await {
        Ok(CallResult::Success(reply)) => Ok(reply),
        Ok(CallResult::Timeout) => Err(QueueError::Timeout),
        Ok(CallResult::SenderError) => Err(QueueError::Actor("reply channel dropped".into())),
        Err(_) => Err(QueueError::Actor(format!(
            "actor {} is not running",
            actor.get_id()
        ))),
    }
}
