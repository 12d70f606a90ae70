//! Bridge from a blocking fragment source to an async event stream.
//!
//! The source is opened, pulled and dropped on one worker in tokio's
//! blocking pool. The async side asks for one fragment at a time and
//! suspends on a oneshot reply, so at most one pull is ever in flight and
//! events keep producer order. The worker answers every pull with a
//! [`Pulled`] value; exhaustion is the `Exhausted` sentinel, never an error.

mod accumulator;

pub use accumulator::FragmentAccumulator;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ChatLoopError;
use crate::provider::{ChatProvider, FragmentSource, ProviderRequest, ResponseFragment};
use crate::types::EventStream;

/// Per-bridge knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Longest wait for a single pull. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

/// Result of one pull from the source.
#[derive(Debug)]
enum Pulled {
    Fragment(ResponseFragment),
    /// No more values.
    Exhausted,
    Fault(ChatLoopError),
}

impl Pulled {
    fn next_from(source: &mut FragmentSource) -> Self {
        match source.next() {
            Some(Ok(fragment)) => Self::Fragment(fragment),
            Some(Err(e)) => Self::Fault(e),
            None => Self::Exhausted,
        }
    }

    fn is_terminal(&self) -> bool {
        !matches!(self, Self::Fragment(_))
    }
}

type PullRequest = oneshot::Sender<Pulled>;

/// Stream `request` from `provider` through a bridge.
pub fn bridge_provider(
    provider: Arc<dyn ChatProvider>,
    request: ProviderRequest,
    options: BridgeOptions,
    cancel: CancellationToken,
) -> EventStream {
    let name = provider.provider_name().to_string();
    bridge_fragments(name, move || provider.generate(&request), options, cancel)
}

/// Bridge the source returned by `open` into an [`EventStream`].
///
/// `open` runs on the worker, since opening may block as well. The stream
/// yields text and tool-call deltas, then one `Completion`; or it stops at
/// the first error. Cancelling `cancel` or dropping the stream ends it and
/// tells the worker to stop pulling.
pub fn bridge_fragments<F>(
    source_name: impl Into<String>,
    open: F,
    options: BridgeOptions,
    cancel: CancellationToken,
) -> EventStream
where
    F: FnOnce() -> Result<FragmentSource, ChatLoopError> + Send + 'static,
{
    let source_name = source_name.into();
    let cancel = cancel.child_token();
    let (requests, inbox) = mpsc::channel::<PullRequest>(1);

    let worker_cancel = cancel.clone();
    let worker_name = source_name.clone();
    tokio::task::spawn_blocking(move || run_worker(&worker_name, open, inbox, worker_cancel));

    let stream = async_stream::stream! {
        let _guard = cancel.clone().drop_guard();
        let mut acc = FragmentAccumulator::new();
        let mut pulls = 0usize;

        loop {
            if cancel.is_cancelled() {
                debug!(source = %source_name, pulls, "bridge canceled");
                break;
            }

            let (reply_tx, reply_rx) = oneshot::channel();
            if requests.send(reply_tx).await.is_err() {
                yield Err(worker_gone(&source_name));
                break;
            }
            pulls += 1;

            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(source = %source_name, pulls, "bridge canceled mid-pull");
                    break;
                }
                reply = await_reply(reply_rx, options.idle_timeout) => reply,
            };

            match reply {
                Ok(Pulled::Fragment(fragment)) => {
                    for event in acc.push(fragment) {
                        yield Ok(event);
                    }
                }
                Ok(Pulled::Exhausted) => {
                    debug!(source = %source_name, pulls, "source exhausted");
                    yield Ok(acc.finish());
                    break;
                }
                Ok(Pulled::Fault(e)) => {
                    debug!(source = %source_name, pulls, error = %e, "source faulted");
                    yield Err(as_provider_fault(&source_name, e));
                    break;
                }
                Err(ChatLoopError::Timeout(ms)) => {
                    debug!(source = %source_name, pulls, timeout_ms = ms, "pull timed out");
                    yield Err(ChatLoopError::Timeout(ms));
                    break;
                }
                Err(_) => {
                    yield Err(worker_gone(&source_name));
                    break;
                }
            }
        }
    };
    Box::pin(stream)
}

async fn await_reply(
    reply: oneshot::Receiver<Pulled>,
    idle_timeout: Option<Duration>,
) -> Result<Pulled, ChatLoopError> {
    let received = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, reply)
            .await
            .map_err(|_| ChatLoopError::Timeout(limit.as_millis() as u64))?,
        None => reply.await,
    };
    received.map_err(|_| ChatLoopError::InvalidState("bridge worker dropped its reply".into()))
}

fn run_worker<F>(
    source_name: &str,
    open: F,
    mut inbox: mpsc::Receiver<PullRequest>,
    cancel: CancellationToken,
) where
    F: FnOnce() -> Result<FragmentSource, ChatLoopError>,
{
    if cancel.is_cancelled() {
        return;
    }

    let mut source = match open() {
        Ok(source) => source,
        Err(e) => {
            if let Some(reply) = inbox.blocking_recv() {
                let _ = reply.send(Pulled::Fault(e));
            }
            return;
        }
    };
    debug!(source = %source_name, "bridge worker opened source");

    while let Some(reply) = inbox.blocking_recv() {
        if cancel.is_cancelled() {
            break;
        }
        let pulled = Pulled::next_from(&mut source);
        let terminal = pulled.is_terminal();
        if reply.send(pulled).is_err() || terminal {
            break;
        }
    }
    debug!(source = %source_name, "bridge worker stopped");
}

fn as_provider_fault(source_name: &str, err: ChatLoopError) -> ChatLoopError {
    match err {
        fault @ ChatLoopError::ProviderFault { .. } => fault,
        other => ChatLoopError::provider_fault(source_name, other.to_string()),
    }
}

fn worker_gone(source_name: &str) -> ChatLoopError {
    ChatLoopError::provider_fault(source_name, "worker stopped before replying")
}
