use super::{BoxedContext, DependencyId, Resolution};
use serde_json::Value;
use thiserror::*;
use tokio::sync::mpsc;
use tracing::*;

/// What a fetch worker tells its coordinator. `Restart` means the worker is
/// parked on a dependency that is not ready; the coordinator should report
/// "not ready" to the engine and come back with a fresh context. `Done`
/// means the worker has finished, successfully or not, and its outcome can
/// be joined. A worker emits any number of `Restart`s followed by exactly
/// one `Done`.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Restart,
    Done,
}

/// The fetch was abandoned while a dependency resolution was in flight: the
/// coordinator side of the handoff channels is gone.
///
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("the fetch was abandoned while resolving a dependency")]
pub struct Interrupted;

/// A stand-in for the current [super::DependencyContext] that a background
/// worker holds for its entire lifetime.
///
/// The worker never talks to the raw context: every resolution goes through
/// here, and whenever the current context reports a value as not ready, the
/// proxy emits `Signal::Restart` and parks the worker until the coordinator
/// delivers a replacement context, then retries against that one. The
/// channels are bounded at one message so that a second signal or a second
/// replacement in flight, both protocol violations, block loudly instead of
/// queueing up silently.
///
pub struct ContextProxy {
    current: BoxedContext,
    signal_tx: mpsc::Sender<Signal>,
    context_rx: mpsc::Receiver<BoxedContext>,
}

impl ContextProxy {
    pub(crate) fn new(
        seed: BoxedContext,
        signal_tx: mpsc::Sender<Signal>,
        context_rx: mpsc::Receiver<BoxedContext>,
    ) -> Self {
        Self {
            current: seed,
            signal_tx,
            context_rx,
        }
    }

    /// Resolve `id` against the most recently delivered context, restarting
    /// the owning node function as many times as it takes for the value to
    /// become ready.
    ///
    pub(crate) async fn resolve(&mut self, id: &DependencyId) -> Result<Value, Interrupted> {
        loop {
            match self.current.resolve(id).await {
                Resolution::Resolved(value) => return Ok(value),
                Resolution::NotReady => {
                    trace!("dependency {:?} not ready, requesting a restart", id);
                    self.signal_tx
                        .send(Signal::Restart)
                        .await
                        .map_err(|_| Interrupted)?;
                    match self.context_rx.recv().await {
                        Some(replacement) => self.current = replacement,
                        None => return Err(Interrupted),
                    }
                }
            }
        }
    }

    pub(crate) fn has_pending_requests(&self) -> bool {
        self.current.has_pending_requests()
    }
}

/// The one resolution capability fetch code programs against, so the
/// worker-backed mode and the inline mode share a single fetch body.
///
/// Inline resolution reports a missing value as `Ok(None)`: the caller
/// unwinds, the partial output is discarded, and the engine re-invokes from
/// scratch later. Proxied resolution never yields `None`; it either blocks
/// until the value is ready or fails with [Interrupted] once the
/// coordinator side has hung up.
///
pub(crate) enum DepHandle {
    Inline(BoxedContext),
    Proxied(ContextProxy),
}

impl DepHandle {
    pub(crate) async fn resolve(
        &mut self,
        id: &DependencyId,
    ) -> Result<Option<Value>, Interrupted> {
        match self {
            DepHandle::Inline(ctx) => match ctx.resolve(id).await {
                Resolution::Resolved(value) => Ok(Some(value)),
                Resolution::NotReady => Ok(None),
            },
            DepHandle::Proxied(proxy) => proxy.resolve(id).await.map(Some),
        }
    }

    pub(crate) fn has_pending_requests(&self) -> bool {
        match self {
            DepHandle::Inline(ctx) => ctx.has_pending_requests(),
            DepHandle::Proxied(proxy) => proxy.has_pending_requests(),
        }
    }
}
