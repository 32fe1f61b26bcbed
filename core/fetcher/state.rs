use super::worker::FetchOutcome;
use super::FetchError;
use crate::context::{BoxedContext, Signal};
use crate::model::RepoKey;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Everything about one repository's fetch that must survive scheduler
/// restarts: the worker handle, the signal channel, and the
/// context-delivery channel. Created on the first invocation for a key,
/// destroyed once the fetch reaches a terminal outcome or is abandoned.
///
/// Both channels are bounded at one message. One signal is outstanding per
/// coordinator invocation, one replacement context per restart; anything
/// more is a protocol violation and deserves to block.
///
/// Fields are partitioned by writer: the coordinator delivers contexts and
/// consumes signals, the worker emits signals and consumes contexts, and
/// the worker handle changes hands only on the coordinator side.
///
#[derive(Debug)]
pub(crate) struct FetchState {
    worker: Mutex<Option<JoinHandle<Result<FetchOutcome, FetchError>>>>,
    signal_tx: mpsc::Sender<Signal>,
    signal_rx: tokio::sync::Mutex<mpsc::Receiver<Signal>>,
    context_tx: mpsc::Sender<BoxedContext>,
    context_rx: Mutex<Option<mpsc::Receiver<BoxedContext>>>,
}

impl FetchState {
    fn new() -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(1);
        let (context_tx, context_rx) = mpsc::channel(1);
        Self {
            worker: Mutex::new(None),
            signal_tx,
            signal_rx: tokio::sync::Mutex::new(signal_rx),
            context_tx,
            context_rx: Mutex::new(Some(context_rx)),
        }
    }

    pub(crate) fn worker_started(&self) -> bool {
        self.worker.lock().unwrap().is_some()
    }

    pub(crate) fn record_worker(&self, handle: JoinHandle<Result<FetchOutcome, FetchError>>) {
        *self.worker.lock().unwrap() = Some(handle);
    }

    pub(crate) fn take_worker(&self) -> Option<JoinHandle<Result<FetchOutcome, FetchError>>> {
        self.worker.lock().unwrap().take()
    }

    pub(crate) fn signal_tx(&self) -> mpsc::Sender<Signal> {
        self.signal_tx.clone()
    }

    pub(crate) fn take_context_rx(&self) -> Option<mpsc::Receiver<BoxedContext>> {
        self.context_rx.lock().unwrap().take()
    }

    /// Hand a replacement context to the worker. Reports whether the worker
    /// was still around to receive it.
    ///
    pub(crate) async fn deliver_context(&self, ctx: BoxedContext) -> bool {
        self.context_tx.send(ctx).await.is_ok()
    }

    /// Consume the one signal this invocation is owed. `None` means the
    /// worker went away without ever emitting its terminal signal.
    ///
    pub(crate) async fn next_signal(&self) -> Option<Signal> {
        self.signal_rx.lock().await.recv().await
    }
}

/// The engine-injected map from repository key to restart-spanning fetch
/// state, with create-if-absent semantics. Nothing in the fetcher is
/// ambient: an engine embeds exactly one of these next to its node table.
///
#[derive(Default, Debug)]
pub struct StateStore {
    states: DashMap<RepoKey, Arc<FetchState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get_or_create(&self, key: &RepoKey) -> Arc<FetchState> {
        self.states
            .entry(key.clone())
            .or_insert_with(|| Arc::new(FetchState::new()))
            .value()
            .clone()
    }

    pub(crate) fn remove(&self, key: &RepoKey) {
        self.states.remove(key);
    }

    /// Whether a fetch for `key` is currently in flight.
    pub fn is_tracking(&self, key: &RepoKey) -> bool {
        self.states.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_returns_the_same_state_for_a_key() {
        let store = StateStore::new();
        let key = RepoKey::new("acme");
        let a = store.get_or_create(&key);
        let b = store.get_or_create(&key);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn removed_keys_start_over() {
        let store = StateStore::new();
        let key = RepoKey::new("acme");
        let a = store.get_or_create(&key);
        store.remove(&key);
        assert!(store.is_empty());
        let b = store.get_or_create(&key);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn the_context_receiver_is_taken_exactly_once() {
        let store = StateStore::new();
        let key = RepoKey::new("acme");
        let state = store.get_or_create(&key);
        assert!(state.take_context_rx().is_some());
        assert!(state.take_context_rx().is_none());
    }
}
