//! # Restart-tolerant repository fetching
//!
//! The engine invokes [RepoFetcher::fetch] every time it evaluates the node
//! for an external repository, which can be many times: whenever a needed
//! value is not ready, the engine abandons the invocation and re-invokes
//! later with a fresh dependency context. Re-running a repository rule on
//! every restart would redo downloads and process runs, so the rule executes
//! on a background worker that is started once per key and survives every
//! restart; each invocation merely hands it the latest context and waits for
//! it to either park again or finish.
//!
mod error;
mod interruptor;
mod state;
mod worker;

pub use error::*;
pub use interruptor::*;
pub use state::StateStore;

use crate::config::Config;
use crate::context::{BoxedContext, ContextProxy, DepHandle, Signal};
use crate::events::event::FetcherEvent;
use crate::events::EventChannel;
use crate::fingerprint::FingerprintRecord;
use crate::model::{RepoDirectory, RepoKey, RepoRule};
use crate::rules::RuleExecutor;
use crate::util;
use state::FetchState;
use std::path::Path;
use std::sync::Arc;
use tracing::*;
use worker::FetchOutcome;

/// What one invocation of the fetcher tells the engine.
///
#[derive(Debug)]
pub enum FetchFlow {
    /// A value the fetch depends on is not ready. The in-flight work is kept
    /// around; invoke again once the engine has made progress.
    Restart,

    /// The fetch finished. The fingerprint carries every external fact the
    /// rule read, for the engine to persist next to the repository.
    Complete {
        repo_dir: RepoDirectory,
        fingerprint: FingerprintRecord,
    },
}

/// Runs repository rules to completion across scheduler restarts.
///
/// One of these is embedded in the engine, next to the [StateStore] that
/// holds whatever must outlive a single invocation. All blocking is
/// cooperative: the engine can interrupt an invocation at any point through
/// the [Interruptor], and no background work survives the invocation that
/// saw the fetch end, whichever way it ended.
///
pub struct RepoFetcher<E: RuleExecutor> {
    config: Config,
    executor: E,
    states: Arc<StateStore>,
    event_channel: Arc<EventChannel>,
    interruptor: Interruptor,
}

impl<E: RuleExecutor> RepoFetcher<E> {
    pub fn new(config: Config, executor: E, states: Arc<StateStore>) -> Self {
        let event_channel = config.event_channel();
        Self {
            config,
            executor,
            states,
            event_channel,
            interruptor: Interruptor::new(),
        }
    }

    pub fn interruptor(&self) -> Interruptor {
        self.interruptor.clone()
    }

    /// One scheduler invocation for `key`. The first call for a key clears
    /// the target directory and launches the worker; every later call is a
    /// restart and only delivers the fresh `ctx`. Exactly one signal is
    /// consumed before returning, whichever branch runs.
    ///
    #[instrument(name = "RepoFetcher::fetch", skip(self, rule, ctx))]
    pub async fn fetch(
        &self,
        key: &RepoKey,
        rule: Arc<RepoRule>,
        repo_root: &Path,
        ctx: BoxedContext,
    ) -> Result<FetchFlow, FetchError> {
        if !self.config.worker_fetches() {
            return self.fetch_inline(key, &rule, repo_root, ctx).await;
        }

        let state = self.states.get_or_create(key);

        if !state.worker_started() {
            // the worker is what persists across restarts, not the
            // directory, so this must not run again on later invocations
            util::fs::setup_repo_root(repo_root)
                .await
                .map_err(|err| FetchError::DirectorySetup {
                    dir: repo_root.to_path_buf(),
                    err,
                })?;

            self.event_channel.send(FetcherEvent::FetchingStarted {
                repo: key.to_string(),
            });

            let context_rx = state
                .take_context_rx()
                .expect("the context receiver is taken exactly once, at worker launch");
            let proxy = ContextProxy::new(ctx, state.signal_tx(), context_rx);

            let handle = tokio::spawn(worker::run(
                self.executor.clone(),
                key.clone(),
                rule,
                repo_root.to_path_buf(),
                self.config.clone(),
                self.event_channel.clone(),
                DepHandle::Proxied(proxy),
                state.signal_tx(),
            ));
            state.record_worker(handle);
        } else if !state.deliver_context(ctx).await {
            // the worker already finished and dropped its receiver; its
            // terminal signal is waiting for us below
            debug!("worker for '{key}' is gone, skipping context delivery");
        }

        let signal = tokio::select! {
            _ = self.interruptor.interrupted() => {
                self.teardown(key, &state).await;
                return Err(FetchError::Interrupted);
            }
            signal = state.next_signal() => signal,
        };

        match signal {
            Some(Signal::Restart) => Ok(FetchFlow::Restart),
            Some(Signal::Done) => {
                let outcome = match state.take_worker() {
                    // DONE implies the worker is past its last await; this
                    // join finishes whatever instants remain
                    Some(handle) => handle.await,
                    None => {
                        self.states.remove(key);
                        return Err(FetchError::WorkerLost {
                            reason: "the worker handle was already consumed".to_string(),
                        });
                    }
                };
                self.states.remove(key);

                match outcome {
                    Ok(Ok(FetchOutcome {
                        repo_dir,
                        fingerprint,
                    })) => {
                        self.event_channel.send(FetcherEvent::FetchingCompleted {
                            repo: key.to_string(),
                        });
                        Ok(FetchFlow::Complete {
                            repo_dir,
                            fingerprint,
                        })
                    }
                    Ok(Err(err)) => Err(err),
                    Err(join_err) => Err(FetchError::WorkerLost {
                        reason: join_err.to_string(),
                    }),
                }
            }
            None => {
                // the worker died without emitting its terminal signal
                let outcome = state.take_worker();
                self.states.remove(key);
                match outcome {
                    Some(handle) => match handle.await {
                        Ok(Err(err)) => Err(err),
                        Ok(Ok(_)) => Err(FetchError::WorkerLost {
                            reason: "the worker exited without signaling".to_string(),
                        }),
                        Err(join_err) => Err(FetchError::WorkerLost {
                            reason: join_err.to_string(),
                        }),
                    },
                    None => Err(FetchError::WorkerLost {
                        reason: "the worker was never started".to_string(),
                    }),
                }
            }
        }
    }

    /// Fetch without a background worker: the rule runs on the caller's
    /// task, and a missing dependency throws this attempt away entirely,
    /// partial output included.
    ///
    async fn fetch_inline(
        &self,
        key: &RepoKey,
        rule: &RepoRule,
        repo_root: &Path,
        ctx: BoxedContext,
    ) -> Result<FetchFlow, FetchError> {
        // with nothing persisting across restarts, every attempt starts clean
        util::fs::setup_repo_root(repo_root)
            .await
            .map_err(|err| FetchError::DirectorySetup {
                dir: repo_root.to_path_buf(),
                err,
            })?;

        self.event_channel.send(FetcherEvent::FetchingStarted {
            repo: key.to_string(),
        });

        let mut executor = self.executor.clone();
        let mut deps = DepHandle::Inline(ctx);

        let result = tokio::select! {
            _ = self.interruptor.interrupted() => return Err(FetchError::Interrupted),
            result = worker::fetch_internal(
                &mut executor,
                key,
                rule,
                repo_root,
                &self.config,
                &self.event_channel,
                &mut deps,
            ) => result,
        };

        match result {
            Ok(Some(FetchOutcome {
                repo_dir,
                fingerprint,
            })) => {
                self.event_channel.send(FetcherEvent::FetchingCompleted {
                    repo: key.to_string(),
                });
                Ok(FetchFlow::Complete {
                    repo_dir,
                    fingerprint,
                })
            }
            Ok(None) => {
                self.event_channel.send(FetcherEvent::FetchingRestarted {
                    repo: key.to_string(),
                });
                util::fs::clear_repo_root(repo_root).await.map_err(|err| {
                    FetchError::DirectoryCleanup {
                        dir: repo_root.to_path_buf(),
                        err,
                    }
                })?;
                Ok(FetchFlow::Restart)
            }
            Err(err) => Err(err),
        }
    }

    /// Unwind one key's in-flight fetch: forget the state, cancel the
    /// worker, and wait for it to actually exit, so nothing keeps mutating
    /// the directory behind the engine's back. Whatever the dying worker
    /// reports is logged and discarded; the caller is already propagating
    /// the outcome that matters.
    ///
    async fn teardown(&self, key: &RepoKey, state: &FetchState) {
        self.states.remove(key);
        if let Some(handle) = state.take_worker() {
            handle.abort();
            match handle.await {
                Ok(Err(err)) => {
                    debug!("worker for '{key}' failed while being torn down: {err}")
                }
                Err(err) if !err.is_cancelled() => {
                    debug!("worker for '{key}' panicked while being torn down: {err}")
                }
                _ => {}
            }
        }
    }
}
