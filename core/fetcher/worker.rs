use super::FetchError;
use crate::config::Config;
use crate::context::{DepHandle, DependencyId, Signal};
use crate::events::event::FetcherEvent;
use crate::events::EventChannel;
use crate::fingerprint::{describe_semantics, FingerprintRecord};
use crate::model::{RepoDirectory, RepoKey, RepoRule};
use crate::rules::{env_value, FetchContext, RuleError, RuleExecutor};
use crate::util;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::*;

/// What one completed fetch produced: the validated directory and the
/// record of every external fact the rule read on the way there. It only
/// travels through the worker's join handle, so it is observable strictly
/// after the terminal signal, and never for a failed attempt.
///
#[derive(Debug)]
pub(crate) struct FetchOutcome {
    pub repo_dir: RepoDirectory,
    pub fingerprint: FingerprintRecord,
}

/// The body of the background fetch worker. Started at most once per key;
/// never restarted. Emits exactly one `Done`, on every exit path, after the
/// outcome is sealed into the return value.
///
pub(crate) async fn run<E: RuleExecutor>(
    mut executor: E,
    repo: RepoKey,
    rule: Arc<RepoRule>,
    repo_root: PathBuf,
    config: Config,
    events: Arc<EventChannel>,
    mut deps: DepHandle,
    signal_tx: mpsc::Sender<Signal>,
) -> Result<FetchOutcome, FetchError> {
    let result = fetch_internal(
        &mut executor,
        &repo,
        &rule,
        &repo_root,
        &config,
        &events,
        &mut deps,
    )
    .await;

    // nobody may be listening anymore if the fetch was abandoned
    let _ = signal_tx.send(Signal::Done).await;

    match result {
        Ok(Some(outcome)) => Ok(outcome),
        // proxied resolution never leaves a dependency behind; landing here
        // means the coordinator hung up mid-resolution
        Ok(None) => Err(FetchError::Interrupted),
        Err(err) => Err(err),
    }
}

/// One fetch attempt, shared by the worker-backed and the inline modes.
/// Returns `Ok(None)` when a dependency is missing and the attempt must be
/// redone from scratch; a worker-backed attempt never does, since its
/// resolution handle parks instead of giving up.
///
pub(crate) async fn fetch_internal<E: RuleExecutor>(
    executor: &mut E,
    repo: &RepoKey,
    rule: &RepoRule,
    repo_root: &Path,
    config: &Config,
    events: &Arc<EventChannel>,
    deps: &mut DepHandle,
) -> Result<Option<FetchOutcome>, FetchError> {
    events.send(FetcherEvent::RuleDefinitionLocated {
        repo: repo.to_string(),
        definition: rule.definition_info().to_string(),
    });

    let mut fingerprint = FingerprintRecord::new();

    // the environment variables the rule declares are dependencies of the
    // fetch, looked up as a batch before anything else happens
    let mut missing_environ = false;
    for name in rule.environ() {
        match deps
            .resolve(&DependencyId::EnvVar(name.clone()))
            .await?
        {
            Some(value) => fingerprint.add_env(name, env_value(&value)),
            None => missing_environ = true,
        }
    }
    if missing_environ || deps.has_pending_requests() {
        return Ok(None);
    }

    let Some(semantics) = deps.resolve(&DependencyId::Semantics).await? else {
        return Ok(None);
    };
    fingerprint.set_semantics(describe_semantics(&semantics));

    let mut fetch_ctx = FetchContext::new(
        repo,
        rule,
        repo_root,
        config,
        events.clone(),
        deps,
    );

    if let Err(err) = fetch_ctx.enforce_label_attributes().await {
        return match err {
            // missing values are expected; restart before the rule starts
            RuleError::MissingDependency => Ok(None),
            RuleError::Interrupted => Err(FetchError::Interrupted),
            other => Err(FetchError::RuleFailed {
                repo: repo.clone(),
                err: other,
            }),
        };
    }

    debug!("running the repository rule for '{repo}'");
    let result = executor.execute(rule, &mut fetch_ctx).await;

    let rule_succeeded = result.is_ok();
    let leaked_work = fetch_ctx.ensure_no_pending_work(rule_succeeded).await;
    if leaked_work && rule_succeeded {
        return Err(FetchError::PendingWork { repo: repo.clone() });
    }

    match result {
        Ok(_value) => {}
        Err(RuleError::MissingDependency) => return Ok(None),
        Err(RuleError::Interrupted) => return Err(FetchError::Interrupted),
        Err(err) => {
            events.send(FetcherEvent::FetchFailed {
                repo: repo.to_string(),
                message: err.message_with_stack(),
            });
            events.send(FetcherEvent::RuleDefinitionLocated {
                repo: repo.to_string(),
                definition: rule.definition_info().to_string(),
            });
            return Err(FetchError::RuleFailed {
                repo: repo.clone(),
                err,
            });
        }
    }

    let facts = fetch_ctx.into_recorded();
    for (name, value) in facts.env {
        fingerprint.add_env(&name, value);
    }
    for (label, digest) in facts.files {
        fingerprint.add_file(&label, digest);
    }
    for ((from, alias), to) in facts.repo_mappings {
        fingerprint.add_repo_mapping(&from, &alias, to);
    }

    events.send(FetcherEvent::RepoResolved {
        repo: repo.to_string(),
    });

    match tokio::fs::metadata(repo_root).await {
        Ok(metadata) if metadata.is_dir() => {}
        _ => {
            return Err(FetchError::NoRepositoryDirectory { repo: repo.clone() });
        }
    }

    util::fs::ensure_repo_markers(repo_root, config.enable_legacy_markers())
        .await
        .map_err(|err| FetchError::DirectorySetup {
            dir: repo_root.to_path_buf(),
            err,
        })?;

    Ok(Some(FetchOutcome {
        repo_dir: RepoDirectory::new(repo_root),
        fingerprint,
    }))
}
