use super::RuleError;
use crate::config::Config;
use crate::context::{DepHandle, DependencyId};
use crate::events::event::{ArchiveEvent, RuleEvent};
use crate::events::EventChannel;
use crate::model::{RepoKey, RepoRule};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::*;
use url::Url;

/// Handle to one piece of deferred work started by a rule. The rule must
/// come back for it with [FetchContext::await_async_work] before returning.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkToken(usize);

struct PendingWork {
    token: WorkToken,
    description: String,
    handle: JoinHandle<Result<(), RuleError>>,
}

/// Everything a rule accesses while it runs: the target directory, the
/// client environment, file dependencies, name remappings, and downloads.
///
/// Every external fact read through here is recorded, and the accumulated
/// facts become the fetch's fingerprint. Dependency lookups go through the
/// fetcher's resolution handle, so a missing value suspends (or restarts)
/// the fetch instead of observing stale data.
///
pub struct FetchContext<'a> {
    repo: &'a RepoKey,
    rule: &'a RepoRule,
    repo_root: &'a Path,
    config: &'a Config,
    events: Arc<EventChannel>,
    deps: &'a mut DepHandle,
    env_facts: BTreeMap<String, Option<String>>,
    file_digests: BTreeMap<String, String>,
    repo_mappings: BTreeMap<(String, String), String>,
    pending: Vec<PendingWork>,
    next_token: usize,
}

/// The facts a rule accumulated over one run, harvested after it returns.
///
pub(crate) struct RecordedFacts {
    pub env: BTreeMap<String, Option<String>>,
    pub files: BTreeMap<String, String>,
    pub repo_mappings: BTreeMap<(String, String), String>,
}

impl<'a> FetchContext<'a> {
    pub(crate) fn new(
        repo: &'a RepoKey,
        rule: &'a RepoRule,
        repo_root: &'a Path,
        config: &'a Config,
        events: Arc<EventChannel>,
        deps: &'a mut DepHandle,
    ) -> Self {
        let mut repo_mappings = BTreeMap::new();
        // mappings inherited from the rule definition site are inputs of the
        // fetch whether or not the rule ever looks one up
        for mapping in rule.definition_mappings() {
            repo_mappings.insert(
                (mapping.from.clone(), mapping.alias.clone()),
                mapping.to.clone(),
            );
        }

        Self {
            repo,
            rule,
            repo_root,
            config,
            events,
            deps,
            env_facts: BTreeMap::new(),
            file_digests: BTreeMap::new(),
            repo_mappings,
            pending: vec![],
            next_token: 0,
        }
    }

    /// The directory this rule is expected to populate. Exclusively owned by
    /// the running rule for the duration of the fetch attempt.
    pub fn repo_root(&self) -> &Path {
        self.repo_root
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.rule.attrs().get(name)
    }

    /// Read a client environment variable, tracking it as an input of this
    /// fetch.
    ///
    pub async fn getenv(&mut self, name: &str) -> Result<Option<String>, RuleError> {
        let resolved = self
            .deps
            .resolve(&DependencyId::EnvVar(name.to_string()))
            .await?;
        let Some(value) = resolved else {
            return Err(RuleError::MissingDependency);
        };
        let value = env_value(&value);
        self.env_facts.insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// Read the file behind a label, tracking its content digest as an
    /// input of this fetch.
    ///
    pub async fn read(&mut self, label: &str) -> Result<String, RuleError> {
        let path = self.resolve_label(label).await?;
        let bytes = tokio::fs::read(&path).await.map_err(|err| {
            RuleError::CouldNotReadFile {
                file: path.clone(),
                err,
            }
        })?;
        let digest = format!("{:x}", Sha256::digest(&bytes));
        self.file_digests.insert(label.to_string(), digest);
        String::from_utf8(bytes)
            .map_err(|_| RuleError::eval(format!("the file behind '{label}' is not valid UTF-8")))
    }

    /// Resolve an apparent repository name within `from` to its canonical
    /// name, tracking the remapping as an input of this fetch.
    ///
    pub fn map_repository(&mut self, from: &str, alias: &str) -> Option<String> {
        let mapping = self
            .rule
            .definition_mappings()
            .iter()
            .find(|m| m.from == from && m.alias == alias)?;
        self.repo_mappings.insert(
            (from.to_string(), alias.to_string()),
            mapping.to.clone(),
        );
        Some(mapping.to.clone())
    }

    /// Report a diagnostic message to the event sink.
    pub fn print(&self, message: &str) {
        self.events.send(RuleEvent::Printed {
            repo: self.repo.to_string(),
            message: message.to_string(),
        });
    }

    /// Download `url` into `output`, waiting for it to finish.
    pub async fn download(
        &mut self,
        url: &Url,
        output: impl AsRef<Path>,
    ) -> Result<(), RuleError> {
        download_file(
            self.config.http_client().clone(),
            self.config.offline(),
            self.events.clone(),
            url.clone(),
            output.as_ref().to_path_buf(),
        )
        .await
    }

    /// Start a download in the background. The rule must wait for the
    /// returned token before it finishes, or the fetch is rejected.
    ///
    pub fn start_download(&mut self, url: &Url, output: impl Into<PathBuf>) -> WorkToken {
        let work = download_file(
            self.config.http_client().clone(),
            self.config.offline(),
            self.events.clone(),
            url.clone(),
            output.into(),
        );
        self.start_async_work(format!("download of {url}"), work)
    }

    /// Start an arbitrary piece of deferred work on behalf of the rule.
    pub fn start_async_work<F>(&mut self, description: impl Into<String>, work: F) -> WorkToken
    where
        F: Future<Output = Result<(), RuleError>> + Send + 'static,
    {
        let token = WorkToken(self.next_token);
        self.next_token += 1;
        self.pending.push(PendingWork {
            token,
            description: description.into(),
            handle: tokio::spawn(work),
        });
        token
    }

    /// Wait for a piece of deferred work and surface its outcome.
    pub async fn await_async_work(&mut self, token: WorkToken) -> Result<(), RuleError> {
        let position = self
            .pending
            .iter()
            .position(|work| work.token == token)
            .ok_or_else(|| RuleError::eval("unknown or already-awaited work token"))?;
        let work = self.pending.swap_remove(position);
        match work.handle.await {
            Ok(result) => result,
            Err(_) => Err(RuleError::Interrupted),
        }
    }

    /// Detect deferred work the rule started but never came back for. A
    /// fetch must not report done while background work is still mutating
    /// the directory, so every straggler is cancelled and drained; when the
    /// rule otherwise succeeded, each one is also reported, since the leak
    /// turns that success into a failure.
    ///
    pub(crate) async fn ensure_no_pending_work(&mut self, rule_succeeded: bool) -> bool {
        let mut leaked = false;
        for work in self.pending.drain(..) {
            leaked = true;
            if rule_succeeded {
                warn!(
                    "rule for '{}' leaked pending work: {}",
                    self.repo, work.description
                );
                self.events.send(RuleEvent::PendingWorkDetected {
                    repo: self.repo.to_string(),
                    description: work.description,
                });
            }
            work.handle.abort();
            let _ = work.handle.await;
        }
        leaked
    }

    /// Resolve every file label the rule declares before the rule runs.
    /// Restarting is really expensive once side effects have begun, so any
    /// label that is going to suspend the fetch should do it here.
    ///
    pub(crate) async fn enforce_label_attributes(&mut self) -> Result<(), RuleError> {
        let rule = self.rule;
        for label in rule.label_attrs() {
            self.resolve_label(label).await?;
        }
        Ok(())
    }

    pub(crate) fn into_recorded(self) -> RecordedFacts {
        RecordedFacts {
            env: self.env_facts,
            files: self.file_digests,
            repo_mappings: self.repo_mappings,
        }
    }

    async fn resolve_label(&mut self, label: &str) -> Result<PathBuf, RuleError> {
        let resolved = self
            .deps
            .resolve(&DependencyId::File(label.to_string()))
            .await?;
        let Some(value) = resolved else {
            return Err(RuleError::MissingDependency);
        };
        match value.as_str() {
            Some(path) => Ok(PathBuf::from(path)),
            None => Err(RuleError::eval(format!(
                "dependency '{label}' did not resolve to a file path"
            ))),
        }
    }
}

pub(crate) fn env_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

async fn download_file(
    client: reqwest::Client,
    offline: bool,
    events: Arc<EventChannel>,
    url: Url,
    output: PathBuf,
) -> Result<(), RuleError> {
    if offline {
        return Err(RuleError::Offline { url });
    }

    events.send(ArchiveEvent::DownloadStarted { url: url.clone() });

    let response = client.get(url.clone()).send().await?;
    if !response.status().is_success() {
        return Err(RuleError::DownloadFailed {
            url,
            status: response.status(),
        });
    }
    let bytes = response.bytes().await?;

    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| RuleError::CouldNotWriteFile {
                file: output.clone(),
                err,
            })?;
    }
    tokio::fs::write(&output, &bytes)
        .await
        .map_err(|err| RuleError::CouldNotWriteFile {
            file: output.clone(),
            err,
        })?;

    events.send(ArchiveEvent::DownloadCompleted { url });

    Ok(())
}
