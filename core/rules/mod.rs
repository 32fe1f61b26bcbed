//! # Repository rule execution
//!
//! The rule implementation itself lives behind the [RuleExecutor] trait: an
//! opaque invocable that receives a [FetchContext] and either returns a
//! structured value or raises a [RuleError]. The fetcher neither knows nor
//! cares how the rule is implemented; it only relies on the rule reaching
//! every external fact through the context it was handed.
//!
mod context;

pub use context::*;

use crate::context::Interrupted;
use crate::model::RepoRule;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

#[async_trait]
pub trait RuleExecutor: Clone + Send + Sync + 'static {
    /// Run the repository rule once. The rule is mainly executed for its
    /// side effects on `ctx.repo_root()`; the return value describes how the
    /// call would have to be modified to be reproducible.
    ///
    /// The executor may suspend indefinitely inside any `ctx` resolution
    /// call, and it must await any deferred work it started before
    /// returning.
    ///
    async fn execute(
        &mut self,
        rule: &RepoRule,
        ctx: &mut FetchContext<'_>,
    ) -> Result<Value, RuleError>;
}

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("{message}")]
    Eval { message: String, stack: Vec<String> },

    /// A value the rule depends on has not been computed yet. When fetching
    /// inline this unwinds the rule so the engine can restart it; a
    /// worker-backed fetch never observes it.
    #[error("a value this rule depends on is not yet available")]
    MissingDependency,

    #[error("the fetch was interrupted")]
    Interrupted,

    #[error("Could not read file at {file:?} due to {err:?}")]
    CouldNotReadFile { file: PathBuf, err: std::io::Error },

    #[error("Could not write file at {file:?} due to {err:?}")]
    CouldNotWriteFile { file: PathBuf, err: std::io::Error },

    #[error("cannot download {url} while running offline")]
    Offline { url: Url },

    #[error("download of {url} failed with status {status}")]
    DownloadFailed {
        url: Url,
        status: reqwest::StatusCode,
    },

    #[error(transparent)]
    TransportError(reqwest::Error),

    /// An opaque failure inside whatever interprets the rule.
    #[error(transparent)]
    ExecutorError(anyhow::Error),
}

impl From<reqwest::Error> for RuleError {
    fn from(err: reqwest::Error) -> Self {
        Self::TransportError(err)
    }
}

impl From<anyhow::Error> for RuleError {
    fn from(err: anyhow::Error) -> Self {
        Self::ExecutorError(err)
    }
}

impl RuleError {
    pub fn eval(message: impl Into<String>) -> Self {
        Self::Eval {
            message: message.into(),
            stack: vec![],
        }
    }

    pub fn eval_with_stack(message: impl Into<String>, stack: Vec<String>) -> Self {
        Self::Eval {
            message: message.into(),
            stack,
        }
    }

    /// The error message with the rule stack appended, the way it is
    /// reported to the event sink.
    pub fn message_with_stack(&self) -> String {
        match self {
            Self::Eval { message, stack } if !stack.is_empty() => {
                format!("{message}\n{}", stack.join("\n"))
            }
            other => other.to_string(),
        }
    }
}

impl From<Interrupted> for RuleError {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}
