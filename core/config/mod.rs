use crate::events::EventChannel;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::*;

/// Marker file that denotes a well-formed repository root.
pub const REPO_FILE: &str = "Repofile";

/// Older tools look for this marker instead. Only created when
/// `Config::enable_legacy_markers` is set.
pub const LEGACY_REPO_FILE: &str = "Workspacefile";

/// A collection of flags and options that affect how repository fetches run.
/// This is not specific to one repository, it relates to the fetcher itself.
///
#[derive(Builder, Debug, Clone)]
#[builder(build_fn(error = "ConfigError"))]
pub struct Config {
    /// Run fetches on a persistent background worker so the repository rule
    /// executes exactly once, no matter how often the engine restarts the
    /// owning node. When disabled, fetches run inline on the caller's task
    /// and start over from scratch on every restart.
    #[builder(default = "true")]
    worker_fetches: bool,

    /// Never access the network, but continue working if possible.
    #[builder(default = "false")]
    offline: bool,

    /// The client environment at the time this config was created. This is
    /// separated to assist with testing.
    #[builder(default = "self.default_env()?")]
    env: HashMap<String, String>,

    /// Also create the legacy marker file in fetched repositories.
    #[builder(default = "false")]
    enable_legacy_markers: bool,

    /// The HTTP Client used for rule-initiated downloads.
    /// NOTE: this is safe to clone since it is really an [Arc] to a client pool.
    #[builder(default = "self.default_http_client()")]
    http_client: reqwest::Client,

    /// The Event Channel used across the fetcher.
    /// NOTE: this is safe to clone since it is really an [Arc] to the queue.
    #[builder(default = "self.default_event_channel()")]
    event_channel: Arc<EventChannel>,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build().unwrap()
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn worker_fetches(&self) -> bool {
        self.worker_fetches
    }

    pub fn offline(&self) -> bool {
        self.offline
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    pub fn enable_legacy_markers(&self) -> bool {
        self.enable_legacy_markers
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    pub fn event_channel(&self) -> Arc<EventChannel> {
        self.event_channel.clone()
    }
}

impl ConfigBuilder {
    fn default_env(&self) -> Result<HashMap<String, String>, ConfigError> {
        let env = std::env::vars_os()
            .filter_map(|(k, v)| match (k.into_string(), v.into_string()) {
                (Ok(k), Ok(v)) => Some((k, v)),
                _ => None,
            })
            .collect();
        Ok(env)
    }

    fn default_http_client(&self) -> reqwest::Client {
        reqwest::Client::new()
    }

    fn default_event_channel(&self) -> Arc<EventChannel> {
        EventChannel::new().into()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Attempted to build a Config struct while missing fields: {0:?}")]
    BuilderError(derive_builder::UninitializedFieldError),
}

impl From<derive_builder::UninitializedFieldError> for ConfigError {
    fn from(err: derive_builder::UninitializedFieldError) -> Self {
        Self::BuilderError(err)
    }
}
