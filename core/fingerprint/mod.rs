//! # Fetch fingerprints
//!
//! Every successful fetch produces a record of the external facts it read:
//! the rule-language semantics in effect, environment variables, file
//! digests, and name remappings. The engine persists the record next to the
//! fetched repository and, on a later build, replays it against the current
//! facts to decide whether the repository can be reused without running the
//! rule again.
//!
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Fingerprint key under which the semantics digest is recorded.
pub const SEMANTICS: &str = "RULE_SEMANTICS";

/// Recorded value for an environment variable that was read but not set.
pub const ENV_UNSET: &str = "<unset>";

const ENV_PREFIX: &str = "ENV:";
const FILE_PREFIX: &str = "FILE:";
const REPO_MAPPING_PREFIX: &str = "REPO_MAPPING:";

/// Produce a stable digest for an opaque semantics value. Any observable
/// change to the semantics changes the digest and invalidates every fetched
/// repository that recorded it.
///
pub fn describe_semantics(semantics: &Value) -> String {
    let encoded = serde_json::to_vec(semantics).unwrap();
    format!("{:x}", Sha256::digest(encoded))
}

/// The accumulated input facts of one fetch attempt. Entries are append-only
/// while the rule runs; the record only becomes visible to callers on a
/// completed fetch, so a failed attempt never leaks partial entries.
///
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    entries: BTreeMap<String, String>,
}

impl FingerprintRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_semantics(&mut self, digest: impl Into<String>) {
        self.entries.insert(SEMANTICS.to_string(), digest.into());
    }

    pub(crate) fn add_env(&mut self, name: &str, value: Option<String>) {
        self.entries.insert(
            format!("{ENV_PREFIX}{name}"),
            value.unwrap_or_else(|| ENV_UNSET.to_string()),
        );
    }

    pub(crate) fn add_file(&mut self, label: &str, digest: impl Into<String>) {
        self.entries
            .insert(format!("{FILE_PREFIX}{label}"), digest.into());
    }

    pub(crate) fn add_repo_mapping(&mut self, from: &str, alias: &str, to: impl Into<String>) {
        self.entries
            .insert(format!("{REPO_MAPPING_PREFIX}{from},{alias}"), to.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|v| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of all environment variables this record depends on.
    pub fn env_keys(&self) -> impl Iterator<Item = &str> {
        self.entries
            .keys()
            .filter_map(|k| k.strip_prefix(ENV_PREFIX))
    }

    /// Replay every recorded fact against the currently observable values.
    /// Only a full match permits reusing the previously fetched repository;
    /// a changed value, a fact that no longer resolves, or a key this
    /// version does not understand all force a fresh fetch.
    ///
    pub fn is_up_to_date(&self, view: &impl FingerprintView) -> bool {
        for (key, recorded) in &self.entries {
            let current = if key == SEMANTICS {
                view.semantics_digest()
            } else if let Some(name) = key.strip_prefix(ENV_PREFIX) {
                Some(view.env_var(name).unwrap_or_else(|| ENV_UNSET.to_string()))
            } else if let Some(label) = key.strip_prefix(FILE_PREFIX) {
                view.file_digest(label)
            } else if let Some(mapping) = key.strip_prefix(REPO_MAPPING_PREFIX) {
                match mapping.split_once(',') {
                    Some((from, alias)) => view.repo_mapping(from, alias),
                    None => None,
                }
            } else {
                None
            };

            if current.as_deref() != Some(recorded.as_str()) {
                return false;
            }
        }
        true
    }
}

/// The currently observable values of the facts a [FingerprintRecord] can
/// refer to. Supplied by the engine; comparing against it is a pure
/// function with no concurrency concerns.
///
pub trait FingerprintView {
    fn semantics_digest(&self) -> Option<String>;
    fn env_var(&self, name: &str) -> Option<String>;
    fn file_digest(&self, label: &str) -> Option<String>;
    fn repo_mapping(&self, from: &str, alias: &str) -> Option<String>;
}
