//! # Dependency resolution for repository fetches
//!
//! The engine hands the fetcher a fresh [DependencyContext] on every
//! (re)invocation. Fetch code never holds on to one directly: all resolution
//! goes through a [proxy::DepHandle], which either forwards to the latest
//! context inline, or parks the background worker until the engine comes
//! back with a replacement context.
//!
mod proxy;

pub(crate) use proxy::*;
pub use proxy::{ContextProxy, Interrupted};

use async_trait::async_trait;
use serde_json::Value;

/// One value the engine can be asked for during a fetch.
///
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum DependencyId {
    /// The digest-able description of the rule-language semantics in effect.
    Semantics,
    /// A client environment variable, tracked as an input of the fetch.
    EnvVar(String),
    /// A file dependency, identified by its label. Resolves to the file's
    /// path on disk.
    File(String),
}

/// The outcome of asking the engine for a value: either the value, or a
/// report that it has not been computed yet and the caller must come back.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Value),
    NotReady,
}

/// The engine-supplied handle through which a fetch requests the values it
/// depends on. A fresh instance arrives with every scheduler invocation;
/// resolving against a superseded instance is a correctness violation, which
/// is why fetch code only ever sees one through the proxy.
///
#[async_trait]
pub trait DependencyContext: Send {
    async fn resolve(&self, id: &DependencyId) -> Resolution;

    /// Whether any value requested through this context is still being
    /// computed. A batch of lookups is incomplete while this holds.
    fn has_pending_requests(&self) -> bool;
}

pub type BoxedContext = Box<dyn DependencyContext>;
