//! # The Freight Core
//!
//! The flow begins by creating a `Config` struct and using it to build a
//! `RepoFetcher`. The build engine calls `RepoFetcher::fetch` every time it
//! (re)evaluates an external repository node, handing over a fresh
//! `DependencyContext` on every call. The fetcher keeps the expensive,
//! side-effecting repository rule running on a persistent background worker
//! across those restarts, and hands back a `FetchFlow` that is either a
//! completed `RepoDirectory` plus its `FingerprintRecord`, or a request to
//! come back once more dependencies are ready.
//!

pub mod context;
pub mod events;
pub(crate) mod util;

mod config;
mod fetcher;
mod fingerprint;
mod model;
mod rules;

pub use config::*;
pub use fetcher::*;
pub use fingerprint::*;
pub use model::*;
pub use rules::*;

#[macro_use]
extern crate derive_builder;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;
