//! Storage layer.
//!
//! The [`Graph`] contract and the backends that implement it:
//! - **kv**: partition/range keyed key-value store with batched, retried access
//! - **cypher**: property graph database reached through Cypher
//!
//! Backends are looked up by name through the [`BackendRegistry`].

// Allow significant_drop_tightening - lock guards are released at the end of short scopes.
#![allow(clippy::significant_drop_tightening)]
// Allow match_same_arms for explicit enum handling.
#![allow(clippy::match_same_arms)]

pub mod cypher;
pub mod kv;
pub mod registry;
pub mod resilience;
pub mod retry;
pub mod traits;

pub use cypher::CypherGraphBackend;
pub use kv::{InMemoryKvStore, KeyValueStore, KvGraphBackend, KvSettings};
pub use registry::{BackendFactory, BackendRegistry, register_backend, resolve_backend};
pub use resilience::{BreakerConfig, BreakerPhase, ResilientGraph};
pub use retry::{CancellationToken, RetryPolicy};
pub use traits::Graph;
