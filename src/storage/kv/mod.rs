//! Key-value graph backend (`ddb`).
//!
//! Maps the [`Graph`] contract onto a partition/range keyed store with
//! bounded batch windows: 100 keys per read, 25 requests per write. Every
//! batch call may leave work unprocessed; it is resubmitted under a
//! [`RetryPolicy`] until the store completes it or the policy gives up.
//!
//! # Layout
//!
//! | Table | Key | Index |
//! |-------|-----|-------|
//! | `node_table` | (`sid_nid`, `nid`) | none |
//! | `edge_table` | (`sid_from`, `sid_to`) | `reverse_index` on (`sid_to`, `sid_from`) |
//!
//! # Configuration
//!
//! | Key | Default | Meaning |
//! |-----|---------|---------|
//! | `store` | `dynamodb` | `dynamodb` or `memory` |
//! | `endpoint`, `region` | required for `dynamodb` | service location |
//! | `access_key_id`, `secret_access_key` | required for `dynamodb` | credentials |
//! | `session_token` | none | temporary credentials |
//! | `node_table` / `edge_table` / `reverse_index` | `nodes` / `edges` / `reverse` | names |
//! | `max_retries` / `base_delay_ms` / `max_delay_ms` | 8 / 25 / 2000 | backoff |
//! | `operation_timeout_ms` | none | per-operation deadline |
//! | `max_concurrency` | 1 | parallel batch chunks |
//! | `cascade_deletes` | false | delete incident edges with their nodes |
//! | `request_timeout_secs` | 30 | HTTP timeout |
//! | `create_tables` | false | create missing tables at startup |

mod batch;
mod codec;
mod dynamodb;
mod edges;
pub mod keys;
mod memory;
mod nodes;
mod sigv4;
mod store;

pub use batch::Batcher;
pub use codec::{AttributeValue, Item, decode_item, decode_value, encode_properties};
pub use dynamodb::DynamoDbClient;
pub use memory::InMemoryKvStore;
pub use store::{
    BatchGetOutput, BatchWriteOutput, IndexSpec, KeyValueStore, MAX_BATCH_GET, MAX_BATCH_WRITE,
    QueryInput, QueryOutput, StoreError, StoreResult, TableDescription, TableSpec, UpdateInput,
    WriteRequest,
};

use crate::config::BackendConfig;
use crate::models::{Edges, Nodes};
use crate::storage::retry::{CancellationToken, OperationContext, RetryPolicy};
use crate::storage::traits::Graph;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Registry name of this backend.
pub const BACKEND_NAME: &str = "ddb";

/// Polls of `describe_table` while waiting for a new table to become active.
const TABLE_ACTIVE_POLLS: u32 = 120;

/// Delay between those polls.
const TABLE_ACTIVE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Adapter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvSettings {
    /// Node table name.
    pub node_table: String,
    /// Edge table name.
    pub edge_table: String,
    /// Reverse index on the edge table.
    pub reverse_index: String,
    /// Retry policy for every store call.
    pub retry: RetryPolicy,
    /// Deadline for one contract operation.
    pub operation_timeout: Option<Duration>,
    /// Batch chunks issued in parallel.
    pub max_concurrency: usize,
    /// Delete incident edges together with their nodes.
    pub cascade_deletes: bool,
}

impl Default for KvSettings {
    fn default() -> Self {
        Self {
            node_table: "nodes".to_string(),
            edge_table: "edges".to_string(),
            reverse_index: "reverse".to_string(),
            retry: RetryPolicy::default(),
            operation_timeout: None,
            max_concurrency: 1,
            cascade_deletes: false,
        }
    }
}

impl KvSettings {
    /// Reads settings from a backend configuration, applying defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a recognised key has the wrong type or is out of range.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let defaults = Self::default();
        let name = |key: &str, default: &str| -> Result<String> {
            Ok(config.optional_string(key)?.unwrap_or(default).to_string())
        };

        Ok(Self {
            node_table: name("node_table", &defaults.node_table)?,
            edge_table: name("edge_table", &defaults.edge_table)?,
            reverse_index: name("reverse_index", &defaults.reverse_index)?,
            retry: RetryPolicy {
                max_retries: u32_key(config, "max_retries", defaults.retry.max_retries)?,
                base_delay_ms: config
                    .optional_u64("base_delay_ms")?
                    .unwrap_or(defaults.retry.base_delay_ms),
                max_delay_ms: config
                    .optional_u64("max_delay_ms")?
                    .unwrap_or(defaults.retry.max_delay_ms),
            },
            operation_timeout: config
                .optional_u64("operation_timeout_ms")?
                .map(Duration::from_millis),
            max_concurrency: usize::try_from(u32_key(config, "max_concurrency", 1)?)
                .unwrap_or(1)
                .max(1),
            cascade_deletes: config
                .optional_bool("cascade_deletes")?
                .unwrap_or(defaults.cascade_deletes),
        })
    }
}

fn u32_key(config: &BackendConfig, key: &str, default: u32) -> Result<u32> {
    config.optional_u64(key)?.map_or(Ok(default), |value| {
        u32::try_from(value).map_err(|_| Error::InvalidConfigType {
            key: key.to_string(),
            expected: "32-bit integer",
            found: "integer out of range",
        })
    })
}

/// Graph backend over a [`KeyValueStore`].
#[derive(Clone)]
pub struct KvGraphBackend {
    batcher: Batcher,
    settings: KvSettings,
    cancel: CancellationToken,
}

impl KvGraphBackend {
    /// Creates a backend over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, settings: KvSettings) -> Self {
        Self {
            batcher: Batcher::new(store, settings.retry, settings.max_concurrency),
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Builds a backend from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a key is missing or mistyped, the store kind is
    /// unknown, or table creation was requested and failed.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let settings = KvSettings::from_config(config)?;
        let store: Arc<dyn KeyValueStore> = match config.optional_string("store")?.unwrap_or("dynamodb") {
            "dynamodb" => Arc::new(DynamoDbClient::from_config(config)?),
            "memory" => Arc::new(InMemoryKvStore::new()),
            other => {
                return Err(Error::InvalidInput(format!(
                    "unknown key-value store '{other}', expected 'dynamodb' or 'memory'"
                )));
            },
        };

        let backend = Self::new(store, settings);
        if config.optional_bool("create_tables")?.unwrap_or(false) {
            backend.ensure_tables()?;
        }

        tracing::info!(
            node_table = %backend.settings.node_table,
            edge_table = %backend.settings.edge_table,
            max_concurrency = backend.settings.max_concurrency,
            cascade_deletes = backend.settings.cascade_deletes,
            "Key-value backend initialized"
        );
        Ok(backend)
    }

    /// The adapter settings.
    #[must_use]
    pub const fn settings(&self) -> &KvSettings {
        &self.settings
    }

    /// A token that cancels every in-flight and future operation of this backend.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn context(&self, operation: &'static str) -> OperationContext {
        OperationContext::new(operation, self.settings.operation_timeout, self.cancel.clone())
    }

    /// Creates the node table and the edge table with its reverse index
    /// when they do not exist, then waits for them to become active.
    ///
    /// # Errors
    ///
    /// Returns an error if a table cannot be described or created.
    #[instrument(skip(self))]
    pub fn ensure_tables(&self) -> Result<()> {
        let ctx = self.context("ensure_tables");
        let specs = [
            keys::node_table(&self.settings.node_table),
            keys::edge_table(&self.settings.edge_table, &self.settings.reverse_index),
        ];
        let store = self.batcher.store();

        for spec in &specs {
            match self
                .batcher
                .with_retry(&ctx, "describe_table", &spec.name, || store.describe_table(&spec.name))?
            {
                Ok(_) => continue,
                Err(StoreError::ResourceNotFound(_)) => {},
                Err(e) => return Err(e.into_error(ctx.operation())),
            }

            match self
                .batcher
                .with_retry(&ctx, "create_table", &spec.name, || store.create_table(spec))?
            {
                Ok(()) => tracing::info!(table = %spec.name, "Created table"),
                Err(StoreError::ResourceInUse(_)) => {},
                Err(e) => return Err(e.into_error(ctx.operation())),
            }
        }

        for spec in &specs {
            self.wait_until_active(&ctx, &spec.name)?;
        }
        Ok(())
    }

    fn wait_until_active(&self, ctx: &OperationContext, table: &str) -> Result<()> {
        let store = self.batcher.store();
        for _ in 0..TABLE_ACTIVE_POLLS {
            let description = self
                .batcher
                .with_retry(ctx, "describe_table", table, || store.describe_table(table))?
                .map_err(|e| e.into_error(ctx.operation()))?;
            if description.is_active() {
                return Ok(());
            }
            ctx.sleep(TABLE_ACTIVE_POLL_INTERVAL)?;
        }
        Err(Error::OperationFailed {
            operation: ctx.operation().to_string(),
            cause: format!("table {table} did not become active"),
        })
    }
}

impl Graph for KvGraphBackend {
    #[instrument(skip(self, nodes), fields(requested = nodes.len()))]
    fn get_nodes(&self, nodes: Nodes) -> Result<Nodes> {
        self.fetch_nodes(&self.context("get_nodes"), nodes)
    }

    #[instrument(skip(self, edges), fields(endpoints = edges.endpoints().count()))]
    fn get_in_edges(&self, edges: Edges) -> Result<Edges> {
        self.fetch_in_edges(&self.context("get_in_edges"), &edges)
    }

    #[instrument(skip(self, edges), fields(requested = edges.len()))]
    fn get_out_edges(&self, edges: Edges) -> Result<Edges> {
        self.fetch_out_edges(&self.context("get_out_edges"), edges)
    }

    #[instrument(skip(self, nodes), fields(requested = nodes.len()))]
    fn create_nodes(&self, nodes: Nodes) -> Result<Nodes> {
        self.write_nodes(&self.context("create_nodes"), nodes)
    }

    #[instrument(skip(self, edges), fields(requested = edges.len()))]
    fn create_edges(&self, edges: Edges) -> Result<Edges> {
        self.write_edges(&self.context("create_edges"), edges)
    }

    #[instrument(skip(self, nodes), fields(requested = nodes.len()))]
    fn alter_nodes(&self, nodes: Nodes) -> Result<Nodes> {
        self.update_nodes(&self.context("alter_nodes"), &nodes)
    }

    #[instrument(skip(self, nodes), fields(requested = nodes.len()))]
    fn delete_nodes(&self, nodes: Nodes) -> Result<()> {
        self.remove_nodes(&self.context("delete_nodes"), &nodes)
    }

    #[instrument(skip(self))]
    fn ping(&self) -> Result<()> {
        let ctx = self.context("ping");
        let store = self.batcher.store();
        for table in [&self.settings.node_table, &self.settings.edge_table] {
            let description = self
                .batcher
                .with_retry(&ctx, "describe_table", table, || store.describe_table(table))?
                .map_err(|e| e.into_error(ctx.operation()))?;
            if !description.is_active() {
                return Err(Error::OperationFailed {
                    operation: ctx.operation().to_string(),
                    cause: format!("table {table} is {}", description.status),
                });
            }
        }
        Ok(())
    }
}
