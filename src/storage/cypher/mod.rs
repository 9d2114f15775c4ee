//! Cypher graph backend (`neo`).
//!
//! Stores each source as a node label and each edge as an `EDGE`
//! relationship, reached through the Neo4j HTTP transaction endpoint. Every
//! contract call is one transaction: it commits completely or not at all.
//!
//! # Configuration
//!
//! | Key | Default | Meaning |
//! |-----|---------|---------|
//! | `host` | required | server host |
//! | `port` | 7474 | HTTP port |
//! | `scheme` | `http` | `http` or `https` |
//! | `user`, `password` | none | basic auth |
//! | `database` | `neo4j` | database name |
//! | `request_timeout_secs` | 30 | HTTP timeout |
//! | `cascade_deletes` | false | `DETACH DELETE` nodes with their edges |

pub mod statements;
mod transaction;

pub use transaction::{OpenTransaction, StatementResult, Transport};

use self::statements::Statement;
use super::traits::Graph;
use crate::config::BackendConfig;
use crate::models::{Edges, NODE_ID, Node, Nodes, Properties};
use crate::{Error, Result};
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;
use tracing::instrument;

/// Registry name of this backend.
pub const BACKEND_NAME: &str = "neo";

const DEFAULT_PORT: i64 = 7474;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Graph backend over Cypher.
#[derive(Debug)]
pub struct CypherGraphBackend {
    transport: Transport,
    cascade_deletes: bool,
}

impl CypherGraphBackend {
    /// Creates a backend over `transport`.
    #[must_use]
    pub const fn new(transport: Transport, cascade_deletes: bool) -> Self {
        Self {
            transport,
            cascade_deletes,
        }
    }

    /// Builds a backend from configuration. No request is made until the
    /// first operation.
    ///
    /// # Errors
    ///
    /// Returns an error if a key is missing or mistyped or the server
    /// address is invalid.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let host = config.string_key("host")?;
        let port = config.optional_int("port")?.unwrap_or(DEFAULT_PORT);
        let scheme = config.optional_string("scheme")?.unwrap_or("http");
        let database = config.optional_string("database")?.unwrap_or("neo4j");
        let timeout = config
            .optional_u64("request_timeout_secs")?
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let base = Url::parse(&format!("{scheme}://{host}:{port}/")).map_err(|e| {
            Error::InitializationFailed {
                backend: BACKEND_NAME.to_string(),
                cause: format!("invalid server address: {e}"),
            }
        })?;
        let transport = Transport::new(
            base,
            database,
            config.optional_string("user")?.map(str::to_string),
            config.optional_secret("password")?,
            Duration::from_secs(timeout),
        )?;
        let cascade_deletes = config.optional_bool("cascade_deletes")?.unwrap_or(false);

        tracing::info!(host, port, database, cascade_deletes, "Cypher backend initialized");
        Ok(Self::new(transport, cascade_deletes))
    }
}

/// First column of the first row, if any.
fn single_value(result: StatementResult) -> Option<Value> {
    result.into_rows().next().and_then(|row| row.into_iter().next())
}

impl Graph for CypherGraphBackend {
    #[instrument(skip(self, nodes), fields(requested = nodes.len()))]
    fn get_nodes(&self, mut nodes: Nodes) -> Result<Nodes> {
        let source = nodes.source_id()?.to_string();
        let ids: Vec<String> = nodes.ids().map(str::to_string).collect();
        if ids.is_empty() {
            return Ok(nodes);
        }

        let requests: Vec<Statement> = ids.iter().map(|id| statements::get_node(&source, id)).collect();
        let results = self.transport.commit("get_nodes", &requests)?;

        let mut found = Vec::new();
        for (id, result) in ids.into_iter().zip(results) {
            let properties = match single_value(result) {
                Some(value) => statements::from_row(&id, value)?,
                None => Properties::new(),
            };
            found.push((id, properties));
        }
        for (id, properties) in found {
            nodes.get_or_create(id).properties = properties;
        }
        Ok(nodes)
    }

    #[instrument(skip(self, edges), fields(endpoints = edges.endpoints().count()))]
    fn get_in_edges(&self, edges: Edges) -> Result<Edges> {
        let source = edges.source_id()?.to_string();
        let endpoints: Vec<String> = edges.endpoints().map(str::to_string).collect();
        let mut response = Edges::with_source(source.clone());
        if endpoints.is_empty() {
            return Ok(response);
        }

        let requests: Vec<Statement> = endpoints
            .iter()
            .map(|to| statements::get_in_edges(&source, to))
            .collect();
        let results = self.transport.commit("get_in_edges", &requests)?;

        for (to, result) in endpoints.into_iter().zip(results) {
            response.add_endpoint(to.clone());
            let (Some(from_at), Some(props_at)) = (result.column("from"), result.column("r")) else {
                continue;
            };
            for mut row in result.into_rows() {
                let props = row.get_mut(props_at).map(Value::take).unwrap_or_default();
                let from = match row.get(from_at) {
                    Some(Value::String(from)) => from.clone(),
                    _ => continue,
                };
                let properties = statements::from_row(&format!("{from}->{to}"), props)?;
                *response.get_or_create(to.clone(), from) = properties;
            }
        }
        Ok(response)
    }

    #[instrument(skip(self, edges), fields(requested = edges.len()))]
    fn get_out_edges(&self, mut edges: Edges) -> Result<Edges> {
        let source = edges.source_id()?.to_string();
        let pairs: Vec<(String, String)> = edges
            .pairs()
            .map(|(from, to, _)| (from.to_string(), to.to_string()))
            .collect();
        if pairs.is_empty() {
            return Ok(edges);
        }

        let requests: Vec<Statement> = pairs
            .iter()
            .map(|(from, to)| statements::get_edge(&source, from, to))
            .collect();
        let results = self.transport.commit("get_out_edges", &requests)?;

        let mut found = Vec::with_capacity(pairs.len());
        for ((from, to), result) in pairs.into_iter().zip(results) {
            let properties = match single_value(result) {
                Some(value) => statements::from_row(&format!("{from}->{to}"), value)?,
                None => Properties::new(),
            };
            found.push((from, to, properties));
        }
        for (from, to, properties) in found {
            *edges.get_or_create(from, to) = properties;
        }
        Ok(edges)
    }

    #[instrument(skip(self, nodes), fields(requested = nodes.len()))]
    fn create_nodes(&self, nodes: Nodes) -> Result<Nodes> {
        let source = nodes.source_id()?.to_string();
        let mut requests = Vec::with_capacity(nodes.len());
        let mut ids = Vec::with_capacity(nodes.len());
        for (id, node) in nodes.iter() {
            let mut properties = node.properties.clone();
            properties.remove(NODE_ID);
            requests.push(statements::put_node(&source, id, &properties)?);
            ids.push(id.to_string());
        }
        if requests.is_empty() {
            return Ok(nodes);
        }

        let results = self.transport.commit("create_nodes", &requests)?;
        let mut created = Nodes::with_source(source.clone());
        for (id, result) in ids.into_iter().zip(results) {
            let properties = match single_value(result) {
                Some(value) => statements::from_row(&id, value)?,
                None => Properties::new(),
            };
            created.insert(id, Node::with_properties(properties));
        }
        tracing::debug!(source = %source, written = created.len(), "Created nodes");
        Ok(created)
    }

    #[instrument(skip(self, edges), fields(requested = edges.len()))]
    fn create_edges(&self, edges: Edges) -> Result<Edges> {
        let source = edges.source_id()?.to_string();
        let requests = edges
            .pairs()
            .map(|(from, to, properties)| statements::put_edge(&source, from, to, properties))
            .collect::<Result<Vec<_>>>()?;
        if requests.is_empty() {
            return Ok(edges);
        }

        self.transport.commit("create_edges", &requests)?;
        tracing::debug!(source = %source, written = requests.len(), "Created edges");
        Ok(edges)
    }

    #[instrument(skip(self, nodes), fields(requested = nodes.len()))]
    fn alter_nodes(&self, nodes: Nodes) -> Result<Nodes> {
        let source = nodes.source_id()?.to_string();
        let mut requests = Vec::with_capacity(nodes.len());
        let mut ids = Vec::with_capacity(nodes.len());
        for (id, node) in nodes.iter() {
            if node.properties.keys().all(|key| key == NODE_ID) {
                return Err(Error::InvalidInput(format!(
                    "node '{id}' has no properties to alter"
                )));
            }
            requests.push(statements::alter_node(&source, id, &node.properties)?);
            ids.push(id.to_string());
        }
        if requests.is_empty() {
            return Ok(Nodes::with_source(source));
        }

        let (tx, results) = self.transport.begin("alter_nodes", &requests)?;
        if let Some(missing) = ids.iter().zip(&results).find(|(_, r)| r.is_empty()).map(|(id, _)| id) {
            self.transport.rollback("alter_nodes", tx)?;
            return Err(Error::NotFound(format!(
                "node '{missing}' in source '{source}'"
            )));
        }
        self.transport.commit_open("alter_nodes", tx, &[])?;

        let mut altered = Nodes::with_source(source);
        for (id, result) in ids.into_iter().zip(results) {
            let properties = match single_value(result) {
                Some(value) => statements::from_row(&id, value)?,
                None => Properties::new(),
            };
            altered.insert(id, Node::with_properties(properties));
        }
        Ok(altered)
    }

    #[instrument(skip(self, nodes), fields(requested = nodes.len()))]
    fn delete_nodes(&self, nodes: Nodes) -> Result<()> {
        let source = nodes.source_id()?.to_string();
        let ids: Vec<&str> = nodes.ids().collect();
        if ids.is_empty() {
            return Ok(());
        }
        let deletes: Vec<Statement> = ids
            .iter()
            .map(|id| statements::delete_node(&source, id, self.cascade_deletes))
            .collect();

        if self.cascade_deletes {
            self.transport.commit("delete_nodes", &deletes)?;
            return Ok(());
        }

        let counts: Vec<Statement> = ids.iter().map(|id| statements::count_edges(&source, id)).collect();
        let (tx, results) = self.transport.begin("delete_nodes", &counts)?;
        for (id, result) in ids.iter().zip(results) {
            let edges = single_value(result)
                .and_then(|v| v.as_u64())
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0);
            if edges > 0 {
                self.transport.rollback("delete_nodes", tx)?;
                return Err(Error::HasDependentEdges {
                    node: (*id).to_string(),
                    edges,
                });
            }
        }
        self.transport.commit_open("delete_nodes", tx, &deletes)?;
        tracing::debug!(source = %source, deleted = ids.len(), "Deleted nodes");
        Ok(())
    }

    #[instrument(skip(self))]
    fn ping(&self) -> Result<()> {
        self.transport.commit("ping", &[statements::ping()])?;
        Ok(())
    }
}
