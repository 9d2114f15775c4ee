//! Node operations of the key-value backend.

use super::codec::{AttributeValue, Item, decode_item, encode_properties};
use super::keys::{self, EDGE_PARTITION, EDGE_RANGE, NODE_PARTITION, NODE_RANGE};
use super::store::{QueryInput, StoreError, UpdateInput, WriteRequest};
use super::KvGraphBackend;
use crate::models::{Node, Nodes, Property};
use crate::storage::retry::OperationContext;
use crate::{Error, Result};
use std::collections::BTreeSet;

impl KvGraphBackend {
    pub(super) fn fetch_nodes(&self, ctx: &OperationContext, mut nodes: Nodes) -> Result<Nodes> {
        let source = nodes.source_id()?.to_string();
        let request: Vec<Item> = nodes.ids().map(|id| keys::node_key(&source, id)).collect();
        if request.is_empty() {
            return Ok(nodes);
        }

        let items = self
            .batcher
            .get_all(ctx, &self.settings.node_table, &request)?;

        // Decode everything before touching the response so a type error
        // leaves no partial node behind.
        let mut found = Vec::with_capacity(items.len());
        for item in items {
            let Some(id) = keys::string_attribute(&item, NODE_RANGE).map(str::to_string) else {
                return Err(malformed(ctx, "node record without nid"));
            };
            let properties = decode_item(&id, item, keys::is_internal)?;
            found.push((id, properties));
        }

        for (_, node) in nodes.iter_mut() {
            node.properties.clear();
        }
        let hits = found.len();
        for (id, properties) in found {
            nodes.get_or_create(id).properties = properties;
        }

        tracing::debug!(source = %source, requested = request.len(), found = hits, "Fetched nodes");
        Ok(nodes)
    }

    pub(super) fn write_nodes(&self, ctx: &OperationContext, mut nodes: Nodes) -> Result<Nodes> {
        let source = nodes.source_id()?.to_string();
        let requests: Vec<WriteRequest> = nodes
            .iter()
            .map(|(id, node)| {
                let mut item = encode_properties(&node.properties);
                item.extend(keys::node_key(&source, id));
                WriteRequest::Put(item)
            })
            .collect();
        if requests.is_empty() {
            return Ok(nodes);
        }

        self.batcher
            .write_all(ctx, &self.settings.node_table, &requests)?;

        for (id, node) in nodes.iter_mut() {
            node.properties.set(NODE_RANGE, Property::String(id.to_string()));
        }
        tracing::debug!(source = %source, written = requests.len(), "Created nodes");
        Ok(nodes)
    }

    pub(super) fn update_nodes(&self, ctx: &OperationContext, nodes: &Nodes) -> Result<Nodes> {
        let source = nodes.source_id()?.to_string();

        let mut updates = Vec::with_capacity(nodes.len());
        for (id, node) in nodes.iter() {
            let mut set = encode_properties(&node.properties);
            set.remove(NODE_PARTITION);
            set.remove(NODE_RANGE);
            if set.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "node '{id}' has no properties to alter"
                )));
            }
            updates.push((
                id,
                UpdateInput {
                    table: self.settings.node_table.clone(),
                    key: keys::node_key(&source, id),
                    set,
                    require_exists: true,
                },
            ));
        }

        self.require_nodes(ctx, &source, nodes)?;

        let store = self.batcher.store();
        let mut altered = Nodes::with_source(source.clone());
        for (id, input) in updates {
            let outcome = self
                .batcher
                .with_retry(ctx, "update", &input.table, || store.update(&input))?;
            match outcome {
                Ok(item) => {
                    let properties = decode_item(id, item, keys::is_internal)?;
                    altered.insert(id, Node::with_properties(properties));
                },
                Err(StoreError::ConditionFailed(_)) => {
                    return Err(Error::NotFound(format!(
                        "node '{id}' in source '{source}'"
                    )));
                },
                Err(e) => return Err(e.into_error(ctx.operation())),
            }
        }

        tracing::debug!(source = %source, altered = altered.len(), "Altered nodes");
        Ok(altered)
    }

    /// Fails with `NotFound` naming every requested id that has no record.
    fn require_nodes(&self, ctx: &OperationContext, source: &str, nodes: &Nodes) -> Result<()> {
        let request: Vec<Item> = nodes.ids().map(|id| keys::node_key(source, id)).collect();
        let existing: BTreeSet<String> = self
            .batcher
            .get_all(ctx, &self.settings.node_table, &request)?
            .iter()
            .filter_map(|item| keys::string_attribute(item, NODE_RANGE).map(str::to_string))
            .collect();

        let missing: BTreeSet<&str> = nodes.ids().filter(|id| !existing.contains(*id)).collect();
        if missing.is_empty() {
            return Ok(());
        }
        let missing: Vec<&str> = missing.into_iter().collect();
        Err(Error::NotFound(format!(
            "nodes [{}] in source '{source}'",
            missing.join(", ")
        )))
    }

    pub(super) fn remove_nodes(&self, ctx: &OperationContext, nodes: &Nodes) -> Result<()> {
        let source = nodes.source_id()?.to_string();
        let ids: Vec<&str> = nodes.ids().collect();
        if ids.is_empty() {
            return Ok(());
        }

        if self.settings.cascade_deletes {
            let incident = self.incident_edges(ctx, &source, &ids)?;
            if !incident.is_empty() {
                let requests: Vec<WriteRequest> = incident.into_iter().map(WriteRequest::Delete).collect();
                tracing::debug!(source = %source, edges = requests.len(), "Cascading edge deletes");
                self.batcher
                    .write_all(ctx, &self.settings.edge_table, &requests)?;
            }
        } else {
            for id in &ids {
                let edges = self.dependent_edge_count(ctx, &source, id)?;
                if edges > 0 {
                    return Err(Error::HasDependentEdges {
                        node: (*id).to_string(),
                        edges,
                    });
                }
            }
        }

        let requests: Vec<WriteRequest> = ids
            .iter()
            .map(|id| WriteRequest::Delete(keys::node_key(&source, id)))
            .collect();
        self.batcher
            .write_all(ctx, &self.settings.node_table, &requests)?;
        tracing::debug!(source = %source, deleted = requests.len(), "Deleted nodes");
        Ok(())
    }

    /// Edges observed in each direction, at most one per direction.
    fn dependent_edge_count(&self, ctx: &OperationContext, source: &str, id: &str) -> Result<usize> {
        let mut count = 0;
        for input in self.incident_queries(source, id, Some(1)) {
            count += self.batcher.query_page(ctx, &input)?.items.len();
        }
        Ok(count)
    }

    /// Keys of every edge leaving or entering any of `ids`.
    fn incident_edges(&self, ctx: &OperationContext, source: &str, ids: &[&str]) -> Result<Vec<Item>> {
        let mut pairs = BTreeSet::new();
        for id in ids {
            for input in self.incident_queries(source, id, None) {
                for item in self.batcher.query_all(ctx, input)? {
                    let from = keys::string_attribute(&item, EDGE_PARTITION);
                    let to = keys::string_attribute(&item, EDGE_RANGE);
                    if let (Some(from), Some(to)) = (from, to) {
                        pairs.insert((from.to_string(), to.to_string()));
                    }
                }
            }
        }
        Ok(pairs
            .into_iter()
            .map(|(from, to)| {
                Item::from([
                    (EDGE_PARTITION.to_string(), AttributeValue::String(from)),
                    (EDGE_RANGE.to_string(), AttributeValue::String(to)),
                ])
            })
            .collect())
    }

    fn incident_queries(&self, source: &str, id: &str, limit: Option<usize>) -> [QueryInput; 2] {
        let scoped = keys::scoped(source, id);
        [
            QueryInput {
                table: self.settings.edge_table.clone(),
                index: None,
                partition_attribute: EDGE_PARTITION.to_string(),
                partition_value: scoped.clone(),
                exclusive_start_key: None,
                limit,
            },
            QueryInput {
                table: self.settings.edge_table.clone(),
                index: Some(self.settings.reverse_index.clone()),
                partition_attribute: EDGE_RANGE.to_string(),
                partition_value: scoped,
                exclusive_start_key: None,
                limit,
            },
        ]
    }
}

pub(super) fn malformed(ctx: &OperationContext, cause: &str) -> Error {
    Error::OperationFailed {
        operation: ctx.operation().to_string(),
        cause: cause.to_string(),
    }
}
