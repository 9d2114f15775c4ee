//! Edge operations of the key-value backend.

use super::KvGraphBackend;
use super::codec::{Item, decode_item, encode_properties};
use super::keys::{self, EDGE_PARTITION, EDGE_RANGE};
use super::nodes::malformed;
use super::store::{QueryInput, WriteRequest};
use crate::models::{Edges, Properties};
use crate::storage::retry::OperationContext;
use crate::Result;

impl KvGraphBackend {
    pub(super) fn fetch_out_edges(&self, ctx: &OperationContext, mut edges: Edges) -> Result<Edges> {
        let source = edges.source_id()?.to_string();
        let requested: Vec<(String, String)> = edges
            .pairs()
            .map(|(from, to, _)| (from.to_string(), to.to_string()))
            .collect();
        if requested.is_empty() {
            return Ok(edges);
        }

        let request: Vec<Item> = requested
            .iter()
            .map(|(from, to)| keys::edge_key(&source, from, to))
            .collect();
        let items = self
            .batcher
            .get_all(ctx, &self.settings.edge_table, &request)?;

        let mut found = Vec::with_capacity(items.len());
        for item in items {
            found.push(decode_edge(ctx, &source, item)?);
        }

        for (from, to) in &requested {
            edges.get_or_create(from.as_str(), to.as_str()).clear();
        }
        let hits = found.len();
        for (from, to, properties) in found {
            *edges.get_or_create(from, to) = properties;
        }

        tracing::debug!(source = %source, requested = requested.len(), found = hits, "Fetched out-edges");
        Ok(edges)
    }

    /// Looks up every edge pointing at each requested endpoint through the
    /// reverse index. The response is keyed `edges[to][from]`.
    pub(super) fn fetch_in_edges(&self, ctx: &OperationContext, edges: &Edges) -> Result<Edges> {
        let source = edges.source_id()?.to_string();
        let mut result = Edges::with_source(source.clone());

        let mut found = 0_usize;
        for to in edges.endpoints() {
            result.add_endpoint(to);
            let input = QueryInput {
                table: self.settings.edge_table.clone(),
                index: Some(self.settings.reverse_index.clone()),
                partition_attribute: EDGE_RANGE.to_string(),
                partition_value: keys::scoped(&source, to),
                exclusive_start_key: None,
                limit: None,
            };
            for item in self.batcher.query_all(ctx, input)? {
                let (from, stored_to, properties) = decode_edge(ctx, &source, item)?;
                *result.get_or_create(stored_to, from) = properties;
                found += 1;
            }
        }

        tracing::debug!(source = %source, found, "Fetched in-edges");
        Ok(result)
    }

    pub(super) fn write_edges(&self, ctx: &OperationContext, edges: Edges) -> Result<Edges> {
        let source = edges.source_id()?.to_string();
        let requests: Vec<WriteRequest> = edges
            .pairs()
            .map(|(from, to, properties)| {
                let mut item = encode_properties(properties);
                item.extend(keys::edge_key(&source, from, to));
                WriteRequest::Put(item)
            })
            .collect();
        if requests.is_empty() {
            return Ok(edges);
        }

        self.batcher
            .write_all(ctx, &self.settings.edge_table, &requests)?;
        tracing::debug!(source = %source, written = requests.len(), "Created edges");
        Ok(edges)
    }
}

/// Splits a stored edge into `(from, to, properties)`.
fn decode_edge(ctx: &OperationContext, source: &str, item: Item) -> Result<(String, String, Properties)> {
    let endpoint = |attribute: &str| {
        keys::string_attribute(&item, attribute)
            .and_then(|key| keys::unscoped(source, key))
            .map(str::to_string)
            .ok_or_else(|| malformed(ctx, &format!("edge record with malformed {attribute}")))
    };
    let from = endpoint(EDGE_PARTITION)?;
    let to = endpoint(EDGE_RANGE)?;
    let properties = decode_item(&format!("{from}->{to}"), item, keys::is_internal)?;
    Ok((from, to, properties))
}
