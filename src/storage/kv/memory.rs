//! In-memory key-value store for testing.
//!
//! Enforces the same contract the real service does: batch size limits,
//! key schema validation, sparse secondary indexes and paged queries. It can
//! also misbehave on demand, leaving part of each batch unprocessed or
//! throttling whole calls, so that retry paths are testable without a network.

use super::codec::{AttributeValue, Item};
use super::keys;
use super::store::{
    BatchGetOutput, BatchWriteOutput, IndexSpec, KeyValueStore, MAX_BATCH_GET, MAX_BATCH_WRITE,
    QueryInput, QueryOutput, StoreError, StoreResult, TableDescription, TableSpec, UpdateInput,
    WriteRequest,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Sentinel stored in the throughput limit when no limit is set.
const UNLIMITED: usize = usize::MAX;

#[derive(Debug)]
struct Table {
    spec: TableSpec,
    items: BTreeMap<(String, String), Item>,
}

impl Table {
    fn primary_key(&self, key: &Item) -> StoreResult<(String, String)> {
        let partition = required_string(key, &self.spec.partition_key)?;
        let range = required_string(key, &self.spec.range_key)?;
        Ok((partition.to_string(), range.to_string()))
    }

    fn key_of(&self, item: &Item) -> Item {
        [&self.spec.partition_key, &self.spec.range_key]
            .into_iter()
            .filter_map(|attr| item.get(attr).map(|v| (attr.clone(), v.clone())))
            .collect()
    }

    fn index(&self, name: &str) -> StoreResult<&IndexSpec> {
        self.spec
            .indexes
            .iter()
            .find(|index| index.name == name)
            .ok_or_else(|| {
                StoreError::ResourceNotFound(format!(
                    "index {name} on table {}",
                    self.spec.name
                ))
            })
    }
}

fn required_string<'a>(item: &'a Item, attribute: &str) -> StoreResult<&'a str> {
    keys::string_attribute(item, attribute).ok_or_else(|| {
        StoreError::Validation(format!(
            "key attribute '{attribute}' is missing or not a string"
        ))
    })
}

/// In-memory store implementing [`KeyValueStore`].
///
/// # Example
///
/// ```rust,ignore
/// use bcfs::storage::kv::InMemoryKvStore;
///
/// let store = InMemoryKvStore::with_default_tables();
/// store.set_throughput_limit(Some(10));
/// ```
#[derive(Debug)]
pub struct InMemoryKvStore {
    tables: RwLock<HashMap<String, Table>>,
    throughput_limit: AtomicUsize,
    pending_throttles: AtomicUsize,
    query_page_size: AtomicUsize,
    batch_get_calls: AtomicUsize,
    batch_write_calls: AtomicUsize,
    query_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            throughput_limit: AtomicUsize::new(UNLIMITED),
            pending_throttles: AtomicUsize::new(0),
            query_page_size: AtomicUsize::new(UNLIMITED),
            batch_get_calls: AtomicUsize::new(0),
            batch_write_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
        }
    }
}

impl InMemoryKvStore {
    /// Creates a store with no tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with `nodes` and `edges` tables (and the `reverse` index).
    #[must_use]
    pub fn with_default_tables() -> Self {
        let store = Self::new();
        for spec in [keys::node_table("nodes"), keys::edge_table("edges", "reverse")] {
            store.insert_table(spec);
        }
        store
    }

    fn insert_table(&self, spec: TableSpec) -> bool {
        let mut tables = self
            .tables
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if tables.contains_key(&spec.name) {
            return false;
        }
        tables.insert(
            spec.name.clone(),
            Table {
                spec,
                items: BTreeMap::new(),
            },
        );
        true
    }

    /// Services at most `limit` keys or requests per batch call; the rest
    /// come back unprocessed. `None` removes the limit.
    pub fn set_throughput_limit(&self, limit: Option<usize>) {
        self.throughput_limit
            .store(limit.unwrap_or(UNLIMITED), Ordering::SeqCst);
    }

    /// Fails the next `count` calls with [`StoreError::Throttled`].
    pub fn inject_throttles(&self, count: usize) {
        self.pending_throttles.store(count, Ordering::SeqCst);
    }

    /// Returns at most `size` items per query page.
    pub fn set_query_page_size(&self, size: usize) {
        self.query_page_size.store(size.max(1), Ordering::SeqCst);
    }

    /// Number of `batch_get` calls received.
    #[must_use]
    pub fn batch_get_calls(&self) -> usize {
        self.batch_get_calls.load(Ordering::SeqCst)
    }

    /// Number of `batch_write` calls received.
    #[must_use]
    pub fn batch_write_calls(&self) -> usize {
        self.batch_write_calls.load(Ordering::SeqCst)
    }

    /// Number of `query` calls received.
    #[must_use]
    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Number of `update` calls received.
    #[must_use]
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Zeroes every call counter.
    pub fn reset_counters(&self) {
        for counter in [
            &self.batch_get_calls,
            &self.batch_write_calls,
            &self.query_calls,
            &self.update_calls,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// Stores an item directly, bypassing limits and counters.
    ///
    /// Useful for seeding values the adapter itself would never write.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is missing or the item has no valid key.
    pub fn put_raw(&self, table: &str, item: Item) -> StoreResult<()> {
        let mut tables = self.write_tables()?;
        let table = lookup_mut(&mut tables, table)?;
        let key = table.primary_key(&item)?;
        table.items.insert(key, item);
        Ok(())
    }

    /// Reads an item directly by key.
    #[must_use]
    pub fn get_raw(&self, table: &str, key: &Item) -> Option<Item> {
        let tables = self.tables.read().ok()?;
        let table = tables.get(table)?;
        let key = table.primary_key(key).ok()?;
        table.items.get(&key).cloned()
    }

    /// Number of items stored in `table`.
    #[must_use]
    pub fn item_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .ok()
            .and_then(|tables| tables.get(table).map(|t| t.items.len()))
            .unwrap_or(0)
    }

    fn throttle(&self) -> StoreResult<()> {
        let throttled = self
            .pending_throttles
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if throttled {
            return Err(StoreError::Throttled(
                "the level of configured provisioned throughput was exceeded".to_string(),
            ));
        }
        Ok(())
    }

    fn limit(&self) -> usize {
        self.throughput_limit.load(Ordering::SeqCst)
    }

    fn read_tables(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, HashMap<String, Table>>> {
        self.tables.read().map_err(|_| poisoned())
    }

    fn write_tables(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, HashMap<String, Table>>> {
        self.tables.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> StoreError {
    StoreError::Service {
        status: 500,
        message: "table lock poisoned".to_string(),
    }
}

fn lookup<'a>(tables: &'a HashMap<String, Table>, name: &str) -> StoreResult<&'a Table> {
    tables
        .get(name)
        .ok_or_else(|| StoreError::ResourceNotFound(format!("table {name}")))
}

fn lookup_mut<'a>(tables: &'a mut HashMap<String, Table>, name: &str) -> StoreResult<&'a mut Table> {
    tables
        .get_mut(name)
        .ok_or_else(|| StoreError::ResourceNotFound(format!("table {name}")))
}

fn check_batch_size(len: usize, max: usize) -> StoreResult<()> {
    if len == 0 {
        return Err(StoreError::Validation("batch must not be empty".to_string()));
    }
    if len > max {
        return Err(StoreError::Validation(format!(
            "batch of {len} exceeds the limit of {max}"
        )));
    }
    Ok(())
}

fn text(value: Option<&AttributeValue>) -> String {
    value
        .and_then(AttributeValue::as_s)
        .unwrap_or_default()
        .to_string()
}

impl KeyValueStore for InMemoryKvStore {
    fn batch_get(&self, table: &str, keys: &[Item]) -> StoreResult<BatchGetOutput> {
        self.batch_get_calls.fetch_add(1, Ordering::SeqCst);
        self.throttle()?;
        check_batch_size(keys.len(), MAX_BATCH_GET)?;

        let tables = self.read_tables()?;
        let table = lookup(&tables, table)?;

        let mut seen = HashSet::new();
        let mut primary = Vec::with_capacity(keys.len());
        for key in keys {
            let pk = table.primary_key(key)?;
            if !seen.insert(pk.clone()) {
                return Err(StoreError::Validation(
                    "provided list of item keys contains duplicates".to_string(),
                ));
            }
            primary.push(pk);
        }

        let served = keys.len().min(self.limit());
        let items = primary[..served]
            .iter()
            .filter_map(|pk| table.items.get(pk).cloned())
            .collect();
        Ok(BatchGetOutput {
            items,
            unprocessed_keys: keys[served..].to_vec(),
        })
    }

    fn batch_write(&self, table: &str, requests: &[WriteRequest]) -> StoreResult<BatchWriteOutput> {
        self.batch_write_calls.fetch_add(1, Ordering::SeqCst);
        self.throttle()?;
        check_batch_size(requests.len(), MAX_BATCH_WRITE)?;

        let mut tables = self.write_tables()?;
        let table = lookup_mut(&mut tables, table)?;

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(requests.len());
        for request in requests {
            let (WriteRequest::Put(item) | WriteRequest::Delete(item)) = request;
            let pk = table.primary_key(item)?;
            if !seen.insert(pk.clone()) {
                return Err(StoreError::Validation(
                    "provided list of item keys contains duplicates".to_string(),
                ));
            }
            resolved.push(pk);
        }

        let served = requests.len().min(self.limit());
        for (request, pk) in requests[..served].iter().zip(resolved) {
            match request {
                WriteRequest::Put(item) => {
                    table.items.insert(pk, item.clone());
                },
                WriteRequest::Delete(_) => {
                    table.items.remove(&pk);
                },
            }
        }
        Ok(BatchWriteOutput {
            unprocessed: requests[served..].to_vec(),
        })
    }

    fn query(&self, input: &QueryInput) -> StoreResult<QueryOutput> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.throttle()?;

        let tables = self.read_tables()?;
        let table = lookup(&tables, &input.table)?;
        let (partition_key, range_key) = match &input.index {
            Some(name) => {
                let index = table.index(name)?;
                (index.partition_key.as_str(), index.range_key.as_str())
            },
            None => (
                table.spec.partition_key.as_str(),
                table.spec.range_key.as_str(),
            ),
        };
        if partition_key != input.partition_attribute {
            return Err(StoreError::Validation(format!(
                "query condition must use partition key '{partition_key}'"
            )));
        }

        let sort_key = |item: &Item| {
            (
                text(item.get(range_key)),
                text(item.get(&table.spec.partition_key)),
                text(item.get(&table.spec.range_key)),
            )
        };

        let mut matches: Vec<&Item> = table
            .items
            .values()
            .filter(|item| {
                keys::string_attribute(item, partition_key) == Some(input.partition_value.as_str())
                    && item.contains_key(range_key)
            })
            .collect();
        matches.sort_by_cached_key(|item| sort_key(*item));

        if let Some(start) = &input.exclusive_start_key {
            let start = sort_key(start);
            matches.retain(|item| sort_key(*item) > start);
        }

        let page_size = input
            .limit
            .unwrap_or(UNLIMITED)
            .min(self.query_page_size.load(Ordering::SeqCst))
            .max(1);
        let more = matches.len() > page_size;
        matches.truncate(page_size);

        let last_evaluated_key = if more {
            matches.last().map(|item| {
                let mut key = table.key_of(item);
                for attr in [partition_key, range_key] {
                    if let Some(value) = item.get(attr) {
                        key.insert(attr.to_string(), value.clone());
                    }
                }
                key
            })
        } else {
            None
        };

        Ok(QueryOutput {
            items: matches.into_iter().cloned().collect(),
            last_evaluated_key,
        })
    }

    fn update(&self, input: &UpdateInput) -> StoreResult<Item> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.throttle()?;

        if input.set.is_empty() {
            return Err(StoreError::Validation(
                "update expression must set at least one attribute".to_string(),
            ));
        }

        let mut tables = self.write_tables()?;
        let table = lookup_mut(&mut tables, &input.table)?;
        let pk = table.primary_key(&input.key)?;
        if input
            .set
            .keys()
            .any(|attr| *attr == table.spec.partition_key || *attr == table.spec.range_key)
        {
            return Err(StoreError::Validation(
                "cannot update attribute that is part of the key".to_string(),
            ));
        }

        if input.require_exists && !table.items.contains_key(&pk) {
            return Err(StoreError::ConditionFailed(
                "the conditional request failed".to_string(),
            ));
        }

        let key = table.key_of(&input.key);
        let item = table.items.entry(pk).or_insert(key);
        item.extend(input.set.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(item.clone())
    }

    fn describe_table(&self, table: &str) -> StoreResult<TableDescription> {
        let tables = self.read_tables()?;
        let table = lookup(&tables, table)?;
        Ok(TableDescription {
            name: table.spec.name.clone(),
            status: "ACTIVE".to_string(),
            item_count: u64::try_from(table.items.len()).ok(),
        })
    }

    fn create_table(&self, spec: &TableSpec) -> StoreResult<()> {
        if self.insert_table(spec.clone()) {
            Ok(())
        } else {
            Err(StoreError::ResourceInUse(format!("table {}", spec.name)))
        }
    }
}
