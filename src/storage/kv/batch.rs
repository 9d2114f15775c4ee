//! Chunked batch reads and writes with unprocessed-work resubmission.

use super::codec::Item;
use super::store::{
    KeyValueStore, MAX_BATCH_GET, MAX_BATCH_WRITE, QueryInput, StoreError, StoreResult,
    WriteRequest,
};
use crate::storage::retry::{Backoff, OperationContext, RetryPolicy};
use crate::{Error, Result};
use std::sync::Arc;

/// Issues store calls for one backend: chunking, retry and paging.
#[derive(Clone)]
pub struct Batcher {
    store: Arc<dyn KeyValueStore>,
    policy: RetryPolicy,
    max_concurrency: usize,
}

impl Batcher {
    /// Creates a batcher over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, policy: RetryPolicy, max_concurrency: usize) -> Self {
        Self {
            store,
            policy,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    /// Reads every key, in chunks of at most [`MAX_BATCH_GET`].
    ///
    /// # Errors
    ///
    /// Fails if any chunk cannot be completed.
    pub fn get_all(&self, ctx: &OperationContext, table: &str, keys: &[Item]) -> Result<Vec<Item>> {
        let chunks: Vec<Vec<Item>> = keys.chunks(MAX_BATCH_GET).map(<[Item]>::to_vec).collect();
        tracing::debug!(
            operation = ctx.operation(),
            table,
            keys = keys.len(),
            chunks = chunks.len(),
            "Batch reading"
        );
        let found = self.run_chunks(chunks, |chunk| self.get_chunk(ctx, table, chunk))?;
        Ok(found.into_iter().flatten().collect())
    }

    /// Applies every request, in chunks of at most [`MAX_BATCH_WRITE`].
    ///
    /// # Errors
    ///
    /// Fails if any chunk cannot be completed.
    pub fn write_all(
        &self,
        ctx: &OperationContext,
        table: &str,
        requests: &[WriteRequest],
    ) -> Result<()> {
        let chunks: Vec<Vec<WriteRequest>> = requests
            .chunks(MAX_BATCH_WRITE)
            .map(<[WriteRequest]>::to_vec)
            .collect();
        tracing::debug!(
            operation = ctx.operation(),
            table,
            requests = requests.len(),
            chunks = chunks.len(),
            "Batch writing"
        );
        self.run_chunks(chunks, |chunk| self.write_chunk(ctx, table, chunk))?;
        Ok(())
    }

    /// Reads every page of a query.
    ///
    /// # Errors
    ///
    /// Fails if any page cannot be read.
    pub fn query_all(&self, ctx: &OperationContext, mut input: QueryInput) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        let mut pages = 0_usize;
        loop {
            let page = self.query_page(ctx, &input)?;
            pages += 1;
            items.extend(page.items);
            match page.last_evaluated_key {
                Some(key) => input.exclusive_start_key = Some(key),
                None => break,
            }
        }
        tracing::debug!(
            operation = ctx.operation(),
            table = %input.table,
            partition = %input.partition_value,
            pages,
            items = items.len(),
            "Query complete"
        );
        Ok(items)
    }

    /// Reads a single page of a query.
    ///
    /// # Errors
    ///
    /// Fails if the page cannot be read.
    pub fn query_page(
        &self,
        ctx: &OperationContext,
        input: &QueryInput,
    ) -> Result<super::store::QueryOutput> {
        self.with_retry(ctx, "query", &input.table, || self.store.query(input))?
            .map_err(|e| e.into_error(ctx.operation()))
    }

    /// Runs one store call, repeating it while it fails with a retryable error.
    ///
    /// The outer error is terminal (retry budget, deadline, cancellation);
    /// the inner one is a non-retryable store error left for the caller to
    /// classify.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn with_retry<T>(
        &self,
        ctx: &OperationContext,
        call: &'static str,
        table: &str,
        mut f: impl FnMut() -> StoreResult<T>,
    ) -> Result<StoreResult<T>> {
        let mut backoff = Backoff::new(&self.policy, ctx);
        loop {
            ctx.check()?;
            record_request(call, table);
            match f() {
                Err(e) if e.is_retryable() => backoff.retry(&e.to_string())?,
                other => return Ok(other),
            }
        }
    }

    fn get_chunk(&self, ctx: &OperationContext, table: &str, chunk: Vec<Item>) -> Result<Vec<Item>> {
        let mut pending = chunk;
        let mut found = Vec::with_capacity(pending.len());
        let mut backoff = Backoff::new(&self.policy, ctx);

        while !pending.is_empty() {
            ctx.check()?;
            record_request("batch_get", table);
            match self.store.batch_get(table, &pending) {
                Ok(output) => {
                    let serviced = pending.len() - output.unprocessed_keys.len().min(pending.len());
                    found.extend(output.items);
                    if output.unprocessed_keys.is_empty() {
                        break;
                    }
                    if serviced > 0 {
                        backoff.progress();
                    }
                    tracing::debug!(
                        table,
                        unprocessed = output.unprocessed_keys.len(),
                        "Resubmitting unprocessed keys"
                    );
                    backoff.retry("unprocessed keys")?;
                    pending = output.unprocessed_keys;
                },
                Err(e) => self.on_error(&mut backoff, ctx, e)?,
            }
        }
        Ok(found)
    }

    fn write_chunk(
        &self,
        ctx: &OperationContext,
        table: &str,
        chunk: Vec<WriteRequest>,
    ) -> Result<()> {
        let mut pending = chunk;
        let mut backoff = Backoff::new(&self.policy, ctx);

        while !pending.is_empty() {
            ctx.check()?;
            record_request("batch_write", table);
            match self.store.batch_write(table, &pending) {
                Ok(output) => {
                    if output.unprocessed.is_empty() {
                        break;
                    }
                    if output.unprocessed.len() < pending.len() {
                        backoff.progress();
                    }
                    tracing::debug!(
                        table,
                        unprocessed = output.unprocessed.len(),
                        "Resubmitting unprocessed items"
                    );
                    backoff.retry("unprocessed items")?;
                    pending = output.unprocessed;
                },
                Err(e) => self.on_error(&mut backoff, ctx, e)?,
            }
        }
        Ok(())
    }

    #[allow(clippy::unused_self)]
    fn on_error(&self, backoff: &mut Backoff<'_>, ctx: &OperationContext, e: StoreError) -> Result<()> {
        if e.is_retryable() {
            backoff.retry(&e.to_string())
        } else {
            Err(e.into_error(ctx.operation()))
        }
    }

    /// Runs `f` over every chunk, up to `max_concurrency` at a time.
    ///
    /// Results keep chunk order. The first failing chunk's error is returned.
    fn run_chunks<T, R, F>(&self, chunks: Vec<T>, f: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R> + Sync,
    {
        if self.max_concurrency == 1 || chunks.len() <= 1 {
            return chunks.into_iter().map(f).collect();
        }

        let mut results = Vec::with_capacity(chunks.len());
        let mut remaining = chunks.into_iter().peekable();
        while remaining.peek().is_some() {
            let wave: Vec<T> = remaining.by_ref().take(self.max_concurrency).collect();
            let outcomes: Vec<Result<R>> = std::thread::scope(|scope| {
                let f = &f;
                let handles: Vec<_> = wave
                    .into_iter()
                    .map(|chunk| scope.spawn(move || f(chunk)))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle.join().unwrap_or_else(|_| {
                            Err(Error::OperationFailed {
                                operation: "batch_chunk".to_string(),
                                cause: "worker thread panicked".to_string(),
                            })
                        })
                    })
                    .collect()
            });
            for outcome in outcomes {
                results.push(outcome?);
            }
        }
        Ok(results)
    }
}

fn record_request(call: &'static str, table: &str) {
    metrics::counter!(
        "kv_store_requests_total",
        "operation" => call,
        "table" => table.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::codec::AttributeValue;
    use crate::storage::kv::keys;
    use crate::storage::kv::memory::InMemoryKvStore;
    use crate::storage::retry::CancellationToken;

    fn ctx() -> OperationContext {
        OperationContext::new("test", None, CancellationToken::new())
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    fn put(store: &InMemoryKvStore, n: usize) -> Vec<Item> {
        let requests: Vec<WriteRequest> = (0..n)
            .map(|i| {
                let mut item = keys::node_key("s", &i.to_string());
                item.insert("name".to_string(), AttributeValue::s(format!("n{i}")));
                WriteRequest::Put(item)
            })
            .collect();
        for chunk in requests.chunks(MAX_BATCH_WRITE) {
            store.batch_write("nodes", chunk).unwrap();
        }
        store.reset_counters();
        (0..n).map(|i| keys::node_key("s", &i.to_string())).collect()
    }

    #[test]
    fn test_get_all_chunks_by_hundred() {
        let store = Arc::new(InMemoryKvStore::with_default_tables());
        let keys = put(&store, 250);
        let batcher = Batcher::new(store.clone(), fast_policy(), 1);

        let items = batcher.get_all(&ctx(), "nodes", &keys).unwrap();
        assert_eq!(items.len(), 250);
        assert_eq!(store.batch_get_calls(), 3);
    }

    #[test]
    fn test_get_all_concurrent_chunks() {
        let store = Arc::new(InMemoryKvStore::with_default_tables());
        let keys = put(&store, 450);
        let batcher = Batcher::new(store.clone(), fast_policy(), 4);

        let items = batcher.get_all(&ctx(), "nodes", &keys).unwrap();
        assert_eq!(items.len(), 450);
        assert_eq!(store.batch_get_calls(), 5);
    }

    #[test]
    fn test_unprocessed_keys_are_resubmitted() {
        let store = Arc::new(InMemoryKvStore::with_default_tables());
        let keys = put(&store, 100);
        store.set_throughput_limit(Some(30));
        let batcher = Batcher::new(store.clone(), fast_policy(), 1);

        let items = batcher.get_all(&ctx(), "nodes", &keys).unwrap();
        assert_eq!(items.len(), 100);
        assert_eq!(store.batch_get_calls(), 4);
    }

    #[test]
    fn test_non_retryable_error_is_surfaced() {
        let store = Arc::new(InMemoryKvStore::new());
        let batcher = Batcher::new(store, fast_policy(), 1);

        let err = batcher
            .get_all(&ctx(), "missing", &[keys::node_key("s", "1")])
            .unwrap_err();
        assert!(matches!(err, Error::OperationFailed { .. }));
    }
}
