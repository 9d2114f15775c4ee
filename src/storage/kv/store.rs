//! The key-value store client seam.
//!
//! The adapter speaks to the store only through [`KeyValueStore`]. Two
//! implementations exist: [`DynamoDbClient`](super::DynamoDbClient) for the
//! real service and [`InMemoryKvStore`](super::InMemoryKvStore) for tests.

use super::codec::Item;
use crate::Error;
use thiserror::Error as ThisError;

/// Maximum keys per batch read.
pub const MAX_BATCH_GET: usize = 100;

/// Maximum requests per batch write.
pub const MAX_BATCH_WRITE: usize = 25;

/// One request inside a batch write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRequest {
    /// Put a full item, replacing any existing one.
    Put(Item),
    /// Delete the item with this key.
    Delete(Item),
}

/// Result of a batch read.
#[derive(Debug, Clone, Default)]
pub struct BatchGetOutput {
    /// Records found.
    pub items: Vec<Item>,
    /// Keys the store did not service in this call.
    pub unprocessed_keys: Vec<Item>,
}

/// Result of a batch write.
#[derive(Debug, Clone, Default)]
pub struct BatchWriteOutput {
    /// Requests the store did not apply in this call.
    pub unprocessed: Vec<WriteRequest>,
}

/// An equality query on a partition key.
#[derive(Debug, Clone)]
pub struct QueryInput {
    /// Table to query.
    pub table: String,
    /// Secondary index to query instead of the base table.
    pub index: Option<String>,
    /// Partition attribute name.
    pub partition_attribute: String,
    /// Partition value.
    pub partition_value: String,
    /// Continuation key from a previous page.
    pub exclusive_start_key: Option<Item>,
    /// Maximum items to evaluate.
    pub limit: Option<usize>,
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    /// Matching records.
    pub items: Vec<Item>,
    /// Present when more pages remain.
    pub last_evaluated_key: Option<Item>,
}

/// A point update of one record.
#[derive(Debug, Clone)]
pub struct UpdateInput {
    /// Table holding the record.
    pub table: String,
    /// Full primary key.
    pub key: Item,
    /// Attributes to set.
    pub set: Item,
    /// Fail with [`StoreError::ConditionFailed`] if the record does not exist.
    pub require_exists: bool,
}

/// Summary of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    /// Table name.
    pub name: String,
    /// Lifecycle status, `ACTIVE` once usable.
    pub status: String,
    /// Approximate item count, if reported.
    pub item_count: Option<u64>,
}

impl TableDescription {
    /// True once the table accepts reads and writes.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == "ACTIVE"
    }
}

/// A secondary index swapping or replacing the base key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Index partition attribute.
    pub partition_key: String,
    /// Index range attribute.
    pub range_key: String,
}

/// Table layout used by `create_table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Table name.
    pub name: String,
    /// Partition attribute.
    pub partition_key: String,
    /// Range attribute.
    pub range_key: String,
    /// Global secondary indexes.
    pub indexes: Vec<IndexSpec>,
}

/// Errors raised by a store client.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum StoreError {
    /// The store rejected the call for exceeding throughput.
    #[error("throttled: {0}")]
    Throttled(String),
    /// A conditional write found the condition false.
    #[error("condition failed: {0}")]
    ConditionFailed(String),
    /// The table or index does not exist.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    /// The table already exists or is being modified.
    #[error("resource in use: {0}")]
    ResourceInUse(String),
    /// The request was malformed.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The service returned an unclassified error.
    #[error("service error (status {status}): {message}")]
    Service {
        /// HTTP status.
        status: u16,
        /// Service message.
        message: String,
    },
    /// The request never reached the service or the response was lost.
    #[error("transport error: {0}")]
    Transport(String),
    /// A request or response body could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// True when repeating the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Throttled(_) | Self::Transport(_) => true,
            Self::Service { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Wraps the error as a crate error for `operation`.
    #[must_use]
    pub fn into_error(self, operation: &str) -> Error {
        Error::OperationFailed {
            operation: operation.to_string(),
            cause: self.to_string(),
        }
    }
}

/// Result alias for store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A partition/range keyed store with batch operations.
///
/// Batch calls may return part of their work as unprocessed; callers are
/// responsible for resubmitting it. Implementations must be safe to call
/// from several threads at once.
pub trait KeyValueStore: Send + Sync {
    /// Reads up to [`MAX_BATCH_GET`] records by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails as a whole.
    fn batch_get(&self, table: &str, keys: &[Item]) -> StoreResult<BatchGetOutput>;

    /// Applies up to [`MAX_BATCH_WRITE`] puts and deletes.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails as a whole.
    fn batch_write(&self, table: &str, requests: &[WriteRequest]) -> StoreResult<BatchWriteOutput>;

    /// Reads one page of records sharing a partition value.
    ///
    /// # Errors
    ///
    /// Returns an error if the table or index is missing or the call fails.
    fn query(&self, input: &QueryInput) -> StoreResult<QueryOutput>;

    /// Sets attributes on one record and returns the record after the update.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConditionFailed`] if `require_exists` is set and
    /// the record is absent.
    fn update(&self, input: &UpdateInput) -> StoreResult<Item>;

    /// Describes a table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ResourceNotFound`] if the table does not exist.
    fn describe_table(&self, table: &str) -> StoreResult<TableDescription>;

    /// Creates a table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ResourceInUse`] if the table already exists.
    fn create_table(&self, spec: &TableSpec) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(StoreError::Throttled("slow down".into()), true ; "throttled")]
    #[test_case(StoreError::Transport("reset".into()), true ; "transport")]
    #[test_case(StoreError::Service { status: 503, message: "x".into() }, true ; "server error")]
    #[test_case(StoreError::Service { status: 400, message: "x".into() }, false ; "client error")]
    #[test_case(StoreError::Validation("bad".into()), false ; "validation")]
    #[test_case(StoreError::ConditionFailed("gone".into()), false ; "condition")]
    fn test_is_retryable(err: StoreError, retryable: bool) {
        assert_eq!(err.is_retryable(), retryable);
    }

    #[test]
    fn test_into_error() {
        let err = StoreError::ResourceNotFound("nodes".into()).into_error("batch_get");
        assert_eq!(
            err.to_string(),
            "operation 'batch_get' failed: resource not found: nodes"
        );
    }
}
