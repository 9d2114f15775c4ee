//! Blocking DynamoDB client (JSON 1.0 protocol).
//!
//! Speaks to DynamoDB or DynamoDB Local over HTTPS/HTTP. Every call is a
//! signed `POST /` whose `X-Amz-Target` header names the operation.

use super::codec::{AttributeValue, Item};
use super::sigv4::{self, Credentials, SigningScope};
use super::store::{
    BatchGetOutput, BatchWriteOutput, KeyValueStore, QueryInput, QueryOutput, StoreError,
    StoreResult, TableDescription, TableSpec, UpdateInput, WriteRequest,
};
use crate::config::BackendConfig;
use crate::{Error, Result};
use reqwest::Url;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const TARGET_PREFIX: &str = "DynamoDB_20120810";
const SERVICE: &str = "dynamodb";

/// DynamoDB client implementing [`KeyValueStore`].
pub struct DynamoDbClient {
    endpoint: Url,
    host: String,
    region: String,
    credentials: Credentials,
    client: reqwest::blocking::Client,
}

impl std::fmt::Debug for DynamoDbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .field("access_key_id", &self.credentials.access_key_id)
            .finish_non_exhaustive()
    }
}

impl DynamoDbClient {
    /// Default HTTP timeout.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not an absolute URL with a host or
    /// the HTTP client cannot be built.
    pub fn new(
        endpoint: &str,
        region: impl Into<String>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| init_error(format!("endpoint {endpoint}: {e}")))?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(init_error(format!("endpoint {endpoint} has no host"))),
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| init_error(e.to_string()))?;

        Ok(Self {
            endpoint,
            host,
            region: region.into(),
            credentials,
            client,
        })
    }

    /// Creates a client from backend configuration.
    ///
    /// Requires `endpoint`, `region`, `access_key_id` and `secret_access_key`;
    /// honours `session_token` and `request_timeout_secs`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required key is missing or mistyped.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let credentials = Credentials {
            access_key_id: config.string_key("access_key_id")?.to_string(),
            secret_access_key: config.secret_key("secret_access_key")?,
            session_token: config.optional_secret("session_token")?,
        };
        let timeout = config
            .optional_u64("request_timeout_secs")?
            .unwrap_or(Self::DEFAULT_TIMEOUT_SECS);

        Self::new(
            config.string_key("endpoint")?,
            config.string_key("region")?,
            credentials,
            Duration::from_secs(timeout),
        )
    }

    fn call<Req, Resp>(&self, operation: &str, body: &Req) -> StoreResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let target = format!("{TARGET_PREFIX}.{operation}");
        let signed = sigv4::sign_post(
            &self.credentials,
            SigningScope {
                region: &self.region,
                service: SERVICE,
            },
            &self.host,
            self.endpoint.path(),
            &[("content-type", CONTENT_TYPE), ("x-amz-target", target.as_str())],
            &payload,
            chrono::Utc::now(),
        );

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Target", &target);
        for (name, value) in signed {
            request = request.header(name, value);
        }

        tracing::trace!(operation, bytes = payload.len(), "Sending store request");
        let response = request
            .body(payload)
            .send()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &text));
        }
        serde_json::from_str(&text).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

fn init_error(cause: String) -> Error {
    Error::InitializationFailed {
        backend: super::BACKEND_NAME.to_string(),
        cause,
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(alias = "Message", default)]
    message: String,
}

/// Maps an error response onto a [`StoreError`].
fn classify_error(status: u16, body: &str) -> StoreError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or(ErrorBody {
        kind: String::new(),
        message: body.to_string(),
    });
    let kind = parsed.kind.rsplit('#').next().unwrap_or_default();
    let message = if parsed.message.is_empty() {
        kind.to_string()
    } else {
        parsed.message
    };

    match kind {
        "ProvisionedThroughputExceededException"
        | "ThrottlingException"
        | "RequestLimitExceeded" => StoreError::Throttled(message),
        "ConditionalCheckFailedException" => StoreError::ConditionFailed(message),
        "ResourceNotFoundException" => StoreError::ResourceNotFound(message),
        "ResourceInUseException" => StoreError::ResourceInUse(message),
        "ValidationException" | "SerializationException" => StoreError::Validation(message),
        _ => StoreError::Service { status, message },
    }
}

// Wire types.

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct KeysAndAttributes<'a> {
    keys: &'a [Item],
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UnprocessedKeys {
    keys: Vec<Item>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct BatchGetItemRequest<'a> {
    request_items: HashMap<&'a str, KeysAndAttributes<'a>>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct BatchGetItemResponse {
    responses: HashMap<String, Vec<Item>>,
    unprocessed_keys: HashMap<String, UnprocessedKeys>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
struct WireItem {
    item: Item,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
struct WireKey {
    key: Item,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
enum WireWriteRequest {
    PutRequest(WireItem),
    DeleteRequest(WireKey),
}

impl From<&WriteRequest> for WireWriteRequest {
    fn from(request: &WriteRequest) -> Self {
        match request {
            WriteRequest::Put(item) => Self::PutRequest(WireItem { item: item.clone() }),
            WriteRequest::Delete(key) => Self::DeleteRequest(WireKey { key: key.clone() }),
        }
    }
}

impl From<WireWriteRequest> for WriteRequest {
    fn from(request: WireWriteRequest) -> Self {
        match request {
            WireWriteRequest::PutRequest(put) => Self::Put(put.item),
            WireWriteRequest::DeleteRequest(delete) => Self::Delete(delete.key),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct BatchWriteItemRequest<'a> {
    request_items: HashMap<&'a str, Vec<WireWriteRequest>>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct BatchWriteItemResponse {
    unprocessed_items: HashMap<String, Vec<WireWriteRequest>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct QueryRequest<'a> {
    table_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    index_name: Option<&'a str>,
    key_condition_expression: &'static str,
    expression_attribute_names: BTreeMap<&'static str, &'a str>,
    expression_attribute_values: BTreeMap<&'static str, AttributeValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exclusive_start_key: Option<&'a Item>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
}

impl<'a> From<&'a QueryInput> for QueryRequest<'a> {
    fn from(input: &'a QueryInput) -> Self {
        Self {
            table_name: &input.table,
            index_name: input.index.as_deref(),
            key_condition_expression: "#pk = :pk",
            expression_attribute_names: BTreeMap::from([("#pk", input.partition_attribute.as_str())]),
            expression_attribute_values: BTreeMap::from([(
                ":pk",
                AttributeValue::s(input.partition_value.clone()),
            )]),
            exclusive_start_key: input.exclusive_start_key.as_ref(),
            limit: input.limit,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct QueryResponse {
    items: Vec<Item>,
    last_evaluated_key: Option<Item>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct UpdateItemRequest<'a> {
    table_name: &'a str,
    key: &'a Item,
    update_expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    condition_expression: Option<String>,
    expression_attribute_names: BTreeMap<String, String>,
    expression_attribute_values: BTreeMap<String, AttributeValue>,
    return_values: &'static str,
}

impl<'a> From<&'a UpdateInput> for UpdateItemRequest<'a> {
    fn from(input: &'a UpdateInput) -> Self {
        let mut names = BTreeMap::new();
        let mut values = BTreeMap::new();
        let mut assignments = Vec::with_capacity(input.set.len());
        for (i, (name, value)) in input.set.iter().enumerate() {
            names.insert(format!("#a{i}"), name.clone());
            values.insert(format!(":v{i}"), value.clone());
            assignments.push(format!("#a{i} = :v{i}"));
        }

        let condition_expression = if input.require_exists {
            input.key.keys().next().map(|key| {
                names.insert("#k".to_string(), key.clone());
                "attribute_exists(#k)".to_string()
            })
        } else {
            None
        };

        Self {
            table_name: &input.table,
            key: &input.key,
            update_expression: format!("SET {}", assignments.join(", ")),
            condition_expression,
            expression_attribute_names: names,
            expression_attribute_values: values,
            return_values: "ALL_NEW",
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct UpdateItemResponse {
    attributes: Item,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct TableNameRequest<'a> {
    table_name: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeTableResponse {
    table: WireTableDescription,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireTableDescription {
    table_name: String,
    table_status: String,
    #[serde(default)]
    item_count: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AttributeDefinition<'a> {
    attribute_name: &'a str,
    attribute_type: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct KeySchemaElement<'a> {
    attribute_name: &'a str,
    key_type: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Projection {
    projection_type: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GlobalSecondaryIndex<'a> {
    index_name: &'a str,
    key_schema: [KeySchemaElement<'a>; 2],
    projection: Projection,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateTableRequest<'a> {
    table_name: &'a str,
    attribute_definitions: Vec<AttributeDefinition<'a>>,
    key_schema: [KeySchemaElement<'a>; 2],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    global_secondary_indexes: Vec<GlobalSecondaryIndex<'a>>,
    billing_mode: &'static str,
}

fn key_schema<'a>(partition: &'a str, range: &'a str) -> [KeySchemaElement<'a>; 2] {
    [
        KeySchemaElement {
            attribute_name: partition,
            key_type: "HASH",
        },
        KeySchemaElement {
            attribute_name: range,
            key_type: "RANGE",
        },
    ]
}

impl<'a> From<&'a TableSpec> for CreateTableRequest<'a> {
    fn from(spec: &'a TableSpec) -> Self {
        let mut attributes: Vec<&str> = vec![&spec.partition_key, &spec.range_key];
        for index in &spec.indexes {
            attributes.push(&index.partition_key);
            attributes.push(&index.range_key);
        }
        attributes.sort_unstable();
        attributes.dedup();

        Self {
            table_name: &spec.name,
            attribute_definitions: attributes
                .into_iter()
                .map(|name| AttributeDefinition {
                    attribute_name: name,
                    attribute_type: "S",
                })
                .collect(),
            key_schema: key_schema(&spec.partition_key, &spec.range_key),
            global_secondary_indexes: spec
                .indexes
                .iter()
                .map(|index| GlobalSecondaryIndex {
                    index_name: &index.name,
                    key_schema: key_schema(&index.partition_key, &index.range_key),
                    projection: Projection {
                        projection_type: "ALL",
                    },
                })
                .collect(),
            billing_mode: "PAY_PER_REQUEST",
        }
    }
}

impl KeyValueStore for DynamoDbClient {
    fn batch_get(&self, table: &str, keys: &[Item]) -> StoreResult<BatchGetOutput> {
        let request = BatchGetItemRequest {
            request_items: HashMap::from([(table, KeysAndAttributes { keys })]),
        };
        let mut response: BatchGetItemResponse = self.call("BatchGetItem", &request)?;
        Ok(BatchGetOutput {
            items: response.responses.remove(table).unwrap_or_default(),
            unprocessed_keys: response
                .unprocessed_keys
                .remove(table)
                .map(|u| u.keys)
                .unwrap_or_default(),
        })
    }

    fn batch_write(&self, table: &str, requests: &[WriteRequest]) -> StoreResult<BatchWriteOutput> {
        let request = BatchWriteItemRequest {
            request_items: HashMap::from([(table, requests.iter().map(WireWriteRequest::from).collect())]),
        };
        let mut response: BatchWriteItemResponse = self.call("BatchWriteItem", &request)?;
        Ok(BatchWriteOutput {
            unprocessed: response
                .unprocessed_items
                .remove(table)
                .unwrap_or_default()
                .into_iter()
                .map(WriteRequest::from)
                .collect(),
        })
    }

    fn query(&self, input: &QueryInput) -> StoreResult<QueryOutput> {
        let response: QueryResponse = self.call("Query", &QueryRequest::from(input))?;
        Ok(QueryOutput {
            items: response.items,
            last_evaluated_key: response.last_evaluated_key.filter(|key| !key.is_empty()),
        })
    }

    fn update(&self, input: &UpdateInput) -> StoreResult<Item> {
        let response: UpdateItemResponse = self.call("UpdateItem", &UpdateItemRequest::from(input))?;
        Ok(response.attributes)
    }

    fn describe_table(&self, table: &str) -> StoreResult<TableDescription> {
        let response: DescribeTableResponse =
            self.call("DescribeTable", &TableNameRequest { table_name: table })?;
        Ok(TableDescription {
            name: response.table.table_name,
            status: response.table.table_status,
            item_count: response.table.item_count,
        })
    }

    fn create_table(&self, spec: &TableSpec) -> StoreResult<()> {
        let _: IgnoredAny = self.call("CreateTable", &CreateTableRequest::from(spec))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::keys;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(400, r#"{"__type":"com.amazonaws.dynamodb.v20120810#ProvisionedThroughputExceededException","message":"slow"}"# ; "throughput")]
    #[test_case(400, r#"{"__type":"com.amazon.coral.availability#ThrottlingException","Message":"slow"}"# ; "throttling")]
    fn test_classify_throttling(status: u16, body: &str) {
        assert_eq!(
            classify_error(status, body),
            StoreError::Throttled("slow".to_string())
        );
    }

    #[test]
    fn test_classify_other_errors() {
        assert!(matches!(
            classify_error(400, r#"{"__type":"x#ConditionalCheckFailedException"}"#),
            StoreError::ConditionFailed(_)
        ));
        assert!(matches!(
            classify_error(400, r#"{"__type":"x#ResourceNotFoundException","message":"t"}"#),
            StoreError::ResourceNotFound(_)
        ));
        assert!(matches!(
            classify_error(400, r#"{"__type":"x#ValidationException","message":"bad"}"#),
            StoreError::Validation(_)
        ));
        let err = classify_error(503, "upstream down");
        assert_eq!(
            err,
            StoreError::Service {
                status: 503,
                message: "upstream down".to_string()
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_batch_write_wire_format() {
        let put = WriteRequest::Put(keys::node_key("s", "1"));
        let delete = WriteRequest::Delete(keys::node_key("s", "2"));
        let request = BatchWriteItemRequest {
            request_items: HashMap::from([(
                "nodes",
                vec![WireWriteRequest::from(&put), WireWriteRequest::from(&delete)],
            )]),
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "RequestItems": {
                    "nodes": [
                        {"PutRequest": {"Item": {"nid": {"S": "1"}, "sid_nid": {"S": "s:1"}}}},
                        {"DeleteRequest": {"Key": {"nid": {"S": "2"}, "sid_nid": {"S": "s:2"}}}}
                    ]
                }
            })
        );
    }

    #[test]
    fn test_batch_get_response_parsing() {
        let body = json!({
            "Responses": {"nodes": [{"nid": {"S": "1"}, "size": {"N": "3"}}]},
            "UnprocessedKeys": {"nodes": {"Keys": [{"nid": {"S": "2"}, "sid_nid": {"S": "s:2"}}]}}
        });
        let mut response: BatchGetItemResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.responses.remove("nodes").unwrap().len(), 1);
        assert_eq!(response.unprocessed_keys.remove("nodes").unwrap().keys.len(), 1);

        let empty: BatchGetItemResponse = serde_json::from_value(json!({"Responses": {}})).unwrap();
        assert!(empty.unprocessed_keys.is_empty());
    }

    #[test]
    fn test_query_request() {
        let input = QueryInput {
            table: "edges".to_string(),
            index: Some("reverse".to_string()),
            partition_attribute: "sid_to".to_string(),
            partition_value: "s:2".to_string(),
            exclusive_start_key: None,
            limit: Some(1),
        };
        assert_eq!(
            serde_json::to_value(QueryRequest::from(&input)).unwrap(),
            json!({
                "TableName": "edges",
                "IndexName": "reverse",
                "KeyConditionExpression": "#pk = :pk",
                "ExpressionAttributeNames": {"#pk": "sid_to"},
                "ExpressionAttributeValues": {":pk": {"S": "s:2"}},
                "Limit": 1
            })
        );
    }

    #[test]
    fn test_update_request() {
        let input = UpdateInput {
            table: "nodes".to_string(),
            key: keys::node_key("s", "1"),
            set: Item::from([("name".to_string(), AttributeValue::s("x"))]),
            require_exists: true,
        };
        let request = UpdateItemRequest::from(&input);
        assert_eq!(request.update_expression, "SET #a0 = :v0");
        assert_eq!(
            request.condition_expression.as_deref(),
            Some("attribute_exists(#k)")
        );
        assert_eq!(request.expression_attribute_names["#a0"], "name");
        assert_eq!(request.expression_attribute_names["#k"], "nid");
        assert_eq!(request.return_values, "ALL_NEW");
    }

    #[test]
    fn test_create_table_request() {
        let spec = keys::edge_table("edges", "reverse");
        let value = serde_json::to_value(CreateTableRequest::from(&spec)).unwrap();
        assert_eq!(
            value["AttributeDefinitions"],
            json!([
                {"AttributeName": "sid_from", "AttributeType": "S"},
                {"AttributeName": "sid_to", "AttributeType": "S"}
            ])
        );
        assert_eq!(value["GlobalSecondaryIndexes"][0]["IndexName"], "reverse");
        assert_eq!(
            value["GlobalSecondaryIndexes"][0]["KeySchema"][0]["AttributeName"],
            "sid_to"
        );
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let config = BackendConfig::new("ddb")
            .with("endpoint", "http://localhost:8000")
            .with("region", "us-east-1");
        assert!(matches!(
            DynamoDbClient::from_config(&config),
            Err(Error::MissingConfigKey { key }) if key == "access_key_id"
        ));
    }

    #[test]
    fn test_from_config_rejects_bad_endpoint() {
        let config = BackendConfig::new("ddb")
            .with("endpoint", "not a url")
            .with("region", "us-east-1")
            .with("access_key_id", "a")
            .with("secret_access_key", "b");
        assert!(matches!(
            DynamoDbClient::from_config(&config),
            Err(Error::InitializationFailed { .. })
        ));
    }
}
