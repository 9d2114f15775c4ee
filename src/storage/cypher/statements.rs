//! Parameterized Cypher statements and property ↔ JSON mapping.
//!
//! Values always travel as parameters. The only text spliced into a
//! statement is the source label, which is backtick-quoted.

use crate::models::{NODE_ID, Properties, Property};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};

/// Relationship type of every edge.
pub const EDGE_TYPE: &str = "EDGE";

/// One statement in a transaction request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    /// Cypher text.
    pub statement: String,
    /// Named parameters.
    pub parameters: Map<String, Value>,
}

impl Statement {
    fn new(statement: String) -> Self {
        Self {
            statement,
            parameters: Map::new(),
        }
    }

    fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }
}

/// Quotes a source id for use as a label. Labels may start with a digit or
/// contain backticks, so they are always quoted.
#[must_use]
pub fn label(source: &str) -> String {
    format!("`{}`", source.replace('`', "``"))
}

/// Reads one node. Returns column `n`, zero rows when absent.
#[must_use]
pub fn get_node(source: &str, nid: &str) -> Statement {
    Statement::new(format!(
        "MATCH (n:{} {{nid: $nid}}) RETURN properties(n) AS n",
        label(source)
    ))
    .param("nid", nid)
}

/// Creates or replaces one node.
///
/// # Errors
///
/// Returns an error if a property cannot be stored.
pub fn put_node(source: &str, nid: &str, properties: &Properties) -> Result<Statement> {
    let mut props = to_parameters(nid, properties)?;
    props.insert(NODE_ID.to_string(), Value::from(nid));
    Ok(Statement::new(format!(
        "MERGE (n:{} {{nid: $nid}}) SET n = $props RETURN properties(n) AS n",
        label(source)
    ))
    .param("nid", nid)
    .param("props", props))
}

/// Sets properties on an existing node. Zero rows when absent.
///
/// # Errors
///
/// Returns an error if a property cannot be stored.
pub fn alter_node(source: &str, nid: &str, properties: &Properties) -> Result<Statement> {
    let mut props = to_parameters(nid, properties)?;
    props.remove(NODE_ID);
    Ok(Statement::new(format!(
        "MATCH (n:{} {{nid: $nid}}) SET n += $props RETURN properties(n) AS n",
        label(source)
    ))
    .param("nid", nid)
    .param("props", props))
}

/// Counts edges touching a node in either direction. Column `edges`.
#[must_use]
pub fn count_edges(source: &str, nid: &str) -> Statement {
    Statement::new(format!(
        "MATCH (n:{} {{nid: $nid}})-[r:{EDGE_TYPE}]-() RETURN count(r) AS edges",
        label(source)
    ))
    .param("nid", nid)
}

/// Deletes a node; `detach` deletes its edges as well.
#[must_use]
pub fn delete_node(source: &str, nid: &str, detach: bool) -> Statement {
    let delete = if detach { "DETACH DELETE" } else { "DELETE" };
    Statement::new(format!(
        "MATCH (n:{} {{nid: $nid}}) {delete} n",
        label(source)
    ))
    .param("nid", nid)
}

/// Reads one edge. Column `r`, zero rows when absent.
#[must_use]
pub fn get_edge(source: &str, from: &str, to: &str) -> Statement {
    let label = label(source);
    Statement::new(format!(
        "MATCH (a:{label} {{nid: $from}})-[r:{EDGE_TYPE}]->(b:{label} {{nid: $to}}) RETURN properties(r) AS r"
    ))
    .param("from", from)
    .param("to", to)
}

/// Reads every edge pointing at `to`. Columns `from` and `r`.
#[must_use]
pub fn get_in_edges(source: &str, to: &str) -> Statement {
    let label = label(source);
    Statement::new(format!(
        "MATCH (a:{label})-[r:{EDGE_TYPE}]->(b:{label} {{nid: $to}}) RETURN a.nid AS from, properties(r) AS r"
    ))
    .param("to", to)
}

/// Creates or replaces one edge, creating missing endpoints.
///
/// # Errors
///
/// Returns an error if a property cannot be stored.
pub fn put_edge(source: &str, from: &str, to: &str, properties: &Properties) -> Result<Statement> {
    let label = label(source);
    let props = to_parameters(&format!("{from}->{to}"), properties)?;
    Ok(Statement::new(format!(
        "MERGE (a:{label} {{nid: $from}}) MERGE (b:{label} {{nid: $to}}) \
         MERGE (a)-[r:{EDGE_TYPE}]->(b) SET r = $props RETURN properties(r) AS r"
    ))
    .param("from", from)
    .param("to", to)
    .param("props", props))
}

/// Cheapest statement that proves the database answers.
#[must_use]
pub fn ping() -> Statement {
    Statement::new("RETURN 1 AS ok".to_string())
}

/// Maps properties onto parameter values.
///
/// Numbers keep integer precision where they parse as one. Binary values
/// have no Cypher representation and are rejected.
fn to_parameters(record: &str, properties: &Properties) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for (name, property) in properties {
        let value = match property {
            Property::String(s) => Value::from(s.as_str()),
            Property::Number(text) => number_value(text).map_err(|reason| {
                Error::InvalidInput(format!(
                    "property '{name}' of '{record}' is {reason}: {text}"
                ))
            })?,
            Property::Binary(_) => {
                return Err(Error::InvalidInput(format!(
                    "property '{name}' of '{record}' is binary, which the cypher backend cannot store"
                )));
            },
        };
        map.insert(name.clone(), value);
    }
    Ok(map)
}

/// Integers outside the `i64`/`u64` range are refused rather than rounded
/// through `f64`.
fn number_value(text: &str) -> std::result::Result<Value, &'static str> {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::from(i));
    }
    if let Ok(u) = text.parse::<u64>() {
        return Ok(Value::from(u));
    }
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err("an integer too large to store without losing precision");
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or("not a number")
}

/// Maps a returned property map back onto [`Properties`].
///
/// # Errors
///
/// Returns [`Error::UnsupportedType`] for any value that is neither a string
/// nor a number.
pub fn from_row(record: &str, value: Value) -> Result<Properties> {
    let Value::Object(map) = value else {
        return Err(Error::OperationFailed {
            operation: "decode_row".to_string(),
            cause: format!("expected a property map for '{record}', found {value}"),
        });
    };

    let mut properties = Properties::new();
    for (attribute, value) in map {
        let property = match value {
            Value::String(s) => Property::String(s),
            Value::Number(n) => Property::Number(n.to_string()),
            other => {
                return Err(Error::UnsupportedType {
                    record: record.to_string(),
                    attribute,
                    kind: json_kind(&other),
                });
            },
        };
        properties.set(attribute, property);
    }
    Ok(properties)
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
