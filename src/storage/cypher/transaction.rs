//! Neo4j HTTP transaction endpoint.
//!
//! `POST /db/<database>/tx/commit` runs statements in a single transaction
//! and commits. `POST /db/<database>/tx` opens a transaction whose `commit`
//! URL is used to finish it, or to roll it back with `DELETE`.

use super::statements::Statement;
use crate::{Error, Result};
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Serialize)]
struct TxRequest<'a> {
    statements: &'a [Statement],
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TxResponse {
    results: Vec<StatementResult>,
    errors: Vec<TxError>,
    commit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Row {
    row: Vec<Value>,
}

/// Rows returned by one statement.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StatementResult {
    columns: Vec<String>,
    data: Vec<Row>,
}

impl StatementResult {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the statement returned no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consumes the result, yielding each row's values in column order.
    pub fn into_rows(self) -> impl Iterator<Item = Vec<Value>> {
        self.data.into_iter().map(|row| row.row)
    }

    /// Position of `column`.
    #[must_use]
    pub fn column(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

/// An open transaction. Finish it with [`Transport::commit_open`] or
/// [`Transport::rollback`].
#[derive(Debug)]
pub struct OpenTransaction {
    commit: Url,
}

/// Authenticated HTTP access to one database.
pub struct Transport {
    client: reqwest::blocking::Client,
    base: Url,
    database: String,
    user: Option<String>,
    password: Option<SecretString>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("base", &self.base.as_str())
            .field("database", &self.database)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Creates a transport for `database` at `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base: Url,
        database: impl Into<String>,
        user: Option<String>,
        password: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InitializationFailed {
                backend: super::BACKEND_NAME.to_string(),
                cause: e.to_string(),
            })?;
        Ok(Self {
            client,
            base,
            database: database.into(),
            user,
            password,
        })
    }

    /// Runs `statements` in one transaction and commits.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or any statement fails; nothing
    /// is committed in that case.
    pub fn commit(&self, operation: &str, statements: &[Statement]) -> Result<Vec<StatementResult>> {
        let url = self.endpoint(operation, "tx/commit")?;
        self.send(operation, url, statements).map(|r| r.results)
    }

    /// Opens a transaction and runs `statements` in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or any statement fails.
    pub fn begin(
        &self,
        operation: &str,
        statements: &[Statement],
    ) -> Result<(OpenTransaction, Vec<StatementResult>)> {
        let url = self.endpoint(operation, "tx")?;
        let response = self.send(operation, url, statements)?;
        let commit = response
            .commit
            .as_deref()
            .and_then(|c| Url::parse(c).ok())
            .ok_or_else(|| failed(operation, "transaction response has no commit url".to_string()))?;
        Ok((OpenTransaction { commit }, response.results))
    }

    /// Runs `statements` in an open transaction and commits it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or any statement fails.
    pub fn commit_open(
        &self,
        operation: &str,
        tx: OpenTransaction,
        statements: &[Statement],
    ) -> Result<Vec<StatementResult>> {
        self.send(operation, tx.commit, statements).map(|r| r.results)
    }

    /// Rolls back an open transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be reached.
    pub fn rollback(&self, operation: &str, tx: OpenTransaction) -> Result<()> {
        let mut url = tx.commit;
        let path = url.path().trim_end_matches("/commit").to_string();
        url.set_path(&path);

        let response = self
            .authorize(self.client.delete(url))
            .send()
            .map_err(|e| failed(operation, e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(operation, format!("rollback returned status {}", response.status())));
        }
        tracing::debug!(operation, "Rolled back transaction");
        Ok(())
    }

    fn endpoint(&self, operation: &str, suffix: &str) -> Result<Url> {
        self.base
            .join(&format!("db/{}/{suffix}", self.database))
            .map_err(|e| failed(operation, e.to_string()))
    }

    fn authorize(&self, request: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.user {
            Some(user) => request.basic_auth(
                user,
                self.password.as_ref().map(|p| p.expose_secret().to_string()),
            ),
            None => request,
        }
    }

    fn send(&self, operation: &str, url: Url, statements: &[Statement]) -> Result<TxResponse> {
        tracing::debug!(operation, statements = statements.len(), url = %url, "Sending cypher request");
        let response = self
            .authorize(self.client.post(url))
            .header("Accept", "application/json")
            .json(&TxRequest { statements })
            .send()
            .map_err(|e| failed(operation, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(failed(operation, format!("server returned status {status}: {body}")));
        }

        let response: TxResponse = response
            .json()
            .map_err(|e| failed(operation, format!("invalid response: {e}")))?;
        check_errors(operation, &response)?;
        Ok(response)
    }
}

fn check_errors(operation: &str, response: &TxResponse) -> Result<()> {
    match response.errors.first() {
        None => Ok(()),
        Some(error) => Err(failed(operation, format!("{}: {}", error.code, error.message))),
    }
}

fn failed(operation: &str, cause: String) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_parsing() {
        let body = json!({
            "results": [{
                "columns": ["from", "r"],
                "data": [{"row": ["1", {"w": 2}], "meta": [null, null]}]
            }],
            "errors": [],
            "commit": "http://localhost:7474/db/neo4j/tx/7/commit"
        });
        let mut response: TxResponse = serde_json::from_value(body).unwrap();
        assert!(check_errors("op", &response).is_ok());
        assert_eq!(response.commit.as_deref(), Some("http://localhost:7474/db/neo4j/tx/7/commit"));

        let result = response.results.remove(0);
        assert_eq!(result.column("r"), Some(1));
        assert_eq!(result.len(), 1);
        let rows: Vec<_> = result.into_rows().collect();
        assert_eq!(rows, vec![vec![json!("1"), json!({"w": 2})]]);
    }

    #[test]
    fn test_response_errors() {
        let body = json!({
            "results": [],
            "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "bad"}]
        });
        let response: TxResponse = serde_json::from_value(body).unwrap();
        assert!(matches!(
            check_errors("get_nodes", &response),
            Err(Error::OperationFailed { operation, cause })
                if operation == "get_nodes" && cause.starts_with("Neo.ClientError")
        ));
    }

    #[test]
    fn test_endpoint_urls() {
        let transport = Transport::new(
            Url::parse("http://localhost:7474/").unwrap(),
            "graph",
            None,
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            transport.endpoint("op", "tx/commit").unwrap().as_str(),
            "http://localhost:7474/db/graph/tx/commit"
        );
    }

    #[test]
    fn test_request_body() {
        let statements = [super::super::statements::get_node("lib", "1")];
        let body = serde_json::to_value(TxRequest { statements: &statements }).unwrap();
        assert_eq!(
            body,
            json!({"statements": [{
                "statement": "MATCH (n:`lib` {nid: $nid}) RETURN properties(n) AS n",
                "parameters": {"nid": "1"}
            }]})
        );
    }
}
