//! Graph store backed by a Cypher HTTP endpoint.
//!
//! All sessions share one `reqwest::Client` (and so one connection pool);
//! each session carries its own id so the server can tell concurrent
//! workers apart.

use super::cypher::{self, Statement};
use super::{
    EdgeUpsert, GraphSession, GraphStore, NodeRef, NodeUpsert, PerformanceCounters, PropertyValue,
    SchemaSpec, StorePerformance,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

/// Connection settings for [`HttpGraphStore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpStoreConfig {
    /// Base URL of the server, e.g. `http://localhost:15474`
    pub url: String,
    /// API key sent as `X-API-Key`
    pub api_key: Option<String>,
    /// Basic auth user
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
    /// Target database, server default when unset
    pub database: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Retries for transport failures before giving up
    pub max_retries: u32,
    /// First backoff delay in milliseconds, doubled per retry
    pub retry_base_delay_ms: u64,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:15474".to_string(),
            api_key: None,
            username: None,
            password: None,
            database: None,
            timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 100,
        }
    }
}

#[derive(Debug, Serialize)]
struct CypherRequest<'a> {
    query: &'a str,
    params: &'a serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a str>,
}

/// Response body of `POST /cypher`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CypherResponse {
    /// Column names
    #[serde(default)]
    pub columns: Vec<String>,
    /// Result rows
    #[serde(default)]
    pub rows: Vec<serde_json::Value>,
    /// Server-side execution time
    #[serde(default)]
    pub execution_time_ms: u64,
    /// Statement error, if any
    #[serde(default)]
    pub error: Option<String>,
}

impl CypherResponse {
    /// First value of the first row
    fn scalar(&self) -> Option<&serde_json::Value> {
        let row = self.rows.first()?;
        match row {
            serde_json::Value::Array(values) => values.first(),
            serde_json::Value::Object(map) => self
                .columns
                .first()
                .and_then(|c| map.get(c))
                .or_else(|| map.values().next()),
            other => Some(other),
        }
    }

    fn scalar_u64(&self) -> u64 {
        self.scalar().and_then(serde_json::Value::as_u64).unwrap_or(0)
    }
}

#[derive(Debug)]
struct HttpInner {
    client: Client,
    base_url: Url,
    config: HttpStoreConfig,
    counters: PerformanceCounters,
}

/// Graph store speaking Cypher over HTTP
#[derive(Debug, Clone)]
pub struct HttpGraphStore {
    inner: Arc<HttpInner>,
}

impl HttpGraphStore {
    /// Create a store client; no request is made until a session is used
    pub fn new(config: HttpStoreConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| Error::configuration(format!("invalid store url {}: {e}", config.url)))?;
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent(concat!("ifc-graph/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(HttpInner {
                client,
                base_url,
                config,
                counters: PerformanceCounters::default(),
            }),
        })
    }

    /// Base URL of the server
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }
}

impl HttpInner {
    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::configuration(format!("invalid endpoint {path}: {e}")))
    }

    fn add_auth_headers(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(api_key) = &self.config.api_key {
            builder = builder.header("X-API-Key", api_key);
        } else if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            let auth = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
            builder = builder.header("Authorization", format!("Basic {auth}"));
        }
        builder
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(
            self.config
                .retry_base_delay_ms
                .saturating_mul(1u64 << attempt.min(5)),
        )
    }

    /// Send with retries on transport errors and 5xx responses
    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let max_retries = self.config.max_retries;
        let mut attempt = 0;
        loop {
            let request = builder
                .try_clone()
                .ok_or_else(|| Error::internal("request body cannot be retried"))?;
            match request.send().await {
                Ok(response) if response.status().is_server_error() && attempt < max_retries => {
                    debug!(status = %response.status(), attempt, "retrying graph store request");
                }
                Ok(response) => return Ok(response),
                Err(e) if (e.is_timeout() || e.is_connect() || e.is_request()) && attempt < max_retries => {
                    debug!(error = %e, attempt, "retrying graph store request");
                }
                Err(e) => {
                    return Err(Error::store_unavailable(format!(
                        "request to {} failed: {e}",
                        self.base_url
                    )));
                }
            }
            tokio::time::sleep(self.backoff(attempt)).await;
            attempt += 1;
        }
    }

    async fn execute(&self, session_id: &Uuid, statement: &Statement) -> Result<CypherResponse> {
        let start = Instant::now();
        let result = self.execute_inner(session_id, statement).await;
        self.counters.record_query(start.elapsed(), result.is_ok());
        result
    }

    async fn execute_inner(&self, session_id: &Uuid, statement: &Statement) -> Result<CypherResponse> {
        let body = CypherRequest {
            query: &statement.query,
            params: &statement.params,
            database: self.config.database.as_deref(),
        };
        let builder = self
            .client
            .post(self.endpoint("/cypher")?)
            .header("X-Session-Id", session_id.to_string())
            .json(&body);
        let response = self.send(self.add_auth_headers(builder)).await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN || status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::store_unavailable(format!("{status}: {text}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::store_query(format!("{status}: {text}")));
        }

        let parsed: CypherResponse = response
            .json()
            .await
            .map_err(|e| Error::store_query(format!("malformed response: {e}")))?;
        if let Some(error) = &parsed.error {
            return Err(Error::store_query(error.clone()));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl GraphStore for HttpGraphStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn open_session(&self) -> Result<Box<dyn GraphSession>> {
        self.inner.counters.session_opened();
        Ok(Box::new(HttpSession {
            id: Uuid::new_v4(),
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn verify_connectivity(&self) -> Result<()> {
        let builder = self.inner.client.get(self.inner.endpoint("/health")?);
        let response = self.inner.send(self.inner.add_auth_headers(builder)).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::store_unavailable(format!(
                "health check on {} returned {}",
                self.inner.base_url,
                response.status()
            )))
        }
    }

    fn performance(&self) -> StorePerformance {
        self.inner.counters.snapshot(self.name())
    }
}

/// Session on an [`HttpGraphStore`]
#[derive(Debug)]
pub struct HttpSession {
    id: Uuid,
    inner: Arc<HttpInner>,
}

impl HttpSession {
    /// Session id sent with every request
    pub fn id(&self) -> Uuid {
        self.id
    }

    async fn run(&self, statement: Statement) -> Result<CypherResponse> {
        self.inner.execute(&self.id, &statement).await
    }
}

impl Drop for HttpSession {
    fn drop(&mut self) {
        self.inner.counters.session_closed();
    }
}

#[async_trait]
impl GraphSession for HttpSession {
    async fn merge_node(&mut self, node: &NodeUpsert) -> Result<()> {
        self.run(cypher::merge_node(node)).await.map(|_| ())
    }

    async fn ensure_node(&mut self, node: &NodeRef) -> Result<bool> {
        let response = self.run(cypher::ensure_node(node)).await?;
        Ok(response
            .scalar()
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false))
    }

    async fn merge_edge(&mut self, edge: &EdgeUpsert) -> Result<()> {
        let response = self.run(cypher::merge_edge(edge)).await?;
        if response.scalar_u64() == 0 {
            return Err(Error::store_query(format!(
                "cannot merge {} edge: {} or {} does not exist",
                edge.rel_type, edge.source, edge.target
            )));
        }
        Ok(())
    }

    async fn delete_edges_where(&mut self, property: &str, value: &PropertyValue) -> Result<u64> {
        let response = self.run(cypher::delete_edges_where(property, value)).await?;
        Ok(response.scalar_u64())
    }

    async fn clear_all(&mut self) -> Result<()> {
        self.run(cypher::clear_all()).await.map(|_| ())
    }

    async fn apply_schema(&mut self, schema: &SchemaSpec) -> Result<()> {
        for item in &schema.items {
            match self.run(cypher::schema_item(item)).await {
                Ok(_) => {}
                Err(Error::StoreQuery(reason)) => {
                    warn!(?item, %reason, "schema item rejected by store, continuing");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn count_nodes(&mut self) -> Result<u64> {
        Ok(self.run(cypher::count_nodes()).await?.scalar_u64())
    }

    async fn count_edges(&mut self) -> Result<u64> {
        Ok(self.run(cypher::count_edges()).await?.scalar_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn store_for(url: String) -> HttpGraphStore {
        HttpGraphStore::new(HttpStoreConfig {
            url,
            max_retries: 0,
            retry_base_delay_ms: 1,
            timeout_secs: 5,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        let store = store_for("http://localhost:15474".to_string());
        assert_eq!(store.inner.backoff(0), Duration::from_millis(1));
        assert_eq!(store.inner.backoff(3), Duration::from_millis(8));
        assert_eq!(store.inner.backoff(40), Duration::from_millis(32));

        let slow = HttpGraphStore::new(HttpStoreConfig {
            retry_base_delay_ms: u64::MAX / 2,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(slow.inner.backoff(5), Duration::from_millis(u64::MAX));
    }

    #[tokio::test]
    async fn test_count_nodes_reads_first_cell() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/cypher")
            .match_body(Matcher::PartialJson(json!({"query": "MATCH (n) RETURN count(n) AS count"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"columns":["count"],"rows":[[42]],"execution_time_ms":1}"#)
            .create_async()
            .await;

        let store = store_for(server.url());
        let mut session = store.open_session().await.unwrap();
        assert_eq!(session.count_nodes().await.unwrap(), 42);
        mock.assert_async().await;
        assert_eq!(store.performance().queries, 1);
    }

    #[tokio::test]
    async fn test_statement_error_is_store_query() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/cypher")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"columns":[],"rows":[],"execution_time_ms":0,"error":"syntax error"}"#)
            .create_async()
            .await;

        let store = store_for(server.url());
        let mut session = store.open_session().await.unwrap();
        let err = session.clear_all().await.unwrap_err();
        assert!(matches!(err, Error::StoreQuery(ref m) if m == "syntax error"));
        assert!(!err.is_fatal());
        assert_eq!(store.performance().failed_queries, 1);
    }

    #[tokio::test]
    async fn test_server_error_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/cypher")
            .with_status(503)
            .with_body("shutting down")
            .create_async()
            .await;

        let store = store_for(server.url());
        let mut session = store.open_session().await.unwrap();
        let err = session.count_edges().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_merge_edge_without_endpoints_fails_softly() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/cypher")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"columns":["count"],"rows":[[0]],"execution_time_ms":0}"#)
            .create_async()
            .await;

        let store = store_for(server.url());
        let mut session = store.open_session().await.unwrap();
        let err = session
            .merge_edge(&EdgeUpsert {
                source: NodeRef::entity("a"),
                target: NodeRef::entity("b"),
                rel_type: "CONNECTS_TO".to_string(),
                properties: Default::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreQuery(_)));
    }

    #[tokio::test]
    async fn test_api_key_and_database_are_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/cypher")
            .match_header("x-api-key", "secret")
            .match_body(Matcher::PartialJson(json!({"database": "models"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"columns":["created"],"rows":[{"created":true}],"execution_time_ms":0}"#)
            .create_async()
            .await;

        let store = HttpGraphStore::new(HttpStoreConfig {
            url: server.url(),
            api_key: Some("secret".to_string()),
            database: Some("models".to_string()),
            max_retries: 0,
            ..Default::default()
        })
        .unwrap();
        let mut session = store.open_session().await.unwrap();
        assert!(session.ensure_node(&NodeRef::entity("x")).await.unwrap());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_schema_rejections_are_tolerated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/cypher")
            .with_status(400)
            .with_body("unsupported")
            .expect(SchemaSpec::default().items.len())
            .create_async()
            .await;

        let store = store_for(server.url());
        let mut session = store.open_session().await.unwrap();
        session.apply_schema(&SchemaSpec::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_connectivity() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/health").with_status(200).create_async().await;
        store_for(server.url()).verify_connectivity().await.unwrap();

        let unreachable = store_for("http://127.0.0.1:1".to_string());
        let err = unreachable.verify_connectivity().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_invalid_url_is_configuration_error() {
        let err = HttpGraphStore::new(HttpStoreConfig {
            url: "not a url".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
