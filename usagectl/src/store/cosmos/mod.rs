//! Azure Cosmos DB (SQL API) store over the REST gateway.
//!
//! Only the calls the migration needs are implemented: reading the database and container to
//! validate the connection, cross-partition queries with continuation tokens, and point reads and
//! replaces of documents.

pub mod auth;

use std::time::Duration;

use chrono::Utc;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument};
use url::Url;

use crate::config::StoreConfig;
use crate::document::Document;
use crate::errors::{Error, Result};

use self::auth::{ResourceType, authorization_token, http_date};
use super::{DocumentStore, Filter, Page};

pub const API_VERSION: &str = "2018-12-31";

const HEADER_DATE: &str = "x-ms-date";
const HEADER_VERSION: &str = "x-ms-version";
const HEADER_CONTINUATION: &str = "x-ms-continuation";
const HEADER_MAX_ITEM_COUNT: &str = "x-ms-max-item-count";
const HEADER_IS_QUERY: &str = "x-ms-documentdb-isquery";
const HEADER_CROSS_PARTITION: &str = "x-ms-documentdb-query-enablecrosspartition";
const HEADER_PARTITION_KEY: &str = "x-ms-documentdb-partitionkey";

/// Error body returned by the gateway on failures.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(rename = "Documents", default)]
    documents: Vec<Value>,
}

/// Cosmos DB client bound to one database and container.
#[derive(Clone)]
pub struct CosmosStore {
    client: reqwest::Client,
    endpoint: Url,
    key: Vec<u8>,
    database: String,
    container: String,
}

impl CosmosStore {
    /// Build a client without touching the network.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let endpoint = config.endpoint.clone().ok_or_else(|| Error::Config {
            message: "store.endpoint is not set".to_string(),
        })?;
        let key = auth::decode_key(&config.key).ok_or_else(|| Error::Config {
            message: "store.key is not a valid base64 master key".to_string(),
        })?;

        // reqwest is built without a bundled provider; the first client installs aws-lc-rs and later
        // calls find it already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            key,
            database: config.database.clone(),
            container: config.container.clone(),
        })
    }

    /// Build a client and check that the database and container are reachable with these
    /// credentials.
    ///
    /// # Errors
    /// - `Unauthorized` if the key is rejected
    /// - `NotFound` if the database or container does not exist
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let store = Self::new(config)?;

        store
            .get_resource(ResourceType::Database, &store.database_link(), "database")
            .await?;
        store
            .get_resource(ResourceType::Container, &store.container_link(), "container")
            .await?;

        info!(
            endpoint = %store.endpoint,
            database = %store.database,
            container = %store.container,
            "Connected to Cosmos DB"
        );
        Ok(store)
    }

    fn database_link(&self) -> String {
        format!("dbs/{}", self.database)
    }

    fn container_link(&self) -> String {
        format!("dbs/{}/colls/{}", self.database, self.container)
    }

    fn document_link(&self, id: &str) -> String {
        format!("{}/docs/{}", self.container_link(), id)
    }

    /// URL for a resource path. Segments are percent-encoded individually so ids may contain
    /// reserved characters.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config {
                message: format!("store.endpoint {} cannot be used as a base URL", self.endpoint),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, resource_type: ResourceType, resource_link: &str) -> Result<RequestBuilder> {
        let date = http_date(Utc::now());
        let token = authorization_token(&self.key, method.as_str(), resource_type, resource_link, &date).ok_or_else(|| {
            Error::Config {
                message: "store.key cannot be used for signing".to_string(),
            }
        })?;

        Ok(self
            .client
            .request(method, url)
            .header(HEADER_DATE, date)
            .header(HEADER_VERSION, API_VERSION)
            .header(reqwest::header::AUTHORIZATION, token))
    }

    async fn send(&self, request: RequestBuilder, resource: &str) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            error!(resource, error = %e, "Cosmos DB request failed");
            e
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(ErrorBody {
                code: Some(code),
                message: Some(message),
            }) => format!("{code}: {message}"),
            Ok(ErrorBody { message: Some(message), .. }) => message,
            _ => body,
        };

        debug!(resource, status = status.as_u16(), %message, "Cosmos DB returned an error");
        Err(Error::from_status(status.as_u16(), resource, message))
    }

    async fn get_resource(&self, resource_type: ResourceType, link: &str, resource: &str) -> Result<()> {
        let segments: Vec<&str> = link.split('/').collect();
        let request = self.request(Method::GET, self.url(&segments)?, resource_type, link)?;
        self.send(request, resource).await?;
        Ok(())
    }

    fn partition_key_header(partition_key: &Value) -> Result<String> {
        Ok(serde_json::to_string(&[partition_key])?)
    }
}

#[async_trait::async_trait]
impl DocumentStore for CosmosStore {
    #[instrument(skip(self, filter, continuation), fields(container = %self.container))]
    async fn query_page(&self, filter: &Filter, page_size: usize, continuation: Option<String>) -> Result<Page> {
        let sql = filter.to_sql();
        let link = self.container_link();
        let url = self.url(&["dbs", self.database.as_str(), "colls", self.container.as_str(), "docs"])?;

        debug!(query = %sql.query, page_size, first_page = continuation.is_none(), "Querying documents");

        let mut request = self
            .request(Method::POST, url, ResourceType::Document, &link)?
            .header(HEADER_IS_QUERY, "True")
            .header(HEADER_CROSS_PARTITION, "True")
            .header(HEADER_MAX_ITEM_COUNT, page_size.to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/query+json")
            .body(serde_json::to_vec(&sql)?);

        if let Some(token) = continuation {
            request = request.header(HEADER_CONTINUATION, token);
        }

        let response = self.send(request, "container").await?;
        let continuation = response
            .headers()
            .get(HEADER_CONTINUATION)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        let body: QueryResponse = response.json().await?;

        Ok(Page {
            documents: body.documents,
            continuation,
        })
    }

    #[instrument(skip(self, partition_key))]
    async fn read(&self, id: &str, partition_key: &Value) -> Result<Document> {
        let url = self.url(&["dbs", self.database.as_str(), "colls", self.container.as_str(), "docs", id])?;
        let request = self
            .request(Method::GET, url, ResourceType::Document, &self.document_link(id))?
            .header(HEADER_PARTITION_KEY, Self::partition_key_header(partition_key)?);

        let response = self.send(request, "document").await?;
        Document::from_value(response.json().await?)
    }

    #[instrument(skip(self, partition_key, document))]
    async fn replace(&self, id: &str, partition_key: &Value, document: &Document) -> Result<Document> {
        let url = self.url(&["dbs", self.database.as_str(), "colls", self.container.as_str(), "docs", id])?;
        let request = self
            .request(Method::PUT, url, ResourceType::Document, &self.document_link(id))?
            .header(HEADER_PARTITION_KEY, Self::partition_key_header(partition_key)?)
            .json(document);

        let response = self.send(request, "document").await?;
        Document::from_value(response.json().await?)
    }
}
