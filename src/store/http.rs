//! Elasticsearch-compatible REST index store.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{json, Value};
use url::Url;

use crate::error::{Error, Result};
use crate::partition::{PartitionInfo, PartitionStatus};
use crate::policy::SettingsDocument;
use crate::store::{AliasAction, IndexStore, PolicyLoad, PolicyStore};

pub const DEFAULT_POLICY_INDEX: &str = "indexroll";
const DEFAULT_URL: &str = "http://localhost:9200";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const POLICY_PAGE_SIZE: usize = 1000;

/// Connection settings for [`HttpIndexStore`].
#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    /// Base URL. Credentials in the userinfo part are sent as basic auth.
    pub url: String,
    /// PEM bundle of extra trusted root certificates.
    pub pem_file: Option<PathBuf>,
    /// Index holding the policy documents.
    pub policy_index: String,
    pub timeout: Duration,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            pem_file: None,
            policy_index: DEFAULT_POLICY_INDEX.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl HttpStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

pub struct HttpIndexStore {
    client: reqwest::Client,
    base: Url,
    credentials: Option<(String, Option<String>)>,
    policy_index: String,
}

impl HttpIndexStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self> {
        let mut base = Url::parse(&config.url)
            .map_err(|err| Error::InvalidConfig(format!("url {:?}: {err}", config.url)))?;

        let credentials = if base.username().is_empty() {
            None
        } else {
            Some((
                base.username().to_string(),
                base.password().map(str::to_string),
            ))
        };
        // Credentials travel in the Authorization header, not the URL.
        let _ = base.set_username("");
        let _ = base.set_password(None);

        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(pem_file) = &config.pem_file {
            let pem = std::fs::read(pem_file).map_err(|err| {
                Error::InvalidConfig(format!("read {}: {err}", pem_file.display()))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)?;
            builder = builder.add_root_certificate(cert);
        }

        Ok(Self {
            client: builder.build()?,
            base,
            credentials,
            policy_index: config.policy_index,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.base.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{path}"))
            .map_err(|err| Error::InvalidConfig(format!("endpoint {path:?}: {err}")))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.endpoint(path)?;
        debug!("{} {}", method, url);
        let builder = self.client.request(method, url);
        Ok(match &self.credentials {
            Some((user, pass)) => builder.basic_auth(user, pass.as_deref()),
            None => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        check_status(response).await
    }

    async fn send_json_body(&self, method: Method, path: &str, body: String) -> Result<()> {
        let builder = self
            .request(method, path)?
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        self.send(builder).await?;
        Ok(())
    }

    async fn cat_indices(&self, pattern: &str) -> Result<Option<Vec<PartitionInfo>>> {
        let path = format!("_cat/indices/{pattern}?format=json&bytes=b");
        let response = self.request(Method::GET, &path)?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = check_status(response).await?.bytes().await?;
        Ok(Some(parse_cat_indices(&body)?))
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|err| format!("<unreadable body: {err}>"));
    Err(Error::Store {
        status: Some(status.as_u16()),
        message,
    })
}

fn join_names(names: &[String]) -> String {
    names.join(",")
}

#[derive(Serialize)]
struct CreateBody<'a> {
    settings: &'a RawValue,
}

fn create_body(settings: Option<&SettingsDocument>) -> Result<String> {
    match settings {
        Some(doc) => Ok(serde_json::to_string(&CreateBody {
            settings: doc.as_raw(),
        })?),
        None => Ok(r#"{"settings":{}}"#.to_string()),
    }
}

fn alias_body(actions: &[AliasAction]) -> Value {
    let actions: Vec<Value> = actions
        .iter()
        .map(|action| {
            let mut entry = serde_json::Map::new();
            entry.insert(
                action.op.as_str().to_string(),
                json!({ "index": action.partition, "alias": action.alias }),
            );
            Value::Object(entry)
        })
        .collect();
    json!({ "actions": actions })
}

#[derive(Deserialize)]
struct CatIndex {
    index: String,
    status: Option<String>,
    #[serde(rename = "pri.store.size")]
    primary_size: Option<String>,
}

fn parse_cat_indices(body: &[u8]) -> Result<Vec<PartitionInfo>> {
    let rows: Vec<CatIndex> = serde_json::from_slice(body)?;
    Ok(rows
        .into_iter()
        .map(|row| PartitionInfo {
            name: row.index,
            status: row
                .status
                .as_deref()
                .map(PartitionStatus::parse)
                .unwrap_or(PartitionStatus::Open),
            primary_size_bytes: row.primary_size.and_then(|s| s.parse().ok()),
        })
        .collect())
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source")]
    source: Box<RawValue>,
}

fn parse_policy_hits(body: &[u8]) -> Result<Vec<(String, String)>> {
    let response: SearchResponse = serde_json::from_slice(body)?;
    Ok(response
        .hits
        .hits
        .into_iter()
        .map(|hit| (hit.id, hit.source.get().to_string()))
        .collect())
}

#[async_trait]
impl IndexStore for HttpIndexStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        let response = self.request(Method::HEAD, name)?.send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Error::Store {
                status: Some(status.as_u16()),
                message: format!("existence check for {name} failed"),
            }),
        }
    }

    async fn create(&self, name: &str, settings: Option<&SettingsDocument>) -> Result<()> {
        self.send_json_body(Method::PUT, name, create_body(settings)?)
            .await
    }

    async fn primary_size(&self, pattern: &str) -> Result<u64> {
        let rows = self.cat_indices(pattern).await?.unwrap_or_default();
        match rows.as_slice() {
            [row] => Ok(row.primary_size_bytes.unwrap_or(0)),
            _ => Err(Error::AmbiguousTarget {
                pattern: pattern.to_string(),
                matches: rows.len(),
            }),
        }
    }

    async fn list_matching(&self, pattern: &str) -> Result<Vec<PartitionInfo>> {
        Ok(self.cat_indices(pattern).await?.unwrap_or_default())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        let body = alias_body(actions).to_string();
        self.send_json_body(Method::POST, "_aliases", body).await
    }

    async fn flush(&self, names: &[String]) -> Result<()> {
        let path = format!("{}/_flush", join_names(names));
        self.send(self.request(Method::POST, &path)?).await?;
        Ok(())
    }

    async fn close(&self, names: &[String]) -> Result<()> {
        let path = format!("{}/_close", join_names(names));
        self.send(self.request(Method::POST, &path)?).await?;
        Ok(())
    }

    async fn delete(&self, names: &[String]) -> Result<()> {
        self.send(self.request(Method::DELETE, &join_names(names))?)
            .await?;
        Ok(())
    }

    async fn put_settings(&self, names: &[String], settings: &SettingsDocument) -> Result<()> {
        let path = format!("{}/_settings", join_names(names));
        self.send_json_body(Method::PUT, &path, settings.as_str().to_string())
            .await
    }

    async fn optimize(&self, names: &[String], max_segments: Option<u32>) -> Result<()> {
        let mut path = format!("{}/_forcemerge", join_names(names));
        if let Some(max) = max_segments {
            path.push_str(&format!("?max_num_segments={max}"));
        }
        self.send(self.request(Method::POST, &path)?).await?;
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for HttpIndexStore {
    async fn load_policies(&self) -> Result<PolicyLoad> {
        let path = format!("{}/_search?size={}", self.policy_index, POLICY_PAGE_SIZE);
        let response = self.request(Method::GET, &path)?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NoPolicies);
        }
        let body = check_status(response).await?.bytes().await?;
        PolicyLoad::from_documents(parse_policy_hits(&body)?)
    }
}
