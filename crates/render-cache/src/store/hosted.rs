use super::{PageStore, RemoteData};
use crate::error::{ConfigError, StoreError};
use page_cache::{validate_partition, Page, PageRecord, PageUpload};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Public endpoint of the hosted persistence API.
pub const DEFAULT_ENDPOINT: &str = "https://render-store.web.app";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`PageStore`] backed by the persistence HTTP API.
///
/// Every call is namespaced by the deployment secret.
pub struct HostedStore {
    http: Client,
    endpoint: String,
    secret: String,
}

impl HostedStore {
    /// Store against [`DEFAULT_ENDPOINT`].
    pub fn new(secret: impl Into<String>) -> Result<Self, ConfigError> {
        Self::with_endpoint(secret, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT)
    }

    pub fn with_endpoint(
        secret: impl Into<String>,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let secret = secret.into();
        validate_partition("secret", &secret)?;

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            secret,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn query<'a>(&'a self, key: &'a str) -> [(&'static str, &'a str); 2] {
        [("secret", self.secret.as_str()), ("hash", key)]
    }
}

/// `Ok(None)` for 404, the response for other successes, an error otherwise.
fn check(
    op: &'static str,
    resp: reqwest::Response,
) -> Result<Option<reqwest::Response>, StoreError> {
    match resp.status() {
        StatusCode::NOT_FOUND => Ok(None),
        s if s.is_success() => Ok(Some(resp)),
        s => Err(StoreError::Status {
            op,
            status: s.as_u16(),
        }),
    }
}

#[async_trait::async_trait]
impl PageStore for HostedStore {
    async fn get(&self, key: &str) -> Result<Option<RemoteData>, StoreError> {
        let resp = self
            .http
            .get(self.url("/api/page/data"))
            .query(&self.query(key))
            .send()
            .await?;

        let Some(resp) = check("get", resp)? else {
            return Ok(None);
        };
        Ok(RemoteData::from_body(resp.bytes().await?))
    }

    async fn get_expiration(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let resp = self
            .http
            .get(self.url("/api/page/expiration"))
            .query(&self.query(key))
            .send()
            .await?;

        let Some(resp) = check("get_expiration", resp)? else {
            return Ok(None);
        };
        let text = resp.text().await?;
        parse_expiration(&text).map(Some)
    }

    async fn set(&self, page: &Page) -> Result<(), StoreError> {
        let record = PageRecord::from_page(page)
            .ok_or_else(|| StoreError::MissingExpiration(page.key().to_string()))?;
        let body = PageUpload {
            secret: self.secret.clone(),
            page: record,
        };

        let resp = self
            .http
            .post(self.url("/api/page"))
            .json(&body)
            .send()
            .await?;

        check("set", resp)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let resp = self
            .http
            .delete(self.url("/api/page"))
            .query(&self.query(key))
            .send()
            .await?;

        check("remove", resp)?;
        Ok(())
    }
}

/// Expirations travel as a bare JSON number, which may be written with a
/// fraction or exponent.
fn parse_expiration(text: &str) -> Result<i64, StoreError> {
    let text = text.trim();
    if let Ok(ms) = text.parse::<i64>() {
        return Ok(ms);
    }
    match text.parse::<f64>() {
        Ok(ms) if ms.is_finite() => Ok(ms as i64),
        _ => Err(StoreError::Malformed {
            op: "get_expiration",
            detail: format!("not a number: {text:?}"),
        }),
    }
}
