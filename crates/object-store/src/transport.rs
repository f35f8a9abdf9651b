//! Signed HTTP access to the Manta API.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::crypto::RequestSigner;
use reqwest::header::{
    HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, DATE, ETAG,
    LAST_MODIFIED, LOCATION,
};
use reqwest::{Body, Client, Method, Response};
use tracing::debug;
use url::Url;

use crate::classify::classify;
use crate::error::{Result, StoreError};

/// Content type the service uses for directories, both in requests and in HEAD responses
const DIRECTORY_CONTENT_TYPE: &str = "application/json; type=directory";
/// Content type of a snaplink creation request
const LINK_CONTENT_TYPE: &str = "application/json; type=link";
const OBJECT_CONTENT_TYPE: &str = "application/octet-stream";

/// What a HEAD request tells us about a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub is_directory: bool,
    pub content_length: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Metadata {
    fn from_headers(headers: &HeaderMap) -> Self {
        let is_directory = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("type=directory"))
            .unwrap_or(false);
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let last_modified = headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|d| d.with_timezone(&Utc));
        Self {
            is_directory,
            content_length,
            last_modified,
        }
    }
}

/// Executes signed requests against one Manta endpoint.
///
/// Every request gets a fresh `Date` / `Authorization` pair from the signer
/// right before it is sent. No retries happen at this layer.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    endpoint: Url,
    signer: Arc<RequestSigner>,
}

impl Transport {
    pub fn new(endpoint: Url, signer: Arc<RequestSigner>, timeout: Duration) -> Result<Self> {
        if endpoint.cannot_be_a_base() || !matches!(endpoint.scheme(), "http" | "https") {
            return Err(StoreError::InvalidConfig(format!(
                "endpoint must be an http(s) URL: {}",
                endpoint
            )));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            signer,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Build the request URL for an absolute store path.
    ///
    /// Segments are percent-encoded individually so names containing
    /// characters like `#` stay part of the path.
    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                StoreError::InvalidConfig(format!("endpoint cannot be a base: {}", self.endpoint))
            })?;
            segments
                .pop_if_empty()
                .extend(path.split('/').filter(|s| !s.is_empty()));
        }
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// Sign and send one request, returning the response whatever its status.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        mut headers: HeaderMap,
        body: Option<Body>,
    ) -> Result<Response> {
        let url = self.url(path, query)?;

        let signed = self.signer.sign(Utc::now())?;
        headers.insert(DATE, header_value(&signed.date)?);
        headers.insert(AUTHORIZATION, header_value(&signed.authorization)?);

        debug!(method = %method, path = %path, "sending request");
        let mut request = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }
        let response = request.send().await?;
        debug!(path = %path, status = %response.status(), "received response");
        Ok(response)
    }

    /// Turn a failed response into a typed error.
    ///
    /// Returns `Ok(None)` when the response means "absent" and `lookup` is set.
    pub async fn check(response: Response, lookup: bool) -> Result<Option<Response>> {
        let status = response.status();
        if status.is_success() {
            return Ok(Some(response));
        }
        // a body that cannot be read is a transport failure, not a missing explanation
        let body = response.text().await?;
        match classify(status, &body, lookup) {
            None => Ok(None),
            Some(descriptor) => Err(StoreError::Service(descriptor)),
        }
    }

    /// HEAD a path. `None` if nothing lives there.
    pub async fn head(&self, path: &str) -> Result<Option<Metadata>> {
        let response = self
            .execute(Method::HEAD, path, &[], HeaderMap::new(), None)
            .await?;
        Ok(Self::check(response, true)
            .await?
            .map(|r| Metadata::from_headers(r.headers())))
    }

    /// GET a path. `None` if nothing lives there.
    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Option<Response>> {
        let response = self
            .execute(Method::GET, path, query, HeaderMap::new(), None)
            .await?;
        Self::check(response, true).await
    }

    /// Create a directory. Succeeds if it already exists.
    pub async fn put_directory(&self, path: &str) -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(DIRECTORY_CONTENT_TYPE),
        );
        let response = self
            .execute(Method::PUT, path, &[], headers, None)
            .await?;
        Self::check(response, false).await?;
        Ok(())
    }

    /// Write an object. Returns the `ETag` the service answered with.
    ///
    /// When `checksum` is set it is sent as the request `ETag`.
    pub async fn put_object(
        &self,
        path: &str,
        body: Body,
        content_length: u64,
        checksum: Option<&str>,
    ) -> Result<Option<String>> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(OBJECT_CONTENT_TYPE));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
        if let Some(checksum) = checksum {
            headers.insert(ETAG, header_value(checksum)?);
        }
        let response = self
            .execute(Method::PUT, path, &[], headers, Some(body))
            .await?;
        let response = Self::check(response, false)
            .await?
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        Ok(response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string()))
    }

    /// Create a snaplink at `link_path` pointing at the object at `source_path`.
    pub async fn put_snaplink(&self, link_path: &str, source_path: &str) -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(LINK_CONTENT_TYPE));
        headers.insert(LOCATION, header_value(source_path)?);
        let response = self
            .execute(Method::PUT, link_path, &[], headers, None)
            .await?;
        Self::check(response, false).await?;
        Ok(())
    }

    /// Delete a path. Returns `false` if nothing was there.
    pub async fn delete(&self, path: &str) -> Result<bool> {
        let response = self
            .execute(Method::DELETE, path, &[], HeaderMap::new(), None)
            .await?;
        Ok(Self::check(response, true).await?.is_some())
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| StoreError::InvalidHeader(format!("'{}': {}", value, e)))
}
