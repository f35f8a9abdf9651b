//! In-process Manta emulator and helpers shared by the store integration tests
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Router;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use http::header::{
    AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, DATE, ETAG, LAST_MODIFIED, LOCATION,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use manta_object_store::{
    MantaStore, ProviderContext, SignError, SigningContext, StoreOptions,
};
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};
use url::Url;

pub const ACCOUNT: &str = "alice";
pub const KEY_ID: &str = "8b:71:ce:29";
pub const PRIVATE_KEY: &str = include_str!("../../../common/testdata/rsa_pkcs1.pem");
const PUBLIC_KEY: &str = include_str!("../../../common/testdata/rsa_public.pem");

const DEFAULT_LIMIT: usize = 256;
const MAX_LIMIT: usize = 1024;

/// Install a tracing subscriber once per test binary. Filter with RUST_LOG.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
enum Node {
    Directory {
        mtime: DateTime<Utc>,
    },
    Object {
        data: Bytes,
        etag: String,
        mtime: DateTime<Utc>,
    },
}

/// How a response body goes wrong after the status line was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFault {
    /// Stream the first `n` bytes without a length and end cleanly
    Truncate(usize),
    /// Stream the first `n` bytes, then drop the connection
    Abort(usize),
}

/// Canned answer for one method and path
#[derive(Debug, Clone)]
struct Failure {
    status: StatusCode,
    body: String,
    fault: Option<BodyFault>,
}

/// Everything the emulator knows, keyed by absolute path without trailing `/`
pub struct MockState {
    nodes: BTreeMap<String, Node>,
    failures: HashMap<(Method, String), Failure>,
    body_faults: HashMap<String, BodyFault>,
    page_cap: Option<usize>,
    throttled: bool,
    requests: Vec<(Method, String)>,
    verifying_key: VerifyingKey<Sha256>,
}

impl MockState {
    fn new() -> Self {
        let public_key = RsaPublicKey::from_public_key_pem(PUBLIC_KEY).unwrap();
        let mut nodes = BTreeMap::new();
        for root in ["stor", "public"] {
            nodes.insert(
                format!("/{}/{}", ACCOUNT, root),
                Node::Directory { mtime: Utc::now() },
            );
        }
        Self {
            nodes,
            failures: HashMap::new(),
            body_faults: HashMap::new(),
            page_cap: None,
            throttled: false,
            requests: Vec::new(),
            verifying_key: VerifyingKey::new(public_key),
        }
    }

    fn children(&self, dir: &str) -> Vec<(String, Node)> {
        let prefix = format!("{}/", dir);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('/'))
            .map(|(path, node)| (path[prefix.len()..].to_string(), node.clone()))
            .collect()
    }

    fn is_directory(&self, path: &str) -> bool {
        matches!(self.nodes.get(path), Some(Node::Directory { .. }))
    }

    fn verify(&self, headers: &HeaderMap) -> Result<(), Response> {
        let unauthorized = |code: &str, message: &str| error(StatusCode::UNAUTHORIZED, code, message);

        let date = header(headers, DATE)
            .ok_or_else(|| unauthorized("InvalidAuthenticationHeader", "missing date"))?;
        let authorization = header(headers, AUTHORIZATION)
            .ok_or_else(|| unauthorized("InvalidAuthenticationHeader", "missing authorization"))?;
        let params = authorization
            .strip_prefix("Signature ")
            .ok_or_else(|| unauthorized("AuthSchemeNotAllowed", "expected Signature scheme"))?;

        let mut key_id = None;
        let mut algorithm = None;
        let mut signature = None;
        for param in params.split(',') {
            let Some((name, value)) = param.split_once('=') else {
                return Err(unauthorized("InvalidAuthenticationHeader", param));
            };
            let value = value.trim_matches('"');
            match name.trim() {
                "keyId" => key_id = Some(value),
                "algorithm" => algorithm = Some(value),
                "signature" => signature = Some(value),
                _ => {}
            }
        }

        if key_id != Some(format!("/{}/keys/{}", ACCOUNT, KEY_ID).as_str()) {
            return Err(error(
                StatusCode::FORBIDDEN,
                "KeyDoesNotExist",
                &format!("unknown key {:?}", key_id),
            ));
        }
        if algorithm != Some("rsa-sha256") {
            return Err(unauthorized("InvalidAlgorithm", "expected rsa-sha256"));
        }

        let valid = signature
            .and_then(|s| base64::engine::general_purpose::STANDARD.decode(s).ok())
            .and_then(|bytes| Signature::try_from(bytes.as_slice()).ok())
            .map(|signature| {
                self.verifying_key
                    .verify(format!("date: {}", date).as_bytes(), &signature)
                    .is_ok()
            })
            .unwrap_or(false);
        if !valid {
            return Err(unauthorized("InvalidSignature", "signature does not verify"));
        }
        Ok(())
    }

    fn head(&self, path: &str) -> Response {
        match self.nodes.get(path) {
            None => StatusCode::NOT_FOUND.into_response(),
            Some(node) => (StatusCode::OK, node_headers(node)).into_response(),
        }
    }

    fn get(&self, path: &str, query: &HashMap<String, String>) -> Response {
        match self.nodes.get(path) {
            None => not_found(path),
            Some(Node::Object { data, .. }) if self.body_faults.contains_key(path) => faulty(
                StatusCode::OK,
                "application/octet-stream",
                data.clone(),
                self.body_faults[path],
            ),
            Some(node @ Node::Object { data, .. }) => {
                (StatusCode::OK, node_headers(node), data.clone()).into_response()
            }
            Some(node @ Node::Directory { .. }) => {
                let limit = query
                    .get("limit")
                    .and_then(|l| l.parse().ok())
                    .unwrap_or(DEFAULT_LIMIT);
                if limit > MAX_LIMIT {
                    return error(
                        StatusCode::BAD_REQUEST,
                        "InvalidArgument",
                        &format!("limit must be at most {}", MAX_LIMIT),
                    );
                }
                let limit = self.page_cap.map_or(limit, |cap| limit.min(cap));
                let marker = query.get("marker").cloned().unwrap_or_default();
                let mut body = String::new();
                for (name, child) in self
                    .children(path)
                    .into_iter()
                    .filter(|(name, _)| *name >= marker)
                    .take(limit)
                {
                    let line = match child {
                        Node::Directory { mtime } => serde_json::json!({
                            "name": name,
                            "type": "directory",
                            "mtime": timestamp(&mtime),
                        }),
                        Node::Object { data, etag, mtime } => serde_json::json!({
                            "name": name,
                            "etag": etag,
                            "size": data.len(),
                            "type": "object",
                            "mtime": timestamp(&mtime),
                        }),
                    };
                    body.push_str(&line.to_string());
                    body.push('\n');
                }
                (StatusCode::OK, node_headers(node), body).into_response()
            }
        }
    }

    fn put(&mut self, path: &str, headers: &HeaderMap, body: Bytes) -> Response {
        let parent = parent(path);
        if !self.is_directory(&parent) {
            return error(
                StatusCode::NOT_FOUND,
                "DirectoryDoesNotExist",
                &format!("{} does not exist", parent),
            );
        }
        let content_type = header(headers, CONTENT_TYPE).unwrap_or_default();

        if content_type.contains("type=directory") {
            match self.nodes.get(path) {
                Some(Node::Object { .. }) => {
                    return error(StatusCode::BAD_REQUEST, "ParentNotDirectory", path)
                }
                Some(Node::Directory { .. }) => {}
                None => {
                    self.nodes
                        .insert(path.to_string(), Node::Directory { mtime: Utc::now() });
                }
            }
            return StatusCode::NO_CONTENT.into_response();
        }

        if content_type.contains("type=link") {
            let source = header(headers, LOCATION)
                .map(|l| l.trim_end_matches('/').to_string())
                .unwrap_or_default();
            let Some(Node::Object { data, etag, .. }) = self.nodes.get(&source).cloned() else {
                return error(StatusCode::NOT_FOUND, "SourceObjectNotFound", &source);
            };
            self.nodes.insert(
                path.to_string(),
                Node::Object {
                    data,
                    etag,
                    mtime: Utc::now(),
                },
            );
            return StatusCode::NO_CONTENT.into_response();
        }

        if self.is_directory(path) {
            return error(StatusCode::BAD_REQUEST, "InvalidUpdate", path);
        }
        let etag = hex::encode(Sha256::digest(&body));
        self.nodes.insert(
            path.to_string(),
            Node::Object {
                data: body,
                etag: etag.clone(),
                mtime: Utc::now(),
            },
        );
        let mut response_headers = HeaderMap::new();
        response_headers.insert(ETAG, HeaderValue::from_str(&format!("\"{}\"", etag)).unwrap());
        (StatusCode::NO_CONTENT, response_headers).into_response()
    }

    fn delete(&mut self, path: &str) -> Response {
        match self.nodes.get(path) {
            None => not_found(path),
            Some(Node::Directory { .. }) if !self.children(path).is_empty() => error(
                StatusCode::BAD_REQUEST,
                "DirectoryNotEmpty",
                &format!("{} is not empty", path),
            ),
            Some(_) => {
                self.nodes.remove(path);
                StatusCode::NO_CONTENT.into_response()
            }
        }
    }
}

async fn handle(
    State(state): State<Arc<Mutex<MockState>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = decode_path(uri.path());
    let query: HashMap<String, String> = uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let mut state = state.lock();
    if let Err(response) = state.verify(&headers) {
        return response;
    }
    state.requests.push((method.clone(), path.clone()));

    if state.throttled {
        return error(
            StatusCode::SERVICE_UNAVAILABLE,
            "RequestThrottled",
            "slow down",
        );
    }
    if let Some(failure) = state.failures.get(&(method.clone(), path.clone())) {
        return match failure.fault {
            Some(fault) => faulty(
                failure.status,
                "application/json",
                Bytes::from(failure.body.clone()),
                fault,
            ),
            None => (failure.status, failure.body.clone()).into_response(),
        };
    }

    match method {
        Method::HEAD => state.head(&path),
        Method::GET => state.get(&path, &query),
        Method::PUT => state.put(&path, &headers, body),
        Method::DELETE => state.delete(&path),
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

/// A running emulator bound to a random local port
pub struct MockManta {
    pub addr: SocketAddr,
    state: Arc<Mutex<MockState>>,
}

impl MockManta {
    pub async fn start() -> Self {
        init_tracing();
        let state = Arc::new(Mutex::new(MockState::new()));
        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn endpoint(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    /// A store talking to this emulator with the fixture key
    pub fn store(&self) -> MantaStore {
        self.store_with(TestContext::default(), StoreOptions::default())
    }

    pub fn store_with(&self, context: TestContext, options: StoreOptions) -> MantaStore {
        MantaStore::new(self.endpoint(), &context, options).unwrap()
    }

    /// Answer every `method` request on `path` with a canned failure
    pub fn fail(&self, method: Method, path: &str, status: StatusCode, body: &str) {
        self.insert_failure(method, path, status, body, None);
    }

    /// Like [`MockManta::fail`], but the connection drops after `sent` bytes of the body
    pub fn fail_abruptly(
        &self,
        method: Method,
        path: &str,
        status: StatusCode,
        body: &str,
        sent: usize,
    ) {
        self.insert_failure(method, path, status, body, Some(BodyFault::Abort(sent)));
    }

    fn insert_failure(
        &self,
        method: Method,
        path: &str,
        status: StatusCode,
        body: &str,
        fault: Option<BodyFault>,
    ) {
        self.state.lock().failures.insert(
            (method, path.trim_end_matches('/').to_string()),
            Failure {
                status,
                body: body.to_string(),
                fault,
            },
        );
    }

    /// Serve the object at `path` with a broken body. HEAD still reports
    /// its full length.
    pub fn fault_body(&self, path: &str, fault: BodyFault) {
        self.state
            .lock()
            .body_faults
            .insert(path.to_string(), fault);
    }

    /// Return at most `cap` listing entries per page whatever the client asks for
    pub fn cap_pages(&self, cap: usize) {
        self.state.lock().page_cap = Some(cap);
    }

    pub fn throttle(&self, throttled: bool) {
        self.state.lock().throttled = throttled;
    }

    /// Create a directory and its parents directly, bypassing the API
    pub fn seed_directory(&self, path: &str) {
        let mut state = self.state.lock();
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            state
                .nodes
                .entry(current.clone())
                .or_insert(Node::Directory { mtime: Utc::now() });
        }
    }

    /// Create an object directly, bypassing the API. The parent must exist.
    pub fn seed_object(&self, path: &str, data: &[u8]) {
        self.seed_directory(&parent(path));
        let etag = hex::encode(Sha256::digest(data));
        self.state.lock().nodes.insert(
            path.to_string(),
            Node::Object {
                data: Bytes::copy_from_slice(data),
                etag,
                mtime: Utc::now(),
            },
        );
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state
            .lock()
            .nodes
            .contains_key(path.trim_end_matches('/'))
    }

    pub fn object_data(&self, path: &str) -> Option<Bytes> {
        match self.state.lock().nodes.get(path) {
            Some(Node::Object { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Every authenticated request so far, in arrival order
    pub fn requests(&self) -> Vec<(Method, String)> {
        self.state.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }
}

/// Provider context holding the fixture key in memory
#[derive(Debug, Clone)]
pub struct TestContext {
    pub account: String,
    pub key_id: String,
    pub private_key: String,
}

impl Default for TestContext {
    fn default() -> Self {
        Self {
            account: ACCOUNT.to_string(),
            key_id: KEY_ID.to_string(),
            private_key: PRIVATE_KEY.to_string(),
        }
    }
}

impl ProviderContext for TestContext {
    fn account_id(&self) -> &str {
        &self.account
    }

    fn region_id(&self) -> &str {
        "test-1"
    }

    fn signing_context(&self) -> Result<SigningContext, SignError> {
        Ok(SigningContext::new(
            &self.account,
            &self.key_id,
            &self.private_key,
        ))
    }
}

/// Write `data` to a fresh file inside `dir`
pub fn local_file(dir: &Path, name: &str, data: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub const WAIT: Duration = Duration::from_secs(10);

fn node_headers(node: &Node) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mtime = match node {
        Node::Directory { mtime } => {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-json-stream; type=directory"),
            );
            mtime
        }
        Node::Object { data, etag, mtime } => {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            headers.insert(CONTENT_LENGTH, HeaderValue::from(data.len()));
            headers.insert(ETAG, HeaderValue::from_str(etag).unwrap());
            mtime
        }
    };
    headers.insert(
        LAST_MODIFIED,
        HeaderValue::from_str(&mtime.format("%a, %d %b %Y %H:%M:%S GMT").to_string()).unwrap(),
    );
    headers
}

/// A chunked body cut short according to `fault`
fn faulty(status: StatusCode, content_type: &'static str, data: Bytes, fault: BodyFault) -> Response {
    let (sent, abort) = match fault {
        BodyFault::Truncate(sent) => (sent, false),
        BodyFault::Abort(sent) => (sent, true),
    };
    let head = futures::stream::iter([Ok::<_, std::io::Error>(data.slice(..sent.min(data.len())))]);
    let body = if abort {
        // pause so the status line and first bytes are flushed before the drop
        let tail = futures::stream::once(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err::<Bytes, _>(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "connection dropped",
            ))
        });
        Body::from_stream(head.chain(tail))
    } else {
        Body::from_stream(head)
    };
    (status, [(CONTENT_TYPE, content_type)], body).into_response()
}

fn error(status: StatusCode, code: &str, message: &str) -> Response {
    let body = serde_json::json!({ "code": code, "message": message }).to_string();
    (status, [(CONTENT_TYPE, "application/json")], body).into_response()
}

fn not_found(path: &str) -> Response {
    error(
        StatusCode::NOT_FOUND,
        "ResourceNotFound",
        &format!("{} was not found", path),
    )
}

fn header(headers: &HeaderMap, name: http::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parent(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    }
}

/// Percent-decode a request path and drop its trailing `/`
fn decode_path(raw: &str) -> String {
    percent_decode_str(raw)
        .decode_utf8_lossy()
        .trim_end_matches('/')
        .to_string()
}
