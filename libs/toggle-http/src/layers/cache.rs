//! Private in-memory HTTP response cache.
//!
//! Only `GET` responses with status 200 are stored. Freshness follows
//! `Cache-Control: max-age` / `no-cache` / `no-store`, then `Expires`.
//! Responses without explicit freshness are stored when they carry a validator
//! (`ETag` or `Last-Modified`), and every later request for them is sent as a
//! conditional request. A `304 Not Modified` answer to such a request is
//! replaced by the stored 200 response.
//!
//! Every response leaving the layer carries a [`CacheStatus`] extension.

use crate::config::CacheConfig;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Version, header};
use http_body::{Body, Frame};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};
use tower::{BoxError, Layer, Service};

/// Body type produced by the cache layer.
pub type CachedBody = BoxBody<Bytes, BoxError>;

/// How a response relates to the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Fetched from the origin and not answered from the cache
    Miss,
    /// Served from the cache without contacting the origin
    Hit,
    /// The origin answered `304 Not Modified` and the stored body was served
    Revalidated,
    /// The request was not eligible for caching, or caching is disabled
    Bypass,
}

impl CacheStatus {
    /// Whether the body came from the local cache.
    #[must_use]
    pub fn is_from_cache(self) -> bool {
        matches!(self, CacheStatus::Hit | CacheStatus::Revalidated)
    }
}

/// Request headers that make a request conditional or partial; such requests
/// pass through untouched so the caller sees the origin's own answer.
const CALLER_CONDITIONALS: &[HeaderName] = &[
    header::IF_NONE_MATCH,
    header::IF_MODIFIED_SINCE,
    header::IF_MATCH,
    header::IF_UNMODIFIED_SINCE,
    header::IF_RANGE,
    header::RANGE,
];

#[derive(Debug, Default, PartialEq, Eq)]
struct CacheControl {
    no_store: bool,
    no_cache: bool,
    max_age: Option<u64>,
}

impl CacheControl {
    fn parse(headers: &HeaderMap) -> Self {
        let mut cc = Self::default();
        for value in headers.get_all(header::CACHE_CONTROL) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            for directive in value.split(',').map(str::trim) {
                let (name, arg) = match directive.split_once('=') {
                    Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"'))),
                    None => (directive, None),
                };
                if name.eq_ignore_ascii_case("no-store") {
                    cc.no_store = true;
                } else if name.eq_ignore_ascii_case("no-cache") {
                    cc.no_cache = true;
                } else if name.eq_ignore_ascii_case("max-age") {
                    // An unparsable max-age means stale.
                    cc.max_age = Some(arg.and_then(|a| a.parse().ok()).unwrap_or(0));
                }
            }
        }
        cc
    }
}

fn header_date(headers: &HeaderMap, name: &HeaderName) -> Option<SystemTime> {
    let value = headers.get(name)?.to_str().ok()?;
    httpdate::parse_http_date(value.trim()).ok()
}

#[derive(Debug, Clone)]
struct CacheEntry {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    /// Request header values the response varies on, captured at store time
    vary: Vec<(HeaderName, Vec<HeaderValue>)>,
    stored_at: SystemTime,
    last_used: u64,
}

impl CacheEntry {
    fn freshness_lifetime(&self) -> Duration {
        let cc = CacheControl::parse(&self.headers);
        if cc.no_cache {
            return Duration::ZERO;
        }
        if let Some(secs) = cc.max_age {
            return Duration::from_secs(secs);
        }
        if self.headers.contains_key(header::EXPIRES) {
            let Some(expires) = header_date(&self.headers, &header::EXPIRES) else {
                return Duration::ZERO;
            };
            let date = header_date(&self.headers, &header::DATE).unwrap_or(self.stored_at);
            return expires.duration_since(date).unwrap_or(Duration::ZERO);
        }
        Duration::ZERO
    }

    fn current_age(&self, now: SystemTime) -> Duration {
        let initial = self
            .headers
            .get(header::AGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(Duration::ZERO, Duration::from_secs);
        initial + now.duration_since(self.stored_at).unwrap_or(Duration::ZERO)
    }

    fn is_fresh(&self, now: SystemTime) -> bool {
        self.current_age(now) < self.freshness_lifetime()
    }

    fn has_validators(&self) -> bool {
        self.headers.contains_key(header::ETAG) || self.headers.contains_key(header::LAST_MODIFIED)
    }

    fn add_validators(&self, headers: &mut HeaderMap) {
        if let Some(etag) = self.headers.get(header::ETAG) {
            headers.insert(header::IF_NONE_MATCH, etag.clone());
        }
        if let Some(last_modified) = self.headers.get(header::LAST_MODIFIED) {
            headers.insert(header::IF_MODIFIED_SINCE, last_modified.clone());
        }
    }

    fn matches_vary(&self, request_headers: &HeaderMap) -> bool {
        self.vary
            .iter()
            .all(|(name, values)| request_headers.get_all(name).iter().eq(values.iter()))
    }

    /// Fold the headers of a `304` into the stored response.
    fn merge_not_modified(&mut self, fresh: &HeaderMap, now: SystemTime) {
        for name in fresh.keys() {
            if *name == header::CONTENT_LENGTH || *name == header::TRANSFER_ENCODING {
                continue;
            }
            self.headers.remove(name);
            for value in fresh.get_all(name) {
                self.headers.append(name.clone(), value.clone());
            }
        }
        self.stored_at = now;
    }

    fn to_response(&self, status: CacheStatus) -> Response<CachedBody> {
        let mut response = Response::new(full_body(self.body.clone()));
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers.clone();
        response.extensions_mut().insert(status);
        response
    }
}

/// Capture the request values named by `Vary`. `None` means not storable.
fn vary_fields(
    response_headers: &HeaderMap,
    request_headers: &HeaderMap,
) -> Option<Vec<(HeaderName, Vec<HeaderValue>)>> {
    let mut fields = Vec::new();
    for value in response_headers.get_all(header::VARY) {
        for name in value.to_str().ok()?.split(',').map(str::trim) {
            if name.is_empty() {
                continue;
            }
            if name == "*" {
                return None;
            }
            let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
            let values = request_headers.get_all(&name).iter().cloned().collect();
            fields.push((name, values));
        }
    }
    Some(fields)
}

#[derive(Debug)]
struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    size_bytes: usize,
    max_size_bytes: usize,
    clock: u64,
}

impl CacheStore {
    fn get(&mut self, key: &str) -> Option<CacheEntry> {
        self.clock += 1;
        let entry = self.entries.get_mut(key)?;
        entry.last_used = self.clock;
        Some(entry.clone())
    }

    fn insert(&mut self, key: String, mut entry: CacheEntry) {
        self.remove(&key);
        let size = entry.body.len();
        if size > self.max_size_bytes {
            return;
        }

        while self.size_bytes + size > self.max_size_bytes {
            let Some(lru) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            tracing::trace!(url = %lru, "evicting least recently used cache entry");
            self.remove(&lru);
        }

        self.clock += 1;
        entry.last_used = self.clock;
        self.size_bytes += size;
        self.entries.insert(key, entry);
    }

    fn remove(&mut self, key: &str) {
        if let Some(old) = self.entries.remove(key) {
            self.size_bytes -= old.body.len();
        }
    }
}

/// Shared handle to a response cache.
///
/// Clones share the same storage.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    store: Arc<Mutex<CacheStore>>,
}

impl ResponseCache {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            store: Arc::new(Mutex::new(CacheStore {
                entries: HashMap::new(),
                size_bytes: 0,
                max_size_bytes: config.max_size_bytes,
                clock: 0,
            })),
        }
    }

    /// Number of stored responses
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of stored body sizes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.store.lock().size_bytes
    }

    /// Drop every stored response
    pub fn clear(&self) {
        let mut store = self.store.lock();
        store.entries.clear();
        store.size_bytes = 0;
    }

    fn max_size_bytes(&self) -> usize {
        self.store.lock().max_size_bytes
    }

    fn lookup(&self, key: &str, request_headers: &HeaderMap) -> Option<CacheEntry> {
        let entry = self.store.lock().get(key)?;
        entry.matches_vary(request_headers).then_some(entry)
    }

    fn insert(&self, key: String, entry: CacheEntry) {
        self.store.lock().insert(key, entry);
    }

    /// Drop the response stored for `url`.
    ///
    /// Entries are keyed by the URL each hop was requested with, so pass the
    /// final URL of a redirected response
    /// ([`HttpResponse::url`](crate::HttpResponse::url)). Use this when a
    /// stored body turns out to be unusable, so the next call goes to the
    /// origin instead of replaying it.
    pub fn invalidate(&self, url: &str) {
        let mut store = self.store.lock();
        if store.entries.contains_key(url) {
            tracing::debug!(url, "dropping cached response");
        }
        store.remove(url);
    }

    async fn handle<S, ReqBody, ResBody>(
        &self,
        mut inner: S,
        mut req: Request<ReqBody>,
    ) -> Result<Response<CachedBody>, BoxError>
    where
        S: Service<Request<ReqBody>, Response = Response<ResBody>>,
        S::Error: Into<BoxError>,
        ResBody: Body<Data = Bytes> + Send + Sync + 'static,
        ResBody::Error: Into<BoxError>,
    {
        let key = req.uri().to_string();
        let request_cc = CacheControl::parse(req.headers());
        let force_revalidate = request_cc.no_cache || request_cc.max_age == Some(0);
        let request_headers = req.headers().clone();

        let cached = self.lookup(&key, req.headers());
        if let Some(entry) = &cached {
            if !force_revalidate && entry.is_fresh(SystemTime::now()) {
                tracing::debug!(url = %key, "serving fresh response from cache");
                return Ok(entry.to_response(CacheStatus::Hit));
            }
            entry.add_validators(req.headers_mut());
        }

        let response = inner.call(req).await.map_err(Into::into)?;

        if response.status() == StatusCode::NOT_MODIFIED {
            if let Some(mut entry) = cached.filter(CacheEntry::has_validators) {
                entry.merge_not_modified(response.headers(), SystemTime::now());
                self.insert(key.clone(), entry.clone());
                tracing::debug!(url = %key, "cached response revalidated");
                return Ok(entry.to_response(CacheStatus::Revalidated));
            }
            return Ok(passthrough(response, CacheStatus::Miss));
        }

        self.store_response(key, &request_headers, response).await
    }

    async fn store_response<B>(
        &self,
        key: String,
        request_headers: &HeaderMap,
        response: Response<B>,
    ) -> Result<Response<CachedBody>, BoxError>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        if response.status() != StatusCode::OK {
            return Ok(passthrough(response, CacheStatus::Miss));
        }
        let vary = vary_fields(response.headers(), request_headers)
            .filter(|_| !CacheControl::parse(response.headers()).no_store);
        let Some(vary) = vary else {
            self.invalidate(&key);
            return Ok(passthrough(response, CacheStatus::Miss));
        };

        let (mut parts, body) = response.into_parts();
        parts.extensions.insert(CacheStatus::Miss);

        match buffer_body(body, self.max_size_bytes()).await? {
            Buffered::Complete(bytes) => {
                let entry = CacheEntry {
                    status: parts.status,
                    version: parts.version,
                    headers: parts.headers.clone(),
                    body: bytes.clone(),
                    vary,
                    stored_at: SystemTime::now(),
                    last_used: 0,
                };
                if entry.freshness_lifetime() > Duration::ZERO || entry.has_validators() {
                    tracing::debug!(url = %key, size = bytes.len(), "stored response in cache");
                    self.insert(key, entry);
                } else {
                    self.invalidate(&key);
                }
                Ok(Response::from_parts(parts, full_body(bytes)))
            }
            Buffered::Overflow { prefix, rest } => {
                tracing::debug!(url = %key, "response too large to cache");
                self.invalidate(&key);
                let body = PrefixedBody {
                    prefix: Some(prefix),
                    rest,
                };
                Ok(Response::from_parts(parts, body.boxed()))
            }
        }
    }
}

fn full_body(bytes: Bytes) -> CachedBody {
    Full::new(bytes)
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed()
}

fn passthrough<B>(response: Response<B>, status: CacheStatus) -> Response<CachedBody>
where
    B: Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let (mut parts, body) = response.into_parts();
    parts.extensions.insert(status);
    Response::from_parts(parts, body.map_err(Into::into).boxed())
}

enum Buffered<B> {
    Complete(Bytes),
    Overflow { prefix: Bytes, rest: Pin<Box<B>> },
}

/// Read `body` into memory, stopping as soon as it exceeds `limit`.
async fn buffer_body<B>(body: B, limit: usize) -> Result<Buffered<B>, BoxError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let mut body = Box::pin(body);
    if body.size_hint().lower() > limit as u64 {
        return Ok(Buffered::Overflow {
            prefix: Bytes::new(),
            rest: body,
        });
    }

    let mut buf = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(Into::<BoxError>::into)?;
        if let Ok(data) = frame.into_data() {
            buf.extend_from_slice(&data);
            if buf.len() > limit {
                return Ok(Buffered::Overflow {
                    prefix: buf.freeze(),
                    rest: body,
                });
            }
        }
    }
    Ok(Buffered::Complete(buf.freeze()))
}

/// Replays an already-read prefix, then streams the rest of the body.
struct PrefixedBody<B> {
    prefix: Option<Bytes>,
    rest: Pin<Box<B>>,
}

impl<B> Body for PrefixedBody<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if let Some(prefix) = this.prefix.take().filter(|p| !p.is_empty()) {
            return Poll::Ready(Some(Ok(Frame::data(prefix))));
        }
        this.rest.as_mut().poll_frame(cx).map_err(Into::into)
    }

    fn is_end_stream(&self) -> bool {
        self.prefix.as_ref().is_none_or(Bytes::is_empty) && self.rest.is_end_stream()
    }
}

/// Tower layer backed by a [`ResponseCache`].
///
/// With no cache every response is marked [`CacheStatus::Bypass`].
#[derive(Debug, Clone)]
pub struct ResponseCacheLayer {
    cache: Option<ResponseCache>,
}

impl ResponseCacheLayer {
    #[must_use]
    pub fn new(cache: Option<ResponseCache>) -> Self {
        Self { cache }
    }
}

impl<S> Layer<S> for ResponseCacheLayer {
    type Service = ResponseCacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResponseCacheService {
            inner,
            cache: self.cache.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseCacheService<S> {
    inner: S,
    cache: Option<ResponseCache>,
}

fn is_cacheable_request<B>(req: &Request<B>) -> bool {
    req.method() == Method::GET
        && !CALLER_CONDITIONALS
            .iter()
            .any(|name| req.headers().contains_key(name))
        && !CacheControl::parse(req.headers()).no_store
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ResponseCacheService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    ReqBody: Send + 'static,
    ResBody: Body<Data = Bytes> + Send + Sync + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<CachedBody>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Keep the service that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let cache = self.cache.clone().filter(|_| is_cacheable_request(&req));
        Box::pin(async move {
            match cache {
                Some(cache) => cache.handle(inner, req).await,
                None => {
                    let response = inner.call(req).await.map_err(Into::into)?;
                    Ok(passthrough(response, CacheStatus::Bypass))
                }
            }
        })
    }
}
