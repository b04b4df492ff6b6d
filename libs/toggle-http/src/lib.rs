#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP transport for feature-toggle clients
//!
//! A hyper-based GET client with:
//! - TLS via rustls and the Mozilla root set (HTTPS only unless plain HTTP
//!   is allowed)
//! - separate connect and call timeouts
//! - redirect following with downgrade protection, exposing the final URL
//! - forward proxies with basic auth (`CONNECT` tunnels for HTTPS)
//! - a private in-memory response cache with `ETag` / `Last-Modified`
//!   revalidation, reporting per response whether the body came from cache
//! - transparent gzip, brotli and deflate decompression
//!
//! HTTP statuses are never errors here; callers classify them.
//!
//! ```ignore
//! use toggle_http::{CacheStatus, HttpClient};
//!
//! let client = HttpClient::builder().build()?;
//! let resp = client
//!     .get("https://toggles.example.com/api/client/features")
//!     .send()
//!     .await?;
//! match resp.cache_status() {
//!     CacheStatus::Hit | CacheStatus::Revalidated => { /* unchanged */ }
//!     _ => { let body = resp.bytes().await?; }
//! }
//! ```

mod builder;
mod client;
mod config;
mod error;
mod layers;
mod proxy;
mod request;
mod response;

pub use builder::HttpClientBuilder;
pub use client::HttpClient;
pub use config::{
    CacheConfig, DEFAULT_CACHE_SIZE_BYTES, DEFAULT_CALL_TIMEOUT, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_MAX_REDIRECTS, DEFAULT_USER_AGENT, ProxyConfig, TransportSecurity,
};
pub use error::{HttpError, InvalidUriKind};
pub use layers::{
    CacheStatus, CachedBody, DefaultHeadersLayer, DefaultHeadersService, ResponseCache,
    ResponseCacheLayer, ResponseCacheService, SecureRedirectPolicy,
};
pub use request::RequestBuilder;
pub use response::{HttpResponse, ResponseBody};
