//! Tower layers composed by [`HttpClientBuilder`](crate::HttpClientBuilder)
//!
//! - [`DefaultHeadersLayer`] - `User-Agent` and proxy credentials
//! - [`ResponseCacheLayer`] - private in-memory response cache
//! - [`SecureRedirectPolicy`] - redirect policy for `FollowRedirectLayer`

mod cache;
mod default_headers;
mod redirect;

pub use cache::{CacheStatus, CachedBody, ResponseCache, ResponseCacheLayer, ResponseCacheService};
pub use default_headers::{DefaultHeadersLayer, DefaultHeadersService};
pub use redirect::SecureRedirectPolicy;
