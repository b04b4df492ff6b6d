#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Feature-toggle fetch client
//!
//! Builds the endpoint URLs of a toggle server, issues one conditional GET
//! per [`ToggleFetcher::fetch`] call and classifies the outcome:
//!
//! - [`FetchResult::Changed`]: a new [`ToggleCollection`]
//! - [`FetchResult::NotModified`]: local cache hit (reported as 304) or a
//!   301-304 from the server
//! - [`FetchResult::Unavailable`]: any other status, or a success status
//!   whose payload could not be parsed
//!
//! Only failures to get a response at all are errors
//! ([`FetchError::Transport`]). Polling and retries are up to the caller.
//!
//! ```ignore
//! use toggle_fetcher::{FetchResult, HttpToggleFetcher, ToggleFetcher, ToggleFetcherConfig};
//!
//! let fetcher = HttpToggleFetcher::new(ToggleFetcherConfig::new(
//!     "https://toggles.example.com/api",
//!     "billing",
//! ))?;
//! if let FetchResult::Changed(toggles) = fetcher.fetch().await? {
//!     println!("{} toggles", toggles.features.len());
//! }
//! ```

pub mod config;
pub mod errors;
pub mod fetcher;
pub mod headers;
pub mod models;
pub mod result;
pub mod urls;

pub use config::{CacheSettings, ProxySettings, ToggleFetcherConfig};
pub use errors::FetchError;
pub use fetcher::{HttpToggleFetcher, HttpToggleFetcherBuilder, ToggleFetcher};
pub use headers::{APP_NAME_HEADER, CustomHeadersProvider, INSTANCE_ID_HEADER, NoCustomHeaders};
pub use models::{FeatureToggle, ToggleCollection};
pub use result::FetchResult;
pub use urls::{EndpointUrls, FetchFilters};
