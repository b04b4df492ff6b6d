use crate::config::ToggleFetcherConfig;
use crate::errors::FetchError;
use crate::headers::{CustomHeadersProvider, HeaderSources, NoCustomHeaders};
use crate::models::ToggleCollection;
use crate::result::FetchResult;
use crate::urls::{EndpointUrls, FetchFilters};
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use toggle_http::{CacheConfig, HttpClient, HttpError, HttpResponse, ProxyConfig};
use url::Url;

/// Fetches the current toggle state from a server.
///
/// One call is one request; polling cadence and retries belong to the
/// caller.
#[async_trait]
pub trait ToggleFetcher: Send + Sync {
    /// # Errors
    /// [`FetchError::Transport`] when no response was received in time.
    async fn fetch(&self) -> Result<FetchResult, FetchError>;
}

/// [`ToggleFetcher`] over HTTP with a local response cache.
///
/// Cheap to share behind an `Arc`; concurrent fetches reuse one connection
/// pool and one cache.
///
/// ```ignore
/// let fetcher = HttpToggleFetcher::builder(ToggleFetcherConfig::new(
///     "https://toggles.example.com/api",
///     "billing",
/// ))
/// .custom_headers_provider(|| vec![("Authorization".to_owned(), token())])
/// .build()?;
///
/// match fetcher.fetch().await? {
///     FetchResult::Changed(toggles) => store.replace(toggles),
///     FetchResult::NotModified { .. } => {}
///     FetchResult::Unavailable { status, .. } => tracing::warn!(status, "toggles unavailable"),
/// }
/// ```
#[derive(Debug, Clone)]
pub struct HttpToggleFetcher {
    client: HttpClient,
    endpoints: EndpointUrls,
    features_url: Url,
    headers: HeaderSources,
    call_timeout: Duration,
}

impl HttpToggleFetcher {
    /// Fetcher without dynamic headers
    ///
    /// # Errors
    /// `InvalidConfiguration`, see [`HttpToggleFetcherBuilder::build`].
    pub fn new(config: ToggleFetcherConfig) -> Result<Self, FetchError> {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn builder(config: ToggleFetcherConfig) -> HttpToggleFetcherBuilder {
        HttpToggleFetcherBuilder {
            config,
            provider: Arc::new(NoCustomHeaders),
        }
    }

    /// Features URL with the configured filters applied
    #[must_use]
    pub fn features_url(&self) -> &Url {
        &self.features_url
    }

    #[must_use]
    pub fn endpoints(&self) -> &EndpointUrls {
        &self.endpoints
    }

    /// Transport shared by all clones of this fetcher
    #[must_use]
    pub fn http_client(&self) -> &HttpClient {
        &self.client
    }

    async fn fetch_once(&self) -> Result<FetchResult, HttpError> {
        let response = self
            .client
            .get(self.features_url.as_str())
            .headers(self.headers.assemble())
            .send()
            .await?;
        self.classify(response).await
    }

    async fn classify(&self, response: HttpResponse) -> Result<FetchResult, HttpError> {
        let status = response.status();

        if status.is_success() {
            if response.is_from_cache() {
                tracing::debug!(
                    status = status.as_u16(),
                    cache = ?response.cache_status(),
                    "toggles unchanged, served from local cache"
                );
                return Ok(FetchResult::NotModified { status: 304 });
            }

            let location = self.response_location(&response);
            let cache_key = response.url().to_string();
            return match response.json::<ToggleCollection>().await {
                Ok(collection) => {
                    tracing::debug!(
                        features = collection.features.len(),
                        version = collection.version,
                        "fetched new toggles"
                    );
                    Ok(FetchResult::Changed(collection))
                }
                Err(e @ (HttpError::Json(_) | HttpError::BodyTooLarge { .. })) => {
                    tracing::warn!(
                        status = status.as_u16(),
                        location = %location,
                        error = %e,
                        "toggle payload could not be parsed"
                    );
                    // A stored copy would turn the next fetch into NotModified.
                    if let Some(cache) = self.client.cache() {
                        cache.invalidate(&cache_key);
                    }
                    Ok(FetchResult::Unavailable {
                        status: status.as_u16(),
                        location: Some(location),
                    })
                }
                Err(e) => Err(e),
            };
        }

        let status = status.as_u16();
        if (301..=304).contains(&status) {
            tracing::debug!(status, "toggles not modified");
            Ok(FetchResult::NotModified { status })
        } else {
            tracing::debug!(status, "toggle server returned an unusable status");
            Ok(FetchResult::Unavailable {
                status,
                location: None,
            })
        }
    }

    /// URL of the last redirect hop, or the requested URL
    fn response_location(&self, response: &HttpResponse) -> Url {
        Url::parse(&response.url().to_string()).unwrap_or_else(|_| self.features_url.clone())
    }
}

#[async_trait]
impl ToggleFetcher for HttpToggleFetcher {
    async fn fetch(&self) -> Result<FetchResult, FetchError> {
        match tokio::time::timeout(self.call_timeout, self.fetch_once()).await {
            Ok(result) => result.map_err(FetchError::from),
            Err(_) => {
                tracing::debug!(
                    url = %self.features_url,
                    timeout = ?self.call_timeout,
                    "fetch timed out"
                );
                Err(HttpError::Timeout(self.call_timeout).into())
            }
        }
    }
}

/// Builder for [`HttpToggleFetcher`]
#[must_use]
pub struct HttpToggleFetcherBuilder {
    config: ToggleFetcherConfig,
    provider: Arc<dyn CustomHeadersProvider>,
}

impl HttpToggleFetcherBuilder {
    /// Headers re-evaluated on every fetch and sent after the static ones
    pub fn custom_headers_provider(
        mut self,
        provider: impl CustomHeadersProvider + 'static,
    ) -> Self {
        self.provider = Arc::new(provider);
        self
    }

    /// Append a static header
    pub fn custom_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.custom_headers.push((name.into(), value.into()));
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Refuse plain `http://` API URLs
    pub fn tls_only(mut self) -> Self {
        self.config.tls_only = true;
        self
    }

    /// Validate the configuration and build the transport.
    ///
    /// # Errors
    /// `InvalidConfiguration` when the API URL is not an absolute http(s)
    /// URL, the app name or instance id is empty, a static header is not a
    /// valid HTTP header, the URL is plain HTTP while `tls_only` is set, or
    /// the transport cannot be built (bad proxy, TLS setup).
    pub fn build(self) -> Result<HttpToggleFetcher, FetchError> {
        let config = self.config;

        if config.app_name.trim().is_empty() {
            return Err(FetchError::invalid_configuration("app name must not be empty"));
        }
        if config.instance_id.trim().is_empty() {
            return Err(FetchError::invalid_configuration("instance id must not be empty"));
        }

        let endpoints = EndpointUrls::new(&config.api_url)?;
        let plain_http = endpoints.features_url().scheme() == "http";
        if plain_http && config.tls_only {
            return Err(FetchError::invalid_configuration(format!(
                "API URL '{}' uses plain http but tls_only is set",
                config.api_url
            )));
        }
        validate_static_headers(&config)?;

        let filters = FetchFilters::new(config.project_name.clone(), config.name_prefix.clone());
        let features_url = endpoints.features_url_with(&filters);

        let client = build_http_client(&config, plain_http).map_err(|e| {
            FetchError::invalid_configuration(format!("failed to build HTTP client: {e}"))
        })?;

        tracing::debug!(
            url = %features_url,
            app_name = %config.app_name,
            cache = config.cache.enabled,
            proxy = config.proxy.is_some(),
            "toggle fetcher ready"
        );

        Ok(HttpToggleFetcher {
            client,
            endpoints,
            features_url,
            headers: HeaderSources::new(
                config.app_name,
                config.instance_id,
                config.custom_headers,
                self.provider,
            ),
            call_timeout: config.call_timeout,
        })
    }
}

fn validate_static_headers(config: &ToggleFetcherConfig) -> Result<(), FetchError> {
    let identity = [
        ("app name", config.app_name.as_str()),
        ("instance id", config.instance_id.as_str()),
    ];
    for (what, value) in identity {
        HeaderValue::from_str(value).map_err(|e| {
            FetchError::invalid_configuration(format!("{what} is not a valid header value: {e}"))
        })?;
    }

    for (name, value) in &config.custom_headers {
        HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            FetchError::invalid_configuration(format!("custom header name '{name}': {e}"))
        })?;
        HeaderValue::from_str(value).map_err(|e| {
            FetchError::invalid_configuration(format!("custom header '{name}' value: {e}"))
        })?;
    }
    Ok(())
}

/// The transport only speaks plain HTTP when the API URL itself does; an
/// `https` base never follows a redirect down to `http`.
fn build_http_client(
    config: &ToggleFetcherConfig,
    plain_http: bool,
) -> Result<HttpClient, HttpError> {
    let mut builder = HttpClient::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.call_timeout)
        .max_body_size(config.max_body_size)
        .max_redirects(config.max_redirects)
        .user_agent(config.app_name.clone());

    if plain_http {
        builder = builder.allow_insecure_http();
    }
    if let Some(proxy) = &config.proxy {
        builder = builder.proxy(ProxyConfig::from(proxy));
    }
    builder = if config.cache.enabled {
        builder.cache(CacheConfig {
            max_size_bytes: config.cache.max_size_bytes,
        })
    } else {
        builder.no_cache()
    };

    builder.build()
}
