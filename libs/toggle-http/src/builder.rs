use crate::config::{CacheConfig, HttpClientConfig, ProxyConfig, TransportSecurity};
use crate::error::HttpError;
use crate::layers::{DefaultHeadersLayer, ResponseCache, ResponseCacheLayer, SecureRedirectPolicy};
use crate::proxy::{ProxyConnector, ProxyTarget};
use crate::response::ResponseBody;
use bytes::Bytes;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::sync::Arc;
use std::time::Duration;
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;
use tower_http::follow_redirect::FollowRedirectLayer;

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 32;

/// Builder for an [`HttpClient`](crate::HttpClient).
pub struct HttpClientBuilder {
    pub(crate) config: HttpClientConfig,
}

impl HttpClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: HttpClientConfig::default(),
        }
    }

    /// TCP connect timeout
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Deadline for one call, redirects and revalidation included
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Maximum response body size, applied after decompression
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Allow plain `http://` URLs
    #[must_use]
    pub fn allow_insecure_http(mut self) -> Self {
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Redirect hop limit; `0` returns 3xx responses to the caller
    #[must_use]
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.config.max_redirects = max_redirects;
        self
    }

    /// Route all traffic through a forward proxy
    #[must_use]
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = Some(cache);
        self
    }

    /// Disable the response cache
    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.config.cache = None;
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// - `HttpError::Tls` when rustls cannot be set up with the crypto provider
    /// - `HttpError::InvalidProxy` when the proxy URL is unusable
    /// - `HttpError::InvalidHeaderValue` for an invalid user agent
    pub fn build(self) -> Result<crate::HttpClient, HttpError> {
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 plain http:// endpoints will be contacted without TLS"
            );
        }

        let call_timeout = self.config.call_timeout;

        let proxy = self
            .config
            .proxy
            .as_ref()
            .map(ProxyTarget::from_config)
            .transpose()?;
        if let Some(proxy) = &proxy {
            tracing::debug!(proxy = %proxy.uri(), "routing requests through forward proxy");
        }
        let proxy_authorization = proxy.as_ref().and_then(|p| p.authorization().cloned());

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(self.config.connect_timeout));
        let connector = ProxyConnector::new(http, proxy);

        let https = build_https_connector(self.config.transport, connector)?;

        let mut client_builder = Client::builder(TokioExecutor::new());
        // pool_idle_timeout needs a timer to take effect
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .http2_only(false);
        let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

        let headers_layer = DefaultHeadersLayer::try_new(&self.config.user_agent)?
            .with_proxy_authorization(proxy_authorization);
        let cache = self.config.cache.as_ref().map(ResponseCache::new);
        let redirect_policy = SecureRedirectPolicy::new(self.config.max_redirects);

        // Request flow (outer → inner):
        //   Buffer → Timeout → Decompression → FollowRedirect →
        //   DefaultHeaders → ResponseCache → hyper_client
        //
        // The cache stores bodies as received, still compressed. Each
        // redirect hop is looked up in the cache on its own URL.
        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(call_timeout))
            .layer(DecompressionLayer::new())
            .layer(FollowRedirectLayer::with_policy(redirect_policy))
            .layer(headers_layer)
            .layer(ResponseCacheLayer::new(cache.clone()))
            .service(hyper_client);

        let service = service
            .map_response(map_decompression_response)
            .map_err(move |e: tower::BoxError| map_tower_error(e, call_timeout));

        let buffered_service: crate::client::BufferedService =
            Buffer::new(service.boxed_clone(), self.config.buffer_capacity.max(1));

        Ok(crate::HttpClient {
            service: buffered_service,
            max_body_size: self.config.max_body_size,
            call_timeout,
            transport_security: self.config.transport,
            cache,
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a tower error to `HttpError`, turning `Elapsed` into `Timeout`.
fn map_tower_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }

    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::from_connection_error(other),
    }
}

fn map_decompression_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    let boxed_body: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed_body)
}

/// Process-wide rustls provider when one is installed, else aws-lc-rs
/// without installing it globally.
fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Wrap the proxy-aware connector in TLS trusting the Mozilla (webpki) roots.
///
/// HTTP/2 is negotiated through ALPN when the server offers it.
fn build_https_connector(
    transport: TransportSecurity,
    connector: ProxyConnector,
) -> Result<HttpsConnector<ProxyConnector>, HttpError> {
    let builder = hyper_rustls::HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(crypto_provider())
        .map_err(|e| HttpError::Tls(Box::new(e)))?;

    let connector = if transport == TransportSecurity::AllowInsecureHttp {
        builder
            .https_or_http()
            .enable_all_versions()
            .wrap_connector(connector)
    } else {
        builder
            .https_only()
            .enable_all_versions()
            .wrap_connector(connector)
    };
    Ok(connector)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::DEFAULT_USER_AGENT;
    use secrecy::SecretString;

    #[test]
    fn test_builder_defaults() {
        let builder = HttpClientBuilder::new();
        assert_eq!(builder.config.connect_timeout, Duration::from_secs(10));
        assert_eq!(builder.config.call_timeout, Duration::from_secs(5));
        assert_eq!(builder.config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(builder.config.transport, TransportSecurity::TlsOnly);
        assert!(builder.config.cache.is_some());
    }

    #[test]
    fn test_builder_setters() {
        let builder = HttpClientBuilder::new()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_millis(750))
            .max_redirects(3)
            .allow_insecure_http()
            .no_cache();
        assert_eq!(builder.config.connect_timeout, Duration::from_secs(2));
        assert_eq!(builder.config.call_timeout, Duration::from_millis(750));
        assert_eq!(builder.config.max_redirects, 3);
        assert_eq!(builder.config.transport, TransportSecurity::AllowInsecureHttp);
        assert!(builder.config.cache.is_none());
    }

    #[tokio::test]
    async fn test_builder_build_default_webpki() {
        assert!(HttpClientBuilder::new().build().is_ok());
    }

    #[tokio::test]
    async fn test_builder_build_invalid_user_agent() {
        let result = HttpClientBuilder::new().user_agent("invalid\x00agent").build();
        assert!(matches!(result, Err(HttpError::InvalidHeaderValue(_))));
    }

    #[tokio::test]
    async fn test_builder_rejects_https_proxy() {
        let result = HttpClientBuilder::new()
            .proxy(ProxyConfig::new("https://proxy.local:3128"))
            .build();
        assert!(matches!(result, Err(HttpError::InvalidProxy { .. })));
    }

    #[tokio::test]
    async fn test_builder_accepts_http_proxy_with_credentials() {
        let result = HttpClientBuilder::new()
            .proxy(
                ProxyConfig::new("http://proxy.local:3128")
                    .with_basic_auth("user", SecretString::from("pw".to_owned())),
            )
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_map_tower_error_elapsed_is_timeout() {
        let err: tower::BoxError = Box::new(tower::timeout::error::Elapsed::new());
        let mapped = map_tower_error(err, Duration::from_secs(5));
        assert!(matches!(mapped, HttpError::Timeout(d) if d == Duration::from_secs(5)));
    }

    #[test]
    fn test_map_tower_error_preserves_http_error() {
        let err: tower::BoxError = Box::new(HttpError::ServiceClosed);
        assert!(matches!(
            map_tower_error(err, Duration::from_secs(5)),
            HttpError::ServiceClosed
        ));
    }

    #[test]
    fn test_map_tower_error_wraps_unknown_as_transport() {
        let err: tower::BoxError = Box::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(matches!(
            map_tower_error(err, Duration::from_secs(5)),
            HttpError::Transport(_)
        ));
    }

    #[test]
    fn test_map_tower_error_classifies_handshake_failure_as_tls() {
        let err: tower::BoxError = Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(rustls::CertificateError::Expired),
        ));
        assert!(matches!(
            map_tower_error(err, Duration::from_secs(5)),
            HttpError::Tls(_)
        ));
    }
}
