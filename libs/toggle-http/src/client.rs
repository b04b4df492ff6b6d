use crate::builder::HttpClientBuilder;
use crate::config::TransportSecurity;
use crate::error::HttpError;
use crate::layers::ResponseCache;
use crate::request::RequestBuilder;
use crate::response::ResponseBody;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tower::ServiceExt;
use tower::buffer::Buffer;

/// Future type of the inner service
pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

/// Buffered service shared by all clones of a client
pub type BufferedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// HTTP client over a tower middleware stack.
///
/// The stack applies the call timeout, follows redirects, decompresses
/// bodies, routes through the configured proxy and consults the response
/// cache. Use [`HttpClientBuilder`] to configure it.
///
/// `HttpClient` is `Clone + Send + Sync`; clones share connections and the
/// cache.
///
/// ```ignore
/// let client = HttpClient::builder()
///     .timeout(Duration::from_secs(5))
///     .build()?;
///
/// let resp = client
///     .get("https://toggles.example.com/api/client/features")
///     .header("UNLEASH-APPNAME", "billing")
///     .send()
///     .await?;
/// if resp.is_from_cache() {
///     // nothing new since the last poll
/// }
/// ```
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) service: BufferedService,
    pub(crate) max_body_size: usize,
    pub(crate) call_timeout: Duration,
    pub(crate) transport_security: TransportSecurity,
    pub(crate) cache: Option<ResponseCache>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("max_body_size", &self.max_body_size)
            .field("call_timeout", &self.call_timeout)
            .field("transport_security", &self.transport_security)
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Create a GET request builder.
    ///
    /// The URL must be absolute. Plain `http://` needs
    /// [`TransportSecurity::AllowInsecureHttp`].
    pub fn get(&self, url: &str) -> RequestBuilder {
        RequestBuilder::new(
            self.service.clone(),
            self.max_body_size,
            self.call_timeout,
            url.to_owned(),
            self.transport_security,
        )
    }

    /// The response cache, when enabled
    #[must_use]
    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }
}

/// Map buffer errors to `HttpError`.
///
/// Inner service errors come back boxed; anything else means the buffer
/// worker is gone.
pub fn map_buffer_error(err: tower::BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(err) => {
            tracing::error!(
                error = %err,
                "buffer worker closed unexpectedly; service unavailable"
            );
            HttpError::ServiceClosed
        }
    }
}

/// Wait for room in the request queue.
///
/// The wait counts against the call timeout: a caller stuck behind a full
/// queue for that long gets `HttpError::Timeout`.
pub async fn acquire_buffer_slot(
    service: &mut BufferedService,
    timeout: Duration,
) -> Result<(), HttpError> {
    match tokio::time::timeout(timeout, service.ready()).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(map_buffer_error(e)),
        Err(_) => {
            tracing::debug!(?timeout, "no request slot freed up before the call deadline");
            Err(HttpError::Timeout(timeout))
        }
    }
}
