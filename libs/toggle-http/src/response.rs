use crate::error::HttpError;
use crate::layers::CacheStatus;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode, Uri};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use tower_http::follow_redirect::RequestUri;

/// Boxed response body after the cache and decompression layers.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// HTTP response with body-reading helpers.
///
/// Statuses are not checked: a 500 is a successful exchange at this level.
/// All body reads enforce the configured `max_body_size` limit on
/// decompressed bytes.
#[derive(Debug)]
pub struct HttpResponse {
    pub(crate) inner: Response<ResponseBody>,
    pub(crate) max_body_size: usize,
    pub(crate) request_url: Uri,
}

impl HttpResponse {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// URL the response was finally served from.
    ///
    /// Differs from the requested URL when redirects were followed.
    #[must_use]
    pub fn url(&self) -> &Uri {
        self.inner
            .extensions()
            .get::<RequestUri>()
            .map_or(&self.request_url, |uri| &uri.0)
    }

    /// How the local cache took part in producing this response.
    #[must_use]
    pub fn cache_status(&self) -> CacheStatus {
        self.inner
            .extensions()
            .get::<CacheStatus>()
            .copied()
            .unwrap_or(CacheStatus::Bypass)
    }

    /// Whether the body was served from the local cache, with or without
    /// revalidation against the origin.
    #[must_use]
    pub fn is_from_cache(&self) -> bool {
        self.cache_status().is_from_cache()
    }

    /// Read the body as bytes.
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if the body exceeds the limit, or
    /// `HttpError::Transport` if the stream fails.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        read_body_limited(self.inner, self.max_body_size).await
    }

    /// Read and deserialize a JSON body.
    ///
    /// # Errors
    /// Same as [`bytes`](Self::bytes), plus `HttpError::Json` if parsing fails.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let body = self.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Collect a response body, failing once it grows past `limit` bytes.
async fn read_body_limited(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<Bytes, HttpError> {
    let (_parts, body) = response.into_parts();

    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http_body_util::Full;

    fn response_with(body: &'static str) -> Response<ResponseBody> {
        let body = Full::new(Bytes::from_static(body.as_bytes()))
            .map_err(|never| match never {})
            .boxed();
        Response::new(body)
    }

    fn wrap(inner: Response<ResponseBody>, limit: usize) -> HttpResponse {
        HttpResponse {
            inner,
            max_body_size: limit,
            request_url: Uri::from_static("http://toggles.local/api/client/features"),
        }
    }

    #[tokio::test]
    async fn test_read_body_within_limit() {
        let bytes = read_body_limited(response_with("hello"), 5).await.unwrap();
        assert_eq!(bytes, "hello");
    }

    #[tokio::test]
    async fn test_read_body_over_limit() {
        let err = read_body_limited(response_with("hello world"), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { limit: 5, actual: 11 }));
    }

    #[tokio::test]
    async fn test_json_parse_error() {
        let err = wrap(response_with("{not json"), 1024)
            .json::<serde_json::Value>()
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Json(_)));
    }

    #[test]
    fn test_url_falls_back_to_request_url() {
        let response = wrap(response_with(""), 16);
        assert_eq!(response.url(), "http://toggles.local/api/client/features");
    }

    #[test]
    fn test_url_prefers_final_redirect_target() {
        let mut inner = response_with("");
        inner
            .extensions_mut()
            .insert(RequestUri(Uri::from_static("http://cdn.local/features.json")));
        assert_eq!(wrap(inner, 16).url(), "http://cdn.local/features.json");
    }

    #[test]
    fn test_cache_status_defaults_to_bypass() {
        let response = wrap(response_with(""), 16);
        assert_eq!(response.cache_status(), CacheStatus::Bypass);
        assert!(!response.is_from_cache());

        let mut inner = response_with("");
        inner.extensions_mut().insert(CacheStatus::Revalidated);
        assert!(wrap(inner, 16).is_from_cache());
    }
}
