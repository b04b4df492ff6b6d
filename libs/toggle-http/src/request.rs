use crate::client::{BufferedService, acquire_buffer_slot, map_buffer_error};
use crate::config::TransportSecurity;
use crate::error::{HttpError, InvalidUriKind};
use crate::response::HttpResponse;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Method, Request, Uri};
use http_body_util::Full;
use std::time::Duration;
use tower::Service;

/// GET request builder.
///
/// Created by [`HttpClient::get`](crate::HttpClient::get). Headers are
/// appended in the order given; adding the same name twice sends it twice.
///
/// ```ignore
/// let resp = client
///     .get("https://toggles.example.com/api/client/features")
///     .header("UNLEASH-APPNAME", "billing")
///     .send()
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    service: BufferedService,
    max_body_size: usize,
    call_timeout: Duration,
    url: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    /// First invalid header, reported by `send()`
    error: Option<HttpError>,
    transport_security: TransportSecurity,
}

impl RequestBuilder {
    pub(crate) fn new(
        service: BufferedService,
        max_body_size: usize,
        call_timeout: Duration,
        url: String,
        transport_security: TransportSecurity,
    ) -> Self {
        Self {
            service,
            max_body_size,
            call_timeout,
            url,
            headers: Vec::new(),
            error: None,
            transport_security,
        }
    }

    /// Append one header
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.push_header(name, value);
        self
    }

    /// Append headers in iteration order
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            if self.error.is_some() {
                break;
            }
            self.push_header(name.as_ref(), value.as_ref());
        }
        self
    }

    fn push_header(&mut self, name: &str, value: &str) {
        if self.error.is_some() {
            return;
        }
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => self.headers.push((name, value)),
            (Err(e), _) => self.error = Some(HttpError::InvalidHeaderName(e)),
            (_, Err(e)) => self.error = Some(HttpError::InvalidHeaderValue(e)),
        }
    }

    /// Absolute URL whose scheme the transport mode permits
    fn target_uri(&self) -> Result<Uri, HttpError> {
        let invalid = |kind, reason: &str| HttpError::InvalidUri {
            url: self.url.clone(),
            kind,
            reason: reason.to_owned(),
        };

        let uri = self
            .url
            .parse::<Uri>()
            .map_err(|e| invalid(InvalidUriKind::ParseError, &e.to_string()))?;
        if uri.host().is_none() {
            return Err(invalid(InvalidUriKind::MissingAuthority, "no host in URL"));
        }

        let scheme = uri
            .scheme_str()
            .ok_or_else(|| invalid(InvalidUriKind::MissingScheme, "no scheme in URL"))?;
        let allowed = match scheme {
            "https" => true,
            "http" => self.transport_security == TransportSecurity::AllowInsecureHttp,
            _ => {
                return Err(HttpError::InvalidScheme {
                    scheme: scheme.to_owned(),
                    reason: "only http and https are supported".to_owned(),
                });
            }
        };
        if !allowed {
            return Err(HttpError::InvalidScheme {
                scheme: scheme.to_owned(),
                reason: "plain http needs AllowInsecureHttp".to_owned(),
            });
        }
        Ok(uri)
    }

    /// Send the request and wait for the response head.
    ///
    /// # Errors
    /// Bad headers or URL are reported before anything is sent. After that,
    /// `Transport`, `Tls` and `Timeout` cover failures on the wire; waiting
    /// longer than the call timeout for a queue slot is also `Timeout`. A 4xx
    /// or 5xx is a response, not an error.
    pub async fn send(mut self) -> Result<HttpResponse, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let uri = self.target_uri()?;

        let mut builder = Request::builder().method(Method::GET).uri(uri.clone());
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }
        let request = builder.body(Full::new(Bytes::new()))?;

        acquire_buffer_slot(&mut self.service, self.call_timeout).await?;

        tracing::trace!(url = %uri, "sending request");
        let inner = self.service.call(request).await.map_err(map_buffer_error)?;

        Ok(HttpResponse {
            inner,
            max_body_size: self.max_body_size,
            request_url: uri,
        })
    }
}
