use crate::error::HttpError;
use http::{HeaderValue, Request, Response, header};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Fills in headers every outgoing request needs.
///
/// - `User-Agent` when the caller did not set one
/// - `Proxy-Authorization` on plain-HTTP requests when a proxy with
///   credentials is configured (HTTPS requests authenticate in the `CONNECT`
///   handshake instead)
///
/// Sits below the redirect layer so each hop gets the same treatment.
#[derive(Clone, Debug)]
pub struct DefaultHeadersLayer {
    user_agent: HeaderValue,
    proxy_authorization: Option<HeaderValue>,
}

impl DefaultHeadersLayer {
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if the user agent string is not a
    /// valid header value
    pub fn try_new(user_agent: impl AsRef<str>) -> Result<Self, HttpError> {
        let user_agent =
            HeaderValue::from_str(user_agent.as_ref()).map_err(HttpError::InvalidHeaderValue)?;
        Ok(Self {
            user_agent,
            proxy_authorization: None,
        })
    }

    #[must_use]
    pub fn with_proxy_authorization(mut self, value: Option<HeaderValue>) -> Self {
        self.proxy_authorization = value;
        self
    }
}

impl<S> Layer<S> for DefaultHeadersLayer {
    type Service = DefaultHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DefaultHeadersService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DefaultHeadersService<S> {
    inner: S,
    layer: DefaultHeadersLayer,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for DefaultHeadersService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let plain_http = req.uri().scheme_str() == Some("http");
        let headers = req.headers_mut();

        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(header::USER_AGENT, self.layer.user_agent.clone());
        }
        if let Some(auth) = &self.layer.proxy_authorization {
            if plain_http {
                headers.insert(header::PROXY_AUTHORIZATION, auth.clone());
            } else {
                headers.remove(header::PROXY_AUTHORIZATION);
            }
        }

        self.inner.call(req)
    }
}
