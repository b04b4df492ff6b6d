//! Forward proxy support.
//!
//! [`ProxyConnector`] sits under the TLS connector. Plain-HTTP targets are
//! dialled through the proxy and flagged as proxied so hyper sends requests in
//! absolute form; HTTPS targets get a `CONNECT` tunnel and TLS runs inside it.

use crate::config::ProxyConfig;
use crate::error::HttpError;
use base64::{Engine as _, engine::general_purpose};
use http::{HeaderValue, Uri, uri::Scheme};
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::proxy::Tunnel;
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::rt::TokioIo;
use secrecy::ExposeSecret;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tower::{BoxError, Service, ServiceExt};

/// Validated proxy endpoint with its pre-encoded credentials.
#[derive(Clone, Debug)]
pub struct ProxyTarget {
    uri: Uri,
    authorization: Option<HeaderValue>,
}

impl ProxyTarget {
    /// Validate a [`ProxyConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::InvalidProxy`] when the URL does not parse, has no
    /// host, carries `user:pass@` credentials, or uses a scheme other than
    /// `http`.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, HttpError> {
        let invalid = |reason: &str| HttpError::InvalidProxy {
            proxy: config.url.clone(),
            reason: reason.to_owned(),
        };

        let uri: Uri = config
            .url
            .parse()
            .map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;

        match uri.scheme_str() {
            Some("http") => {}
            Some(_) => return Err(invalid("only http:// proxies are supported")),
            None => return Err(invalid("missing scheme")),
        }
        if uri.host().is_none() {
            return Err(invalid("missing host"));
        }
        // Credentials belong in `username`/`password`; userinfo in the URL
        // would otherwise be dropped silently.
        if let Some((_, host)) = uri.authority().and_then(|a| a.as_str().rsplit_once('@')) {
            return Err(HttpError::InvalidProxy {
                proxy: format!("http://[REDACTED]@{host}"),
                reason: "credentials in the proxy URL are not supported, set username and password instead"
                    .to_owned(),
            });
        }

        let authorization = match &config.username {
            Some(username) => {
                let password = config
                    .password
                    .as_ref()
                    .map_or("", |p| p.expose_secret());
                let token = general_purpose::STANDARD.encode(format!("{username}:{password}"));
                let mut value = HeaderValue::try_from(format!("Basic {token}"))?;
                value.set_sensitive(true);
                Some(value)
            }
            None => None,
        };

        Ok(Self { uri, authorization })
    }

    /// Proxy URI
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// `Proxy-Authorization` value, if credentials were configured
    #[must_use]
    pub fn authorization(&self) -> Option<&HeaderValue> {
        self.authorization.as_ref()
    }
}

/// Connector that routes through an optional forward proxy.
#[derive(Clone, Debug)]
pub struct ProxyConnector {
    http: HttpConnector,
    proxy: Option<ProxyTarget>,
}

impl ProxyConnector {
    /// Wrap an `HttpConnector`. The connector must not enforce the `http`
    /// scheme, since the TLS connector above hands it `https` URIs.
    #[must_use]
    pub fn new(http: HttpConnector, proxy: Option<ProxyTarget>) -> Self {
        Self { http, proxy }
    }
}

impl Service<Uri> for ProxyConnector {
    type Response = ProxyStream;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<ProxyStream, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.http.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let http = self.http.clone();
        let proxy = self.proxy.clone();

        Box::pin(async move {
            let Some(proxy) = proxy else {
                let io = http.oneshot(dst).await?;
                return Ok(ProxyStream::direct(io));
            };

            if dst.scheme() == Some(&Scheme::HTTPS) {
                tracing::debug!(proxy = %proxy.uri, target = %dst, "opening CONNECT tunnel");
                let mut tunnel = Tunnel::new(proxy.uri.clone(), http);
                if let Some(auth) = proxy.authorization {
                    tunnel = tunnel.with_auth(auth);
                }
                // Inside the tunnel the origin sees ordinary origin-form requests.
                let io = tunnel.oneshot(dst).await?;
                Ok(ProxyStream::direct(io))
            } else {
                tracing::debug!(proxy = %proxy.uri, target = %dst, "forwarding through proxy");
                let io = http.oneshot(proxy.uri).await?;
                Ok(ProxyStream::proxied(io))
            }
        })
    }
}

/// TCP stream that reports whether it leads to a forward proxy.
#[derive(Debug)]
pub struct ProxyStream {
    io: TokioIo<TcpStream>,
    proxied: bool,
}

impl ProxyStream {
    fn direct(io: TokioIo<TcpStream>) -> Self {
        Self { io, proxied: false }
    }

    fn proxied(io: TokioIo<TcpStream>) -> Self {
        Self { io, proxied: true }
    }
}

impl Connection for ProxyStream {
    fn connected(&self) -> Connected {
        let connected = self.io.connected();
        if self.proxied {
            connected.proxy(true)
        } else {
            connected
        }
    }
}

impl Read for ProxyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_read(cx, buf)
    }
}

impl Write for ProxyStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.io.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write_vectored(cx, bufs)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn test_proxy_target_accepts_http() {
        let target = ProxyTarget::from_config(&ProxyConfig::new("http://proxy.local:3128")).unwrap();
        assert_eq!(target.uri().host(), Some("proxy.local"));
        assert_eq!(target.uri().port_u16(), Some(3128));
        assert!(target.authorization().is_none());
    }

    #[test]
    fn test_proxy_target_rejects_other_schemes() {
        for url in ["https://proxy.local:3128", "socks5://proxy.local:1080"] {
            let err = ProxyTarget::from_config(&ProxyConfig::new(url)).unwrap_err();
            assert!(matches!(err, HttpError::InvalidProxy { .. }), "{url}: {err:?}");
        }
    }

    #[test]
    fn test_proxy_target_rejects_missing_scheme_or_host() {
        assert!(ProxyTarget::from_config(&ProxyConfig::new("proxy.local:3128")).is_err());
        assert!(ProxyTarget::from_config(&ProxyConfig::new("not a uri")).is_err());
    }

    #[test]
    fn test_proxy_target_rejects_userinfo_in_url() {
        let err = ProxyTarget::from_config(&ProxyConfig::new("http://user:pw@proxy.local:3128"))
            .unwrap_err();
        match err {
            HttpError::InvalidProxy { proxy, reason } => {
                assert_eq!(proxy, "http://[REDACTED]@proxy.local:3128");
                assert!(reason.contains("username and password"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_proxy_target_encodes_basic_auth() {
        let config = ProxyConfig::new("http://proxy.local:3128")
            .with_basic_auth("Aladdin", SecretString::from("open sesame".to_owned()));
        let target = ProxyTarget::from_config(&config).unwrap();

        let auth = target.authorization().expect("credentials configured");
        assert_eq!(auth, "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
        assert!(auth.is_sensitive());
    }

    #[tokio::test]
    async fn test_direct_connection_is_not_flagged_as_proxied() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await });

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        let connector = ProxyConnector::new(http, None);

        let dst: Uri = format!("http://{addr}/").parse().unwrap();
        let stream = connector.oneshot(dst).await.unwrap();
        assert!(!stream.connected().is_proxied());
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_http_target_dials_proxy_and_is_flagged() {
        let proxy = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy.local_addr().unwrap();
        let accept = tokio::spawn(async move { proxy.accept().await });

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        let target = ProxyTarget::from_config(&ProxyConfig::new(format!("http://{proxy_addr}"))).unwrap();
        let connector = ProxyConnector::new(http, Some(target));

        // The origin host does not resolve; only the proxy is dialled.
        let dst: Uri = "http://toggles.invalid/api/client/features".parse().unwrap();
        let stream = connector.oneshot(dst).await.unwrap();
        assert!(stream.connected().is_proxied());
        accept.await.unwrap().unwrap();
    }
}
