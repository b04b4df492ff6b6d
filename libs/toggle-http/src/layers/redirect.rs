//! Redirect policy for the toggle client.
//!
//! Toggle servers commonly sit behind load balancers or CDNs that bounce
//! `/client/features` to another host, so any host is a valid target. A hop
//! from `https` to `http` ends the chain and the 3xx is returned as is.
//! Once a hop leaves the scheme/host/port of the previous URL,
//! `Authorization` and `Cookie` are dropped for the rest of the chain.
//!
//! The final URL of a followed chain is available through
//! [`HttpResponse::url`](crate::HttpResponse::url).

use http::{Request, Uri, header};
use tower_http::follow_redirect::policy::{Action, Attempt, Policy};

/// `Proxy-Authorization` is not listed: the proxy layer sits underneath the
/// redirect layer and attaches it to every hop.
const CREDENTIAL_HEADERS: [header::HeaderName; 2] = [header::AUTHORIZATION, header::COOKIE];

#[derive(Debug, PartialEq, Eq)]
struct Origin<'a> {
    scheme: &'a str,
    host: &'a str,
    port: Option<u16>,
}

impl<'a> Origin<'a> {
    /// A URI without a scheme is treated as `https`.
    fn of(uri: &'a Uri) -> Self {
        let scheme = uri.scheme_str().unwrap_or("https");
        let port = uri.port_u16().or(match scheme {
            "http" => Some(80),
            "https" => Some(443),
            _ => None,
        });
        Self {
            scheme,
            host: uri.host().unwrap_or_default(),
            port,
        }
    }

    fn is_downgrade_to(&self, next: &Origin<'_>) -> bool {
        self.scheme == "https" && next.scheme == "http"
    }
}

/// Follows up to `max_redirects` hops per request.
#[derive(Debug, Clone)]
pub struct SecureRedirectPolicy {
    max_redirects: usize,
    /// Hops followed so far; tower-http clones the policy per request
    hops: usize,
    left_origin: bool,
}

impl SecureRedirectPolicy {
    /// `max_redirects == 0` returns every 3xx to the caller.
    #[must_use]
    pub fn new(max_redirects: usize) -> Self {
        Self {
            max_redirects,
            hops: 0,
            left_origin: false,
        }
    }
}

impl<B: Clone, E> Policy<B, E> for SecureRedirectPolicy {
    fn redirect(&mut self, attempt: &Attempt<'_>) -> Result<Action, E> {
        if self.hops >= self.max_redirects {
            tracing::debug!(max = self.max_redirects, "redirect limit reached");
            return Ok(Action::Stop);
        }
        self.hops += 1;

        let from = Origin::of(attempt.previous());
        let to = Origin::of(attempt.location());

        if from.is_downgrade_to(&to) {
            tracing::warn!(
                from = %attempt.previous(),
                to = %attempt.location(),
                "not following https to http redirect"
            );
            return Ok(Action::Stop);
        }

        self.left_origin |= from != to;
        tracing::debug!(
            status = attempt.status().as_u16(),
            to = %attempt.location(),
            hop = self.hops,
            "following redirect"
        );
        Ok(Action::Follow)
    }

    fn on_request(&mut self, request: &mut Request<B>) {
        if !self.left_origin {
            return;
        }
        for name in &CREDENTIAL_HEADERS {
            if request.headers_mut().remove(name).is_some() {
                tracing::debug!(header = %name, "dropped credential header after cross-origin redirect");
            }
        }
    }

    fn clone_body(&self, body: &B) -> Option<B> {
        Some(body.clone())
    }
}
