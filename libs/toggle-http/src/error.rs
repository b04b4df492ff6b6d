use std::time::Duration;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Which part of a request URL was unusable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// Not a URL at all
    ParseError,
    /// No host, e.g. `/api/client/features`
    MissingAuthority,
    /// Host present but no `http`/`https` scheme
    MissingScheme,
}

/// Failure to complete one HTTP exchange.
///
/// A response with any status, 4xx and 5xx included, is not an error at this
/// level; see [`HttpResponse`](crate::HttpResponse).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    #[error("could not assemble request: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("bad header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("bad header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// The call timeout elapsed first
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// Connect, DNS, proxy tunnel, connection reset or body stream failure
    #[error("transport failure: {0}")]
    Transport(#[source] BoxError),

    /// Handshake or certificate rejection, or TLS setup at build time
    #[error("TLS failure: {0}")]
    Tls(#[source] BoxError),

    #[error("response body exceeds {limit} bytes (read {actual})")]
    BodyTooLarge { limit: usize, actual: usize },

    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The worker driving the request queue has stopped
    #[error("client shut down")]
    ServiceClosed,

    /// `reason` is for logs; match on `kind`
    #[error("unusable URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    /// Scheme not permitted by the transport security mode
    #[error("scheme '{scheme}' rejected: {reason}")]
    InvalidScheme { scheme: String, reason: String },

    #[error("unusable proxy '{proxy}': {reason}")]
    InvalidProxy { proxy: String, reason: String },
}

impl HttpError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        Self::from_connection_error(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        Self::from_connection_error(Box::new(err))
    }
}

impl HttpError {
    /// `Tls` when a rustls error sits anywhere in the source chain, else
    /// `Transport`.
    pub(crate) fn from_connection_error(err: BoxError) -> Self {
        if caused_by_tls(&*err) {
            Self::Tls(err)
        } else {
            Self::Transport(err)
        }
    }
}

/// tokio-rustls reports handshake failures as `io::Error` wrapping a
/// `rustls::Error`, and `io::Error::source` skips the wrapped error, so each
/// `io::Error` link is unwrapped by hand.
fn caused_by_tls(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<rustls::Error>() {
            return true;
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>()
            && io.get_ref().is_some_and(|inner| inner.is::<rustls::Error>())
        {
            return true;
        }
        current = e.source();
    }
    false
}
