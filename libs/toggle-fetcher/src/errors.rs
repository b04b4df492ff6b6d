use thiserror::Error;
use toggle_http::HttpError;

/// Fatal fetch errors.
///
/// Everything the server says, including error statuses and unparsable
/// payloads, is reported through [`FetchResult`](crate::FetchResult) instead.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Rejected at construction time; the fetcher cannot be used
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// The HTTP exchange did not complete
    #[error("Transport failure: {0}")]
    Transport(#[from] HttpError),
}

impl FetchError {
    #[must_use]
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Whether the call was cut short by the call timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transport_from_http_error() {
        let err: FetchError = HttpError::Timeout(Duration::from_secs(5)).into();
        assert!(err.is_timeout());
        assert!(err.to_string().starts_with("Transport failure"));
    }

    #[test]
    fn test_invalid_configuration_message() {
        let err = FetchError::invalid_configuration("app name is empty");
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "Invalid configuration: app name is empty");
    }
}
