use crate::models::ToggleCollection;
use url::Url;

/// Outcome of one fetch that reached the server.
///
/// Callers branch on this every poll cycle; none of the variants is an
/// error.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    /// New toggle data
    Changed(ToggleCollection),

    /// Nothing new. `status` is 304 for a local cache hit, otherwise the
    /// literal 301, 302, 303 or 304 the server sent.
    NotModified { status: u16 },

    /// The server answered with something unusable.
    ///
    /// `location` is the URL the response came from and is only set when a
    /// success response carried a body that could not be parsed.
    Unavailable { status: u16, location: Option<Url> },
}

impl FetchResult {
    /// HTTP status reported with this result; 200 for `Changed`
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Changed(_) => 200,
            Self::NotModified { status } | Self::Unavailable { status, .. } => *status,
        }
    }

    #[must_use]
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed(_))
    }

    /// The new toggles, if any
    #[must_use]
    pub fn into_collection(self) -> Option<ToggleCollection> {
        match self {
            Self::Changed(collection) => Some(collection),
            Self::NotModified { .. } | Self::Unavailable { .. } => None,
        }
    }
}
