//! Endpoint URLs of a toggle server.

use crate::errors::FetchError;
use url::Url;

/// Optional filters for the features endpoint.
///
/// `None` means no filter. An empty string is still a filter and is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchFilters {
    /// Sent as `project`
    pub project: Option<String>,
    /// Sent as `namePrefix`
    pub name_prefix: Option<String>,
}

impl FetchFilters {
    #[must_use]
    pub fn new(project: Option<String>, name_prefix: Option<String>) -> Self {
        Self {
            project,
            name_prefix,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.project.is_none() && self.name_prefix.is_none()
    }
}

/// The three well-known endpoints below one API base URL.
///
/// ```
/// use toggle_fetcher::EndpointUrls;
///
/// let urls = EndpointUrls::new("https://toggles.example.com/api/").unwrap();
/// assert_eq!(
///     urls.features_url().as_str(),
///     "https://toggles.example.com/api/client/features"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUrls {
    features: Url,
    metrics: Url,
    register: Url,
}

impl EndpointUrls {
    /// Parse `base` and derive the endpoints from it.
    ///
    /// # Errors
    /// `InvalidConfiguration` if `base` is not an absolute `http`/`https` URL.
    pub fn new(base: &str) -> Result<Self, FetchError> {
        let url = Url::parse(base).map_err(|e| {
            FetchError::invalid_configuration(format!("API URL '{base}' is not a valid URL: {e}"))
        })?;
        Self::from_url(url)
    }

    /// Derive the endpoints from an already parsed base URL.
    ///
    /// # Errors
    /// `InvalidConfiguration` if `base` cannot carry path segments or its
    /// scheme is not `http`/`https`.
    pub fn from_url(mut base: Url) -> Result<Self, FetchError> {
        if base.cannot_be_a_base() {
            return Err(FetchError::invalid_configuration(format!(
                "API URL '{base}' cannot be used as a base URL"
            )));
        }
        if !matches!(base.scheme(), "http" | "https") {
            return Err(FetchError::invalid_configuration(format!(
                "API URL '{base}' must use http or https, not '{}'",
                base.scheme()
            )));
        }
        base.set_fragment(None);

        Ok(Self {
            features: join(&base, "features")?,
            metrics: join(&base, "metrics")?,
            register: join(&base, "register")?,
        })
    }

    #[must_use]
    pub fn features_url(&self) -> &Url {
        &self.features
    }

    #[must_use]
    pub fn metrics_url(&self) -> &Url {
        &self.metrics
    }

    #[must_use]
    pub fn register_url(&self) -> &Url {
        &self.register
    }

    /// Features URL with `project` then `namePrefix` appended when present.
    #[must_use]
    pub fn features_url_with(&self, filters: &FetchFilters) -> Url {
        let mut url = self.features.clone();
        if filters.is_empty() {
            return url;
        }
        {
            let mut query = url.query_pairs_mut();
            if let Some(project) = &filters.project {
                query.append_pair("project", project);
            }
            if let Some(prefix) = &filters.name_prefix {
                query.append_pair("namePrefix", prefix);
            }
        }
        url
    }
}

fn join(base: &Url, endpoint: &str) -> Result<Url, FetchError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| {
            FetchError::invalid_configuration(format!("API URL '{base}' cannot be a base"))
        })?
        .pop_if_empty()
        .push("client")
        .push(endpoint);
    Ok(url)
}
