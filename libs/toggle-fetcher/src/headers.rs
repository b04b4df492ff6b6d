//! Request header assembly.

use std::fmt;
use std::sync::Arc;

pub const APP_NAME_HEADER: &str = "UNLEASH-APPNAME";
pub const INSTANCE_ID_HEADER: &str = "UNLEASH-INSTANCEID";

/// Source of headers that may change between requests, such as short-lived
/// auth tokens.
///
/// Called once per fetch; the returned pairs are appended after the static
/// headers.
pub trait CustomHeadersProvider: Send + Sync {
    fn custom_headers(&self) -> Vec<(String, String)>;
}

/// Provider that adds nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCustomHeaders;

impl CustomHeadersProvider for NoCustomHeaders {
    fn custom_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

impl<F> CustomHeadersProvider for F
where
    F: Fn() -> Vec<(String, String)> + Send + Sync,
{
    fn custom_headers(&self) -> Vec<(String, String)> {
        self()
    }
}

/// Everything needed to build the header list of one request.
#[derive(Clone)]
pub(crate) struct HeaderSources {
    app_name: String,
    instance_id: String,
    static_headers: Vec<(String, String)>,
    provider: Arc<dyn CustomHeadersProvider>,
}

impl fmt::Debug for HeaderSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderSources")
            .field("app_name", &self.app_name)
            .field("instance_id", &self.instance_id)
            .field("static_headers", &self.static_headers.len())
            .finish_non_exhaustive()
    }
}

impl HeaderSources {
    pub(crate) fn new(
        app_name: String,
        instance_id: String,
        static_headers: Vec<(String, String)>,
        provider: Arc<dyn CustomHeadersProvider>,
    ) -> Self {
        Self {
            app_name,
            instance_id,
            static_headers,
            provider,
        }
    }

    /// Headers for one request, in sending order. Nothing is deduplicated.
    pub(crate) fn assemble(&self) -> Vec<(String, String)> {
        let dynamic = self.provider.custom_headers();
        let mut headers = Vec::with_capacity(5 + self.static_headers.len() + dynamic.len());

        headers.push(("Content-Type".to_owned(), "application/json".to_owned()));
        headers.push(("Accept".to_owned(), "application/json".to_owned()));
        headers.push((APP_NAME_HEADER.to_owned(), self.app_name.clone()));
        headers.push((INSTANCE_ID_HEADER.to_owned(), self.instance_id.clone()));
        headers.push(("User-Agent".to_owned(), self.app_name.clone()));
        headers.extend(self.static_headers.iter().cloned());
        headers.extend(dynamic);
        headers
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pair(name: &str, value: &str) -> (String, String) {
        (name.to_owned(), value.to_owned())
    }

    #[test]
    fn test_header_order() {
        let sources = HeaderSources::new(
            "billing".to_owned(),
            "billing-1".to_owned(),
            vec![pair("Authorization", "static")],
            Arc::new(|| vec![pair("Authorization", "dynamic")]),
        );

        assert_eq!(
            sources.assemble(),
            vec![
                pair("Content-Type", "application/json"),
                pair("Accept", "application/json"),
                pair("UNLEASH-APPNAME", "billing"),
                pair("UNLEASH-INSTANCEID", "billing-1"),
                pair("User-Agent", "billing"),
                pair("Authorization", "static"),
                pair("Authorization", "dynamic"),
            ]
        );
    }

    #[test]
    fn test_provider_consulted_per_assembly() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sources = HeaderSources::new(
            "app".to_owned(),
            "i".to_owned(),
            Vec::new(),
            Arc::new(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                vec![pair("X-Token", &n.to_string())]
            }),
        );

        assert_eq!(sources.assemble().last(), Some(&pair("X-Token", "1")));
        assert_eq!(sources.assemble().last(), Some(&pair("X-Token", "2")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_no_custom_headers() {
        assert!(NoCustomHeaders.custom_headers().is_empty());
    }
}
