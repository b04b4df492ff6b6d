use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::time::Duration;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("toggle-http/", env!("CARGO_PKG_VERSION"));

/// Default connect timeout (10 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default call timeout (5 seconds)
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default response cache size (50 MiB of stored bodies)
pub const DEFAULT_CACHE_SIZE_BYTES: usize = 50 * 1024 * 1024;

/// Default redirect hop limit
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Requests that may wait for the dispatch worker before callers start waiting
const BUFFER_CAPACITY: usize = 1024;

/// Transport security configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only)
    #[default]
    TlsOnly,
    /// Allow plain HTTP connections
    ///
    /// Feature-toggle servers are often reached over plain HTTP inside a
    /// private network; mock servers in tests always are.
    AllowInsecureHttp,
}

/// Forward proxy settings
///
/// Only `http://` proxies are supported. Plain-HTTP targets are sent to the
/// proxy in absolute form; HTTPS targets go through a `CONNECT` tunnel.
pub struct ProxyConfig {
    /// Proxy URL, e.g. `http://proxy.internal:3128`
    pub url: String,

    /// Basic-auth user name sent as `Proxy-Authorization`
    pub username: Option<String>,

    /// Basic-auth password
    pub password: Option<SecretString>,
}

impl ProxyConfig {
    /// Proxy without credentials
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    /// Attach basic-auth credentials
    #[must_use]
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: SecretString) -> Self {
        self.username = Some(username.into());
        self.password = Some(password);
        self
    }
}

impl Clone for ProxyConfig {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            username: self.username.clone(),
            password: self
                .password
                .as_ref()
                .map(|p| SecretString::from(p.expose_secret().to_owned())),
        }
    }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Local response cache configuration
///
/// The cache is private to one client and shared by all its clones. Bodies
/// are kept in memory; the bound applies to the sum of stored body sizes.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Upper bound on stored body bytes (default: 50 MiB)
    ///
    /// A single response larger than this is never stored.
    pub max_size_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_CACHE_SIZE_BYTES,
        }
    }
}

/// Settings collected by [`HttpClientBuilder`](crate::HttpClientBuilder)
#[derive(Debug, Clone)]
pub(crate) struct HttpClientConfig {
    pub(crate) connect_timeout: Duration,

    /// Deadline for one call, from dispatch until response headers arrive.
    /// Waiting for a dispatch slot, redirect hops and cache revalidation all
    /// count against it.
    pub(crate) call_timeout: Duration,

    pub(crate) max_body_size: usize,

    /// Added when the request carries no `User-Agent`
    pub(crate) user_agent: String,

    pub(crate) transport: TransportSecurity,

    /// `0` disables redirect following
    pub(crate) max_redirects: usize,

    pub(crate) proxy: Option<ProxyConfig>,

    /// `None` marks every response [`CacheStatus::Bypass`](crate::CacheStatus::Bypass)
    pub(crate) cache: Option<CacheConfig>,

    pub(crate) buffer_capacity: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_body_size: 10 * 1024 * 1024, // 10 MB
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            transport: TransportSecurity::TlsOnly,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            proxy: None,
            cache: Some(CacheConfig::default()),
            buffer_capacity: BUFFER_CAPACITY,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let config = HttpClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert!(config.proxy.is_none());
        assert_eq!(
            config.cache.map(|c| c.max_size_bytes),
            Some(50 * 1024 * 1024)
        );
    }

    #[test]
    fn test_defaults_require_tls_and_follow_redirects() {
        let config = HttpClientConfig::default();
        assert_eq!(config.transport, TransportSecurity::TlsOnly);
        assert_eq!(config.max_redirects, 10);
        assert_eq!(config.buffer_capacity, 1024);
    }

    #[test]
    fn test_proxy_debug_redacts_password() {
        let proxy = ProxyConfig::new("http://proxy:3128")
            .with_basic_auth("user", SecretString::from("hunter2".to_owned()));
        let dbg = format!("{proxy:?}");
        assert!(!dbg.contains("hunter2"), "{dbg}");
        assert!(dbg.contains("[REDACTED]"), "{dbg}");
    }

    #[test]
    fn test_proxy_clone_keeps_credentials() {
        let proxy = ProxyConfig::new("http://proxy:3128")
            .with_basic_auth("user", SecretString::from("hunter2".to_owned()));
        let cloned = proxy.clone();
        assert_eq!(cloned.username.as_deref(), Some("user"));
        assert_eq!(
            cloned.password.as_ref().map(|p| p.expose_secret()),
            Some("hunter2")
        );
    }
}
