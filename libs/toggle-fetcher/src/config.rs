//! Fetcher configuration.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use toggle_http::{
    DEFAULT_CACHE_SIZE_BYTES, DEFAULT_CALL_TIMEOUT, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_MAX_REDIRECTS, ProxyConfig,
};

/// Configuration of a [`HttpToggleFetcher`](crate::HttpToggleFetcher).
///
/// ```yaml
/// api_url: https://toggles.example.com/api
/// app_name: billing
/// instance_id: billing-7f9c
/// project_name: payments
/// custom_headers:
///   - [Authorization, "*:production.abc123"]
/// call_timeout: 3s
/// cache:
///   max_size_bytes: 10485760
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToggleFetcherConfig {
    /// Base API URL; endpoints are derived below it
    pub api_url: String,

    /// Sent as `UNLEASH-APPNAME` and as the `User-Agent`
    pub app_name: String,

    /// Sent as `UNLEASH-INSTANCEID`
    pub instance_id: String,

    /// `project` filter on the features URL
    pub project_name: Option<String>,

    /// `namePrefix` filter on the features URL
    pub name_prefix: Option<String>,

    /// Static headers added to every request, in order. Repeated names are
    /// all sent.
    pub custom_headers: Vec<(String, String)>,

    /// Optional forward proxy
    pub proxy: Option<ProxySettings>,

    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Deadline for the whole fetch, redirects included
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    pub cache: CacheSettings,

    /// Upper bound on the decompressed payload
    pub max_body_size: usize,

    /// Redirect hops followed per fetch; `0` turns a 3xx into `NotModified`
    pub max_redirects: usize,

    /// Refuse `http://` API URLs. Plain HTTP is accepted by default since
    /// toggle servers often live on a private network.
    pub tls_only: bool,
}

impl Default for ToggleFetcherConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            app_name: String::new(),
            instance_id: default_instance_id(),
            project_name: None,
            name_prefix: None,
            custom_headers: Vec::new(),
            proxy: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            cache: CacheSettings::default(),
            max_body_size: default_max_body_size(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            tls_only: false,
        }
    }
}

impl ToggleFetcherConfig {
    /// Minimal configuration for one app against one server
    #[must_use]
    pub fn new(api_url: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            app_name: app_name.into(),
            ..Self::default()
        }
    }
}

/// Forward proxy settings
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxySettings {
    /// `http://host:port`
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing, deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,
}

impl Clone for ProxySettings {
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

impl From<&ProxySettings> for ProxyConfig {
    fn from(settings: &ProxySettings) -> Self {
        let mut proxy = ProxyConfig::new(settings.url.clone());
        proxy.username.clone_from(&settings.username);
        proxy.password = settings
            .password
            .as_ref()
            .map(|p| SecretString::from(p.expose_secret().to_owned()));
        proxy
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

/// Local response cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Bound on stored body bytes
    pub max_size_bytes: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: DEFAULT_CACHE_SIZE_BYTES,
        }
    }
}

fn default_instance_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_owned());
    format!("{host}-generated-{}", std::process::id())
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024 // 10 MB
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ToggleFetcherConfig::default();
        assert_eq!(cfg.connect_timeout, Duration::from_secs(10));
        assert_eq!(cfg.call_timeout, Duration::from_secs(5));
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.cache.max_size_bytes, 50 * 1024 * 1024);
        assert_eq!(cfg.max_redirects, 10);
        assert!(!cfg.tls_only);
        assert!(cfg.instance_id.contains("-generated-"));
    }

    #[test]
    fn test_deserialize_with_humantime_durations() {
        let cfg: ToggleFetcherConfig = serde_json::from_value(serde_json::json!({
            "api_url": "http://toggles.local/api",
            "app_name": "billing",
            "instance_id": "billing-1",
            "project_name": "payments",
            "custom_headers": [["Authorization", "token"], ["X-Team", "a"], ["X-Team", "b"]],
            "connect_timeout": "2s",
            "call_timeout": "750ms",
            "cache": { "enabled": false },
            "proxy": { "url": "http://proxy.local:3128", "username": "u", "password": "p" }
        }))
        .unwrap();

        assert_eq!(cfg.connect_timeout, Duration::from_secs(2));
        assert_eq!(cfg.call_timeout, Duration::from_millis(750));
        assert_eq!(cfg.custom_headers.len(), 3);
        assert_eq!(cfg.project_name.as_deref(), Some("payments"));
        assert!(cfg.name_prefix.is_none());
        assert!(!cfg.cache.enabled);
        assert_eq!(cfg.cache.max_size_bytes, DEFAULT_CACHE_SIZE_BYTES);
        let proxy = cfg.proxy.unwrap();
        assert_eq!(proxy.password.as_ref().unwrap().expose_secret(), "p");

        let transport = ProxyConfig::from(&proxy);
        assert_eq!(transport.url, "http://proxy.local:3128");
        assert_eq!(transport.username.as_deref(), Some("u"));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result = serde_json::from_value::<ToggleFetcherConfig>(serde_json::json!({
            "api_url": "http://toggles.local/api",
            "refresh_interval": "10s"
        }));
        assert!(result.is_err());
    }
}
