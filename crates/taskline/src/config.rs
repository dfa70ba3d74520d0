use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::proxy::ProxyConfig;
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = concat!("taskline/", env!("CARGO_PKG_VERSION"));

/// Options for the HTTP transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Overall timeout for a request, zero disables it
    pub timeout: Duration,

    /// Time allowed to establish a connection, zero disables it
    pub connect_timeout: Duration,

    pub user_agent: String,

    /// Headers sent with every request
    pub headers: HeaderMap,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// Explicit upstream proxy
    pub proxy: Option<ProxyConfig>,

    /// Let reqwest pick up system proxy settings when no explicit proxy is set
    pub use_env_proxy: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: Self::get_default_headers(),
            follow_redirects: true,
            proxy: None,
            use_env_proxy: false,
        }
    }
}

impl TransportConfig {
    /// Defaults plus the proxy override from `http_proxy`/`HTTP_PROXY`.
    pub fn from_env() -> Self {
        Self {
            proxy: ProxyConfig::from_env(),
            ..Self::default()
        }
    }

    /// Merge `headers` over the defaults; custom values win.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Bodies are handed to the caller exactly as received, so no
    /// `Accept-Encoding` is advertised here.
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        default_headers
    }
}

/// Options for [`crate::Downloader`].
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Retry applied to every GET
    pub retry: RetryPolicy,

    /// Lane count used when the caller does not pass one
    pub default_width: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            default_width: 4,
        }
    }
}
