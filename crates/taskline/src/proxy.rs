use reqwest::Proxy;
use tracing::debug;

use crate::error::{Result, TasklineError};

/// Kind of upstream proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
    /// Plain HTTP proxy, used for `http` targets only
    Http,
    /// Proxy used for `https` targets only
    Https,
    /// SOCKS5 proxy, used for every target
    Socks5,
    /// HTTP proxy used for every target
    All,
}

/// Basic credentials for the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Upstream proxy override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy server URL (e.g. "http://proxy.example.com:8080")
    pub url: String,
    pub proxy_type: ProxyType,
    pub auth: Option<ProxyAuth>,
}

/// Variables consulted by [`ProxyConfig::from_env`], in order.
pub const PROXY_ENV_VARS: [&str; 2] = ["http_proxy", "HTTP_PROXY"];

impl ProxyConfig {
    pub fn new(url: impl Into<String>, proxy_type: ProxyType) -> Self {
        Self {
            url: url.into(),
            proxy_type,
            auth: None,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(ProxyAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Read the proxy override from the process environment.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve the proxy override through `lookup`.
    ///
    /// The first non-empty value of `http_proxy` or `HTTP_PROXY` wins and is
    /// applied to every request, whatever the target scheme.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        PROXY_ENV_VARS.iter().find_map(|name| {
            let value = lookup(name)?;
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            debug!(variable = name, proxy_url = value, "Found proxy override");
            Some(Self::new(value, ProxyType::All))
        })
    }
}

/// Build a reqwest proxy from a [`ProxyConfig`].
pub fn build_proxy_from_config(config: &ProxyConfig) -> Result<Proxy> {
    let proxy_url = config.url.as_str();

    let proxy = match config.proxy_type {
        ProxyType::Http => Proxy::http(proxy_url),
        ProxyType::Https => Proxy::https(proxy_url),
        ProxyType::All => Proxy::all(proxy_url),
        ProxyType::Socks5 => {
            if proxy_url.starts_with("socks5://") || proxy_url.starts_with("socks5h://") {
                Proxy::all(proxy_url)
            } else {
                Proxy::all(format!("socks5://{proxy_url}"))
            }
        }
    }
    .map_err(|e| {
        TasklineError::proxy_configuration(format!("invalid proxy URL `{proxy_url}`: {e}"))
    })?;

    Ok(match &config.auth {
        Some(auth) => proxy.basic_auth(&auth.username, &auth.password),
        None => proxy,
    })
}
