//! HTTP transport seam.
//!
//! Everything above this module talks to the network through the
//! [`Transport`] trait and receives an [`HttpResponse`] whose body is a
//! single-pass [`ByteStream`]. [`HttpTransport`] is the reqwest-backed
//! implementation; tests plug in in-memory transports instead.

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt, stream};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use url::Url;

use crate::config::TransportConfig;
use crate::error::{Result, TasklineError};
use crate::proxy::build_proxy_from_config;

/// Response body as a stream of chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Payload attached to a request.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(serde_json::Value),
    Text(String),
    /// `application/x-www-form-urlencoded` pairs
    Form(Vec<(String, String)>),
    Bytes(Bytes),
    /// Streamed from disk
    File(PathBuf),
}

/// Status, headers and a not-yet-consumed body.
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    body: ByteStream,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, url: Url, body: ByteStream) -> Self {
        Self {
            status,
            headers,
            url,
            body,
        }
    }

    /// Build a response whose body yields `chunks` in order.
    pub fn from_chunks<I>(status: StatusCode, url: Url, chunks: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        let chunks: Vec<Result<Bytes>> = chunks.into_iter().map(|c| Ok(c.into())).collect();
        Self::new(status, HeaderMap::new(), url, Box::pin(stream::iter(chunks)))
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Final URL of the response, after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn into_body(self) -> ByteStream {
        self.body
    }

    pub(crate) fn into_parts(self) -> (StatusCode, HeaderMap, Url, ByteStream) {
        (self.status, self.headers, self.url, self.body)
    }
}

/// Something that can perform an HTTP exchange.
///
/// Implementations must reject non-2xx responses with
/// [`TasklineError::HttpStatus`] and connection-level failures with
/// [`TasklineError::Transport`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        url: &Url,
        body: Option<RequestBody>,
    ) -> Result<HttpResponse>;

    async fn get(&self, url: &Url) -> Result<HttpResponse> {
        self.request(Method::GET, url, None).await
    }

    async fn head(&self, url: &Url) -> Result<HttpResponse> {
        self.request(Method::HEAD, url, None).await
    }

    async fn post(&self, url: &Url, body: RequestBody) -> Result<HttpResponse> {
        self.request(Method::POST, url, Some(body)).await
    }

    async fn put(&self, url: &Url, body: RequestBody) -> Result<HttpResponse> {
        self.request(Method::PUT, url, Some(body)).await
    }
}

/// Only `http` and `https` targets are accepted.
pub fn ensure_supported_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(TasklineError::UnsupportedProtocol {
            protocol: other.to_owned(),
        }),
    }
}

/// Create a reqwest client from a [`TransportConfig`].
pub fn create_client(config: &TransportConfig) -> Result<Client> {
    let mut client_builder = Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        client_builder = client_builder.proxy(build_proxy_from_config(proxy_config)?);
        info!(proxy_url = %proxy_config.url, "Using configured proxy");
    } else if config.use_env_proxy {
        debug!("Using system proxy settings");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled");
    }

    client_builder.build().map_err(TasklineError::ClientBuild)
}

/// [`Transport`] backed by a reqwest [`Client`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        Ok(Self {
            client: create_client(config)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        url: &Url,
        body: Option<RequestBody>,
    ) -> Result<HttpResponse> {
        ensure_supported_scheme(url)?;
        debug!(%method, %url, "Sending request");

        let mut request = self.client.request(method.clone(), url.clone());
        request = match body {
            None => request,
            Some(RequestBody::Json(value)) => request.json(&value),
            Some(RequestBody::Text(text)) => request.body(text),
            Some(RequestBody::Form(pairs)) => request.form(&pairs),
            Some(RequestBody::Bytes(bytes)) => request.body(bytes),
            Some(RequestBody::File(path)) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| TasklineError::storage(&path, e))?;
                request.body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| TasklineError::transport(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(%method, %url, %status, "Request rejected");
            return Err(TasklineError::http_status(status, url.as_str(), "request"));
        }

        let headers = response.headers().clone();
        let final_url = response.url().clone();
        let source = final_url.to_string();
        let body = response
            .bytes_stream()
            .map_err(move |e| TasklineError::transport(source.clone(), e))
            .boxed();

        Ok(HttpResponse::new(status, headers, final_url, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ProxyConfig, ProxyType};

    #[test]
    fn only_http_schemes_are_supported() {
        assert!(ensure_supported_scheme(&Url::parse("http://a/b").unwrap()).is_ok());
        assert!(ensure_supported_scheme(&Url::parse("https://a/b").unwrap()).is_ok());

        let err = ensure_supported_scheme(&Url::parse("ftp://a/b").unwrap()).unwrap_err();
        assert!(matches!(
            err,
            TasklineError::UnsupportedProtocol { ref protocol } if protocol == "ftp"
        ));
    }

    #[tokio::test]
    async fn unsupported_scheme_is_rejected_before_sending() {
        let transport = HttpTransport::new(&TransportConfig::default()).unwrap();
        let err = transport
            .get(&Url::parse("file:///etc/hosts").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, TasklineError::UnsupportedProtocol { .. }));
    }

    #[test]
    fn client_builds_with_explicit_proxy() {
        let config = TransportConfig::default()
            .with_proxy(ProxyConfig::new("http://127.0.0.1:3128", ProxyType::All));
        assert!(create_client(&config).is_ok());
    }

    #[tokio::test]
    async fn in_memory_response_yields_chunks_in_order() {
        let response = HttpResponse::from_chunks(
            StatusCode::OK,
            Url::parse("http://example.com/").unwrap(),
            [&b"ab"[..], &b"cd"[..]],
        );
        assert_eq!(response.status(), StatusCode::OK);
        let chunks: Vec<Bytes> = response.into_body().try_collect().await.unwrap();
        assert_eq!(chunks, vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")]);
    }
}
