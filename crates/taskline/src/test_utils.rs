use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::{Method, StatusCode};
use url::Url;

use crate::error::{Result, TasklineError};
use crate::transport::{HttpResponse, RequestBody, Transport};

/// Initialize tracing for tests with appropriate settings
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

enum Reply {
    Body(Bytes),
    Status(StatusCode),
}

struct Route {
    reply: Reply,
    failures_left: usize,
}

/// In-memory [`Transport`] serving canned bodies by URL.
///
/// Unknown URLs answer 404. Each request sleeps for `latency` so overlapping
/// requests can be observed through [`MockTransport::max_in_flight`].
pub struct MockTransport {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    latency: Duration,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            latency: Duration::from_millis(2),
        }
    }

    pub fn route(self, url: &str, body: impl Into<Bytes>) -> Self {
        self.insert(url, Reply::Body(body.into()), 0)
    }

    /// Answer `url` with a bare status code.
    pub fn route_status(self, url: &str, status: StatusCode) -> Self {
        self.insert(url, Reply::Status(status), 0)
    }

    /// Serve `body` only after `failures` connection errors.
    pub fn flaky_route(self, url: &str, body: impl Into<Bytes>, failures: usize) -> Self {
        self.insert(url, Reply::Body(body.into()), failures)
    }

    fn insert(self, url: &str, reply: Reply, failures_left: usize) -> Self {
        self.routes.lock().insert(
            url.to_owned(),
            Route {
                reply,
                failures_left,
            },
        );
        self
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(
        &self,
        _method: Method,
        url: &Url,
        _body: Option<RequestBody>,
    ) -> Result<HttpResponse> {
        self.requests.lock().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut routes = self.routes.lock();
        let Some(route) = routes.get_mut(url.as_str()) else {
            return Err(TasklineError::http_status(
                StatusCode::NOT_FOUND,
                url.as_str(),
                "request",
            ));
        };

        if route.failures_left > 0 {
            route.failures_left -= 1;
            return Err(TasklineError::transport(
                url.as_str(),
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
            ));
        }

        match &route.reply {
            Reply::Body(body) => Ok(HttpResponse::from_chunks(
                StatusCode::OK,
                url.clone(),
                [body.clone()],
            )),
            Reply::Status(status) if status.is_success() => Ok(HttpResponse::from_chunks(
                *status,
                url.clone(),
                Vec::<Bytes>::new(),
            )),
            Reply::Status(status) => Err(TasklineError::http_status(*status, url.as_str(), "request")),
        }
    }
}
