//! Parallel file downloads.
//!
//! [`Downloader::download_files`] spreads the URLs over scheduler lanes, runs
//! each GET under the configured [`RetryPolicy`] and streams the body to disk.
//! A failing URL is recorded on its own [`DownloadItem`] and never stops the
//! others.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use crate::config::{DownloadConfig, TransportConfig};
use crate::error::{Result, TasklineError};
use crate::retry::RetryPolicy;
use crate::scheduler::all_settled_limit;
use crate::storage::{LocalStorage, Storage};
use crate::transport::{HttpTransport, Transport};

/// Outcome of one URL in a batch.
///
/// Exactly one of `path` and `error` is set.
#[derive(Debug)]
pub struct DownloadItem {
    /// Position in the submitted URL list
    pub index: usize,
    pub url: Url,
    /// File name given by the caller or derived from the URL, `None` when
    /// no name could be derived
    pub filename: Option<String>,
    pub target_dir: Option<PathBuf>,
    /// Where the body was written
    pub path: Option<PathBuf>,
    pub error: Option<TasklineError>,
}

impl DownloadItem {
    pub fn is_success(&self) -> bool {
        self.path.is_some()
    }
}

/// Last path segment of `url`, percent-decoded.
///
/// A decoded name that is empty, `.`, `..` or contains a path separator is
/// rejected, so the result always stays inside the target directory.
pub fn default_filename(url: &Url) -> Result<String> {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    let decoded = urlencoding::decode(segment)
        .map_err(|e| TasklineError::invalid_url(url.as_str(), e.to_string()))?;
    if decoded.is_empty() {
        return Err(TasklineError::invalid_url(
            url.as_str(),
            "path has no file name",
        ));
    }
    if decoded == "." || decoded == ".." || decoded.contains(['/', '\\']) {
        return Err(TasklineError::invalid_url(
            url.as_str(),
            format!("`{decoded}` is not a plain file name"),
        ));
    }
    Ok(decoded.into_owned())
}

/// Target path for `url`: the given or derived file name, under `target_dir`.
pub fn resolve_path(url: &Url, filename: Option<&str>, target_dir: Option<&Path>) -> Result<PathBuf> {
    let filename = match filename {
        Some(name) => name.to_owned(),
        None => default_filename(url)?,
    };
    Ok(match target_dir {
        Some(dir) => dir.join(filename),
        None => PathBuf::from(filename),
    })
}

async fn fetch_to_file(
    transport: &dyn Transport,
    storage: &dyn Storage,
    retry: &RetryPolicy,
    url: &Url,
    path: &Path,
) -> Result<PathBuf> {
    debug!(%url, path = %path.display(), "Downloading");
    let response = retry.run(|| transport.get(url)).await?;
    response.pipe_to_file(storage, path).await
}

/// Downloads URLs to files through a [`Transport`] and a [`Storage`].
#[derive(Clone)]
pub struct Downloader {
    transport: Arc<dyn Transport>,
    storage: Arc<dyn Storage>,
    config: DownloadConfig,
}

impl Downloader {
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<dyn Storage>,
        config: DownloadConfig,
    ) -> Self {
        Self {
            transport,
            storage,
            config,
        }
    }

    /// Downloader over reqwest and the local filesystem.
    pub fn with_http(transport_config: &TransportConfig, config: DownloadConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(HttpTransport::new(transport_config)?),
            Arc::new(LocalStorage),
            config,
        ))
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Download a single URL and return the path written.
    ///
    /// Errors are returned to the caller as-is.
    pub async fn download_file(
        &self,
        url: &Url,
        filename: Option<&str>,
        target_dir: Option<&Path>,
    ) -> Result<PathBuf> {
        let path = resolve_path(url, filename, target_dir)?;
        fetch_to_file(
            self.transport.as_ref(),
            self.storage.as_ref(),
            &self.config.retry,
            url,
            &path,
        )
        .await
    }

    /// Download `urls` over `width` lanes.
    ///
    /// `filenames[i]`, when present, names the file for `urls[i]`. The result
    /// has one item per URL in submission order; failures are captured on
    /// their item.
    pub async fn download_files(
        &self,
        urls: Vec<Url>,
        filenames: Option<Vec<String>>,
        target_dir: Option<&Path>,
        width: Option<usize>,
    ) -> Vec<DownloadItem> {
        let width = width.unwrap_or(self.config.default_width);
        let filenames = filenames.unwrap_or_default();
        info!(count = urls.len(), width, "Starting downloads");

        let mut items: Vec<DownloadItem> = urls
            .into_iter()
            .enumerate()
            .map(|(index, url)| {
                let filename = filenames
                    .get(index)
                    .cloned()
                    .or_else(|| default_filename(&url).ok());
                DownloadItem {
                    index,
                    url,
                    filename,
                    target_dir: target_dir.map(Path::to_path_buf),
                    path: None,
                    error: None,
                }
            })
            .collect();

        let tasks: Vec<_> = items
            .iter()
            .map(|item| {
                let transport = Arc::clone(&self.transport);
                let storage = Arc::clone(&self.storage);
                let retry = self.config.retry;
                let url = item.url.clone();
                let path = resolve_path(&item.url, item.filename.as_deref(), target_dir);
                move || async move {
                    let path = path?;
                    fetch_to_file(transport.as_ref(), storage.as_ref(), &retry, &url, &path).await
                }
            })
            .collect();

        let outcomes = all_settled_limit(tasks, width).await;

        let mut failed = 0usize;
        for (item, outcome) in items.iter_mut().zip(outcomes) {
            match outcome {
                Ok(path) => item.path = Some(path),
                Err(e) => {
                    warn!(index = item.index, url = %item.url, error = %e, "Download failed");
                    failed += 1;
                    item.error = Some(e);
                }
            }
        }

        info!(
            succeeded = items.len() - failed,
            failed, "Downloads finished"
        );
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockTransport, init_tracing};
    use reqwest::StatusCode;
    use std::time::Duration;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn downloader(transport: Arc<MockTransport>, retry: RetryPolicy) -> Downloader {
        Downloader::new(
            transport,
            Arc::new(LocalStorage),
            DownloadConfig {
                retry,
                ..DownloadConfig::default()
            },
        )
    }

    #[test]
    fn filename_from_last_segment() {
        assert_eq!(
            default_filename(&url("http://h/a/b/seg%2001.ts?x=1")).unwrap(),
            "seg 01.ts"
        );
        assert!(default_filename(&url("http://h/dir/")).is_err());
        assert!(default_filename(&url("http://h")).is_err());
    }

    #[test]
    fn encoded_separators_cannot_leave_target_dir() {
        let target = Path::new("/tmp/out/batch");
        for raw in [
            "http://h/files/..%2F..%2Fescaped.bin",
            "http://h/files/..%5Cescaped.bin",
            "http://h/files/%2E%2E",
            "http://h/files/%2E",
        ] {
            let err = resolve_path(&url(raw), None, Some(target)).unwrap_err();
            assert!(matches!(err, TasklineError::InvalidUrl { .. }), "{raw}");
        }

        let ok = resolve_path(&url("http://h/files/a%20b.bin"), None, Some(target)).unwrap();
        assert!(ok.starts_with(target));
        assert_eq!(ok, target.join("a b.bin"));
    }

    #[test]
    fn path_uses_target_dir() {
        let path = resolve_path(&url("http://h/x/file.bin"), None, Some(Path::new("/tmp/out")))
            .unwrap();
        assert_eq!(path, PathBuf::from("/tmp/out/file.bin"));
        let named = resolve_path(&url("http://h/x/file.bin"), Some("other.bin"), None).unwrap();
        assert_eq!(named, PathBuf::from("other.bin"));
    }

    #[tokio::test]
    async fn batch_isolates_failures_and_keeps_order() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(
            MockTransport::new()
                .route("http://h/0.ts", "zero")
                .route_status("http://h/1.ts", StatusCode::NOT_FOUND)
                .route("http://h/2.ts", "two")
                .route("http://h/3.ts", "three"),
        );
        let downloader = downloader(Arc::clone(&transport), RetryPolicy::new(Some(2), Duration::ZERO));

        let urls = (0..4).map(|i| url(&format!("http://h/{i}.ts"))).collect();
        let items = downloader
            .download_files(urls, None, Some(dir.path()), Some(2))
            .await;

        assert_eq!(items.len(), 4);
        for (i, item) in items.iter().enumerate() {
            assert_eq!(item.index, i);
            assert_eq!(item.filename, Some(format!("{i}.ts")));
            assert!(item.path.is_some() != item.error.is_some());
        }
        assert!(items[1].error.as_ref().unwrap().is_status());
        assert_eq!(std::fs::read(dir.path().join("0.ts")).unwrap(), b"zero");
        assert_eq!(std::fs::read(dir.path().join("3.ts")).unwrap(), b"three");
        assert!(!dir.path().join("1.ts").exists());

        // One first attempt plus two retries for the 404.
        let hits = transport.requests().iter().filter(|u| u.ends_with("/1.ts")).count();
        assert_eq!(hits, 3);
    }

    #[tokio::test]
    async fn flaky_url_recovers_under_retry() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new().flaky_route("http://h/a.bin", "payload", 3));
        let downloader = downloader(transport, RetryPolicy::default());

        let path = downloader
            .download_file(&url("http://h/a.bin"), None, Some(dir.path()))
            .await
            .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn single_download_propagates_error() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new().flaky_route("http://h/a.bin", "payload", 5));
        let downloader = downloader(transport, RetryPolicy::new(Some(1), Duration::ZERO));

        let err = downloader
            .download_file(&url("http://h/a.bin"), Some("named.bin"), Some(dir.path()))
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert!(!dir.path().join("named.bin").exists());
    }

    #[tokio::test]
    async fn custom_filenames_and_width_bound() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = MockTransport::new();
        for i in 0..9 {
            transport = transport.route(&format!("http://h/{i}"), format!("body {i}"));
        }
        let transport = Arc::new(transport);
        let downloader = downloader(Arc::clone(&transport), RetryPolicy::never());

        let urls = (0..9).map(|i| url(&format!("http://h/{i}"))).collect();
        let names = (0..9).map(|i| format!("file-{i}.txt")).collect();
        let items = downloader
            .download_files(urls, Some(names), Some(dir.path()), Some(3))
            .await;

        assert!(items.iter().all(DownloadItem::is_success));
        assert_eq!(items[4].path.as_deref(), Some(dir.path().join("file-4.txt").as_path()));
        assert_eq!(items[4].filename.as_deref(), Some("file-4.txt"));
        assert_eq!(std::fs::read_to_string(dir.path().join("file-8.txt")).unwrap(), "body 8");
        assert!(transport.max_in_flight() <= 3);
    }

    #[tokio::test]
    async fn underivable_filename_fails_only_that_item() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new().route("http://h/ok.bin", "ok"));
        let downloader = downloader(Arc::clone(&transport), RetryPolicy::never());

        let items = downloader
            .download_files(
                vec![url("http://h/"), url("http://h/ok.bin")],
                None,
                Some(dir.path()),
                None,
            )
            .await;
        assert!(matches!(items[0].error, Some(TasklineError::InvalidUrl { .. })));
        assert_eq!(items[0].filename, None);
        assert!(items[1].is_success());
        assert_eq!(items[1].filename.as_deref(), Some("ok.bin"));
        assert_eq!(transport.requests(), vec!["http://h/ok.bin"]);
    }
}
