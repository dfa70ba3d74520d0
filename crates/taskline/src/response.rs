//! Consuming transforms over an [`HttpResponse`] body.
//!
//! Each transform takes the response by value: the body stream is read once
//! and cannot be replayed.

use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use m3u8_rs::Playlist;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::codec::{self, Codecs};
use crate::error::{Result, TasklineError};
use crate::storage::Storage;
use crate::transport::HttpResponse;

impl HttpResponse {
    /// Concatenate the whole body.
    pub async fn into_bytes(self) -> Result<Bytes> {
        let mut body = self.into_body();
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Body decoded as UTF-8, invalid sequences replaced.
    pub async fn into_text(self) -> Result<String> {
        let bytes = self.into_bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn into_json<T: DeserializeOwned>(self) -> Result<T> {
        let text = self.into_text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Body parsed by the configured XML codec.
    pub async fn into_xml(self, codecs: &Codecs) -> Result<serde_json::Value> {
        let xml = codecs.xml()?;
        let text = self.into_text().await?;
        xml.parse(&text)
    }

    /// Body decompressed as gzip.
    pub async fn gunzip(self) -> Result<Bytes> {
        let bytes = self.into_bytes().await?;
        codec::gunzip(&bytes).map(Bytes::from)
    }

    /// Body parsed as an M3U8 playlist. Anything but `200 OK` is rejected.
    pub async fn into_playlist(self, codecs: &Codecs) -> Result<Playlist> {
        let parser = codecs.playlist()?;
        if self.status() != StatusCode::OK {
            return Err(TasklineError::http_status(
                self.status(),
                self.url().as_str(),
                "playlist fetch",
            ));
        }
        let bytes = self.into_bytes().await?;
        parser.parse(&bytes)
    }

    /// Stream the body into `path` and resolve with `path`.
    ///
    /// Anything but `200 OK` is rejected before the file is created and the
    /// body is dropped unread, which releases the connection. If the body or
    /// a write fails midway, the partial file is removed before the error is
    /// returned.
    pub async fn pipe_to_file(self, storage: &dyn Storage, path: &Path) -> Result<PathBuf> {
        let (status, _, url, mut body) = self.into_parts();
        if status != StatusCode::OK {
            warn!(%url, %status, path = %path.display(), "Refusing to save response");
            return Err(TasklineError::http_status(status, url.as_str(), "download to file"));
        }

        let mut file = storage.create(path).await?;
        let copied = async {
            let mut written: u64 = 0;
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| TasklineError::storage(path, e))?;
                written += chunk.len() as u64;
            }
            file.shutdown()
                .await
                .map_err(|e| TasklineError::storage(path, e))?;
            Ok::<u64, TasklineError>(written)
        }
        .await;
        drop(file);

        match copied {
            Ok(written) => {
                debug!(%url, path = %path.display(), bytes = written, "Saved response body");
                Ok(path.to_path_buf())
            }
            Err(e) => {
                warn!(%url, path = %path.display(), error = %e, "Removing partial file");
                if let Err(cleanup) = storage.remove_file(path).await {
                    debug!(path = %path.display(), error = %cleanup, "Partial file cleanup failed");
                }
                Err(e)
            }
        }
    }
}
