//! # taskline
//!
//! Async building blocks for fetching many things at once without losing
//! track of them:
//!
//! - [`deferred`]: externally settled futures and delay helpers
//! - [`retry`]: fixed-delay retry with bounded or unbounded attempts
//! - [`scheduler`]: bounded-concurrency lanes with ordered results
//! - [`download`]: parallel downloads with per-item failure capture
//!
//! Network and filesystem access go through the [`Transport`] and
//! [`Storage`] traits; optional parsers are wired through [`Codecs`].

pub mod checksum;
pub mod codec;
pub mod config;
pub mod deferred;
pub mod download;
pub mod error;
pub mod hls;
pub mod proxy;
pub mod response;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

pub use checksum::md5sum;
pub use codec::{Codecs, M3u8Codec, PlaylistCodec, QuickXmlCodec, XmlCodec};
pub use config::{DownloadConfig, TransportConfig};
pub use deferred::{DelayExt, Promise, Resolver, deferred, delay};
pub use download::{DownloadItem, Downloader};
pub use error::{Abandoned, Result, TasklineError};
pub use hls::{HlsMode, HlsSelection, HlsStream, select_streams};
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
pub use retry::{RetryPolicy, try_operation};
pub use scheduler::{Aggregation, all_limit, all_settled_limit, run_lanes};
pub use storage::{LocalStorage, Storage, remove_dir_and_contents};
pub use transport::{ByteStream, HttpResponse, HttpTransport, RequestBody, Transport};
