//! Variant selection for HLS master playlists.

use std::str::FromStr;

use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist, VariantStream};
use tracing::{debug, info};
use url::Url;

use crate::codec::Codecs;
use crate::error::{Result, TasklineError};
use crate::transport::{HttpResponse, Transport};

/// Which variants of a master playlist to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HlsMode {
    /// Master playlist only, nothing fetched
    Streams,
    /// Every variant
    All,
    /// Lowest bandwidth variant
    Worst,
    /// Highest bandwidth variant
    #[default]
    Best,
}

impl FromStr for HlsMode {
    type Err = std::convert::Infallible;

    /// Case-insensitive; `FULL` is an alias of `ALL` and anything unknown
    /// selects [`HlsMode::Best`].
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "STREAMS" => Self::Streams,
            "FULL" | "ALL" => Self::All,
            "WORST" => Self::Worst,
            _ => Self::Best,
        })
    }
}

/// A selected variant with its fetched media playlist.
#[derive(Debug, Clone)]
pub struct HlsStream {
    pub variant: VariantStream,
    pub url: Url,
    pub playlist: MediaPlaylist,
}

#[derive(Debug, Clone)]
pub struct HlsSelection {
    /// Master playlist with variants sorted by ascending bandwidth
    pub master: MasterPlaylist,
    /// Selected variants in ascending bandwidth order
    pub streams: Vec<HlsStream>,
}

/// Resolve a variant URI against the playlist location.
pub fn resolve_url(uri: &str, base_url: &Url) -> Result<Url> {
    base_url
        .join(uri)
        .map_err(|e| TasklineError::invalid_url(uri, e.to_string()))
}

/// Parse `response` as a master playlist and fetch the variants picked by
/// `mode`.
///
/// Variant URIs are resolved against `base_url`, or the response URL when
/// none is given. Media playlists are fetched one after another, never in
/// parallel.
pub async fn select_streams(
    response: HttpResponse,
    mode: HlsMode,
    base_url: Option<&Url>,
    transport: &dyn Transport,
    codecs: &Codecs,
) -> Result<HlsSelection> {
    let base_url = base_url.cloned().unwrap_or_else(|| response.url().clone());

    let mut master = match response.into_playlist(codecs).await? {
        Playlist::MasterPlaylist(master) => master,
        Playlist::MediaPlaylist(_) => {
            return Err(TasklineError::playlist(
                "expected a master playlist, got a media playlist",
            ));
        }
    };
    master.variants.retain(|v| !v.is_i_frame);
    master.variants.sort_by_key(|v| v.bandwidth);

    let selected: Vec<VariantStream> = match mode {
        HlsMode::Streams => Vec::new(),
        HlsMode::All => master.variants.clone(),
        HlsMode::Worst => master.variants.first().cloned().into_iter().collect(),
        HlsMode::Best => master.variants.last().cloned().into_iter().collect(),
    };
    debug!(
        ?mode,
        variants = master.variants.len(),
        selected = selected.len(),
        "Selected HLS variants"
    );

    let mut streams = Vec::with_capacity(selected.len());
    for variant in selected {
        let url = resolve_url(&variant.uri, &base_url)?;
        info!(url = %url, bandwidth = variant.bandwidth, "Fetching media playlist");

        let playlist = match transport.get(&url).await?.into_playlist(codecs).await? {
            Playlist::MediaPlaylist(media) => media,
            Playlist::MasterPlaylist(_) => {
                return Err(TasklineError::playlist(format!(
                    "expected a media playlist at {url}, got a master playlist"
                )));
            }
        };
        streams.push(HlsStream {
            variant,
            url,
            playlist,
        });
    }

    Ok(HlsSelection { master, streams })
}
