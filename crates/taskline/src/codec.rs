//! Pluggable decoders for response bodies.
//!
//! [`Codecs`] is the single place where optional parsers are wired in. The
//! default instance carries the built-in XML and playlist codecs; a caller
//! that wants to run without one (or swap it out) builds its own set, and any
//! transform that needs a missing codec fails with
//! [`TasklineError::CapabilityNotConfigured`].

use std::io::Read;
use std::sync::Arc;

use flate2::read::GzDecoder;
use m3u8_rs::Playlist;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Value};

use crate::error::{Result, TasklineError};

/// Key holding an element's attributes.
pub const ATTR_KEY: &str = "$";
/// Key holding an element's text when it also has attributes or children.
pub const TEXT_KEY: &str = "_";

/// Turns an XML document into a JSON-like tree.
pub trait XmlCodec: Send + Sync {
    fn parse(&self, text: &str) -> Result<Value>;
}

/// Parses M3U8 master and media playlists.
pub trait PlaylistCodec: Send + Sync {
    fn parse(&self, content: &[u8]) -> Result<Playlist>;
}

/// Registry of optional codecs.
#[derive(Clone)]
pub struct Codecs {
    xml: Option<Arc<dyn XmlCodec>>,
    playlist: Option<Arc<dyn PlaylistCodec>>,
}

impl Default for Codecs {
    fn default() -> Self {
        Self {
            xml: Some(Arc::new(QuickXmlCodec)),
            playlist: Some(Arc::new(M3u8Codec)),
        }
    }
}

impl std::fmt::Debug for Codecs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codecs")
            .field("xml", &self.xml.is_some())
            .field("playlist", &self.playlist.is_some())
            .finish()
    }
}

impl Codecs {
    /// A registry with nothing configured.
    pub fn empty() -> Self {
        Self {
            xml: None,
            playlist: None,
        }
    }

    pub fn with_xml(mut self, codec: Arc<dyn XmlCodec>) -> Self {
        self.xml = Some(codec);
        self
    }

    pub fn with_playlist(mut self, codec: Arc<dyn PlaylistCodec>) -> Self {
        self.playlist = Some(codec);
        self
    }

    pub fn xml(&self) -> Result<&dyn XmlCodec> {
        self.xml
            .as_deref()
            .ok_or(TasklineError::CapabilityNotConfigured { capability: "xml" })
    }

    pub fn playlist(&self) -> Result<&dyn PlaylistCodec> {
        self.playlist
            .as_deref()
            .ok_or(TasklineError::CapabilityNotConfigured {
                capability: "playlist",
            })
    }
}

/// Decompress a complete gzip member.
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|source| TasklineError::Gzip { source })?;
    Ok(out)
}

/// Playlist codec backed by `m3u8-rs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct M3u8Codec;

impl PlaylistCodec for M3u8Codec {
    fn parse(&self, content: &[u8]) -> Result<Playlist> {
        m3u8_rs::parse_playlist_res(content).map_err(|e| TasklineError::playlist(e.to_string()))
    }
}

/// XML codec backed by `quick-xml`.
///
/// Tag names are lower-cased, text is trimmed with inner whitespace collapsed,
/// an element seen once is stored as-is and repeated siblings become an
/// array. An element with neither attributes nor children maps to its text.
/// The result is wrapped in an object keyed by the root tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuickXmlCodec;

#[derive(Default)]
struct Frame {
    name: String,
    attrs: Map<String, Value>,
    children: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self> {
        let mut attrs = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| TasklineError::xml(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| TasklineError::xml(e.to_string()))?;
            attrs.insert(key, Value::String(value.into_owned()));
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).to_lowercase(),
            attrs,
            ..Self::default()
        })
    }

    fn close(self) -> (String, Value) {
        let text = normalize_whitespace(&self.text);
        if self.attrs.is_empty() && self.children.is_empty() {
            return (self.name, Value::String(text));
        }

        let mut object = Map::new();
        if !self.attrs.is_empty() {
            object.insert(ATTR_KEY.to_owned(), Value::Object(self.attrs));
        }
        if !text.is_empty() {
            object.insert(TEXT_KEY.to_owned(), Value::String(text));
        }
        object.extend(self.children);
        (self.name, Value::Object(object))
    }

    fn adopt(&mut self, name: String, value: Value) {
        match self.children.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                self.children.insert(name, value);
            }
        }
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl XmlCodec for QuickXmlCodec {
    fn parse(&self, text: &str) -> Result<Value> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Frame> = Vec::new();
        let mut root: Option<(String, Value)> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| TasklineError::xml(format!("at byte {}: {e}", reader.buffer_position())))?;

            let closed = match event {
                Event::Start(start) => {
                    stack.push(Frame::open(&start)?);
                    None
                }
                Event::Empty(start) => Some(Frame::open(&start)?.close()),
                Event::End(_) => stack.pop().map(Frame::close),
                Event::Text(t) => {
                    let chunk = t.unescape().map_err(|e| TasklineError::xml(e.to_string()))?;
                    if let Some(frame) = stack.last_mut() {
                        frame.text.push(' ');
                        frame.text.push_str(&chunk);
                    }
                    None
                }
                Event::CData(data) => {
                    if let Some(frame) = stack.last_mut() {
                        frame.text.push(' ');
                        frame.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                    None
                }
                Event::Eof => break,
                _ => None,
            };

            if let Some((name, value)) = closed {
                match stack.last_mut() {
                    Some(parent) => parent.adopt(name, value),
                    None if root.is_none() => root = Some((name, value)),
                    None => return Err(TasklineError::xml("multiple root elements")),
                }
            }
        }

        if let Some(open) = stack.last() {
            return Err(TasklineError::xml(format!("unclosed element <{}>", open.name)));
        }
        let (name, value) = root.ok_or_else(|| TasklineError::xml("document has no root element"))?;

        let mut document = Map::new();
        document.insert(name, value);
        Ok(Value::Object(document))
    }
}
