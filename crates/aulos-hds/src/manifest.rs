//! F4M manifest parsing.
//!
//! A pull-event walk over the manifest XML collecting the recognized subset:
//! `<bootstrapInfo>` (attributes + base64 `abst` body), `<media>` attributes,
//! `<duration>`, and the manifest-level `<id>`. Everything else is ignored.
//! Cross-linking media and bootstrap entries into streams happens in the
//! session layer.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::warn;

use crate::error::{HdsError, HdsResult};

const MAX_BOOTSTRAP_INFO: usize = 10;
const MAX_MEDIA_ELEMENTS: usize = 10;
const MAX_XML_DEPTH: usize = 256;

/// One `<bootstrapInfo>` element.
#[derive(Clone, Debug, Default)]
pub(crate) struct BootstrapInfo {
    pub id: Option<String>,
    pub url: Option<String>,
    pub profile: Option<String>,
    /// Decoded `abst` bytes; empty when the element carried no body.
    pub data: Vec<u8>,
}

/// One `<media>` element.
#[derive(Clone, Debug, Default)]
pub(crate) struct MediaInfo {
    pub stream_id: Option<String>,
    pub url: Option<String>,
    pub bootstrap_id: Option<String>,
}

/// Recognized manifest contents.
#[derive(Clone, Debug, Default)]
pub(crate) struct Manifest {
    /// Zero means live.
    pub duration_seconds: u64,
    pub media_id: Option<String>,
    pub medias: Vec<MediaInfo>,
    pub bootstraps: Vec<BootstrapInfo>,
}

impl Manifest {
    pub fn is_live(&self) -> bool {
        self.duration_seconds == 0
    }
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> HdsResult<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| HdsError::ManifestParse(e.to_string()))?;
        if attr.key.as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|e| HdsError::ManifestParse(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn media_from_attrs(e: &BytesStart<'_>) -> HdsResult<MediaInfo> {
    Ok(MediaInfo {
        stream_id: attr_value(e, b"streamId")?,
        url: attr_value(e, b"url")?,
        bootstrap_id: attr_value(e, b"bootstrapInfoId")?,
    })
}

fn bootstrap_from_attrs(e: &BytesStart<'_>) -> HdsResult<BootstrapInfo> {
    Ok(BootstrapInfo {
        id: attr_value(e, b"id")?,
        url: attr_value(e, b"url")?,
        profile: attr_value(e, b"profile")?,
        data: Vec::new(),
    })
}

/// Parse manifest text into the recognized subset.
pub(crate) fn parse_manifest(input: &str) -> HdsResult<Manifest> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut manifest = Manifest::default();
    let mut stack: Vec<String> = Vec::new();
    // body text of the bootstrapInfo currently being captured, if any
    let mut bootstrap_text: Option<String> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| HdsError::ManifestParse(e.to_string()))?;

        match event {
            Event::Start(e) => {
                if stack.len() >= MAX_XML_DEPTH {
                    return Err(HdsError::ManifestParse(
                        "manifest nesting too deep".into(),
                    ));
                }
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();

                match name.as_str() {
                    "media" => start_media(&mut manifest, &e)?,
                    "bootstrapInfo" => {
                        if start_bootstrap(&mut manifest, &e)? {
                            bootstrap_text = Some(String::new());
                        }
                    }
                    _ => {}
                }
                stack.push(name);
            }
            Event::Empty(e) => {
                // self-closing elements carry attributes but no body
                match e.local_name().as_ref() {
                    b"media" => start_media(&mut manifest, &e)?,
                    b"bootstrapInfo" => {
                        let _ = start_bootstrap(&mut manifest, &e)?;
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| HdsError::ManifestParse(e.to_string()))?;
                let current = stack.last().map(String::as_str).unwrap_or("");
                let parent = stack
                    .len()
                    .checked_sub(2)
                    .map(|i| stack[i].as_str())
                    .unwrap_or("");

                match current {
                    "bootstrapInfo" => {
                        if let Some(buf) = bootstrap_text.as_mut() {
                            buf.push_str(&text);
                        }
                    }
                    "duration" if parent == "manifest" => {
                        let seconds: f64 = text.trim().parse().unwrap_or(0.0);
                        manifest.duration_seconds = seconds.max(0.0) as u64;
                    }
                    "id" if parent == "manifest" => {
                        manifest.media_id = Some(text.into_owned());
                    }
                    _ => {}
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"bootstrapInfo"
                    && let Some(text) = bootstrap_text.take()
                    && let Some(entry) = manifest.bootstraps.last_mut()
                {
                    finish_bootstrap(entry, &text);
                }
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(manifest)
}

fn start_media(manifest: &mut Manifest, e: &BytesStart<'_>) -> HdsResult<()> {
    if manifest.medias.len() >= MAX_MEDIA_ELEMENTS {
        return Err(HdsError::ManifestParse("too many media elements".into()));
    }
    let media = media_from_attrs(e)?;
    manifest.medias.push(media);
    Ok(())
}

/// Returns whether the element was kept (and its body should be captured).
fn start_bootstrap(manifest: &mut Manifest, e: &BytesStart<'_>) -> HdsResult<bool> {
    if manifest.bootstraps.len() >= MAX_BOOTSTRAP_INFO {
        warn!("too many bootstraps in manifest, ignoring");
        return Ok(false);
    }
    let info = bootstrap_from_attrs(e)?;
    manifest.bootstraps.push(info);
    Ok(true)
}

fn finish_bootstrap(entry: &mut BootstrapInfo, text: &str) {
    let cleaned: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if cleaned.is_empty() {
        return;
    }
    match BASE64.decode(cleaned.as_bytes()) {
        Ok(data) => entry.data = data,
        Err(e) => warn!(error = %e, "couldn't decode bootstrap info body"),
    }
}
