use std::io;
use std::io::Read;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, CONTENT_TYPE};

use crate::probe::models::{
    AudioFormat, MetadataExtractionResult, ServerInfo, StreamExtraInfo, StreamMetadata,
};
use crate::probe::MetadataExtractor;

/// Shoutcast metadata block lengths are given in units of 16 bytes.
const METADATA_BLOCK_UNIT: usize = 16;
/// Interleave intervals above this are treated as a server bug instead of
/// blindly discarding megabytes of audio.
const MAX_METAINT: usize = 1024 * 1024;
const AUDIO_DISCARD_CHUNK: usize = 8192;

/// Canonical names for the header aliases the Shoutcast/Icecast/Audiocast
/// dialects use. Applied permissively, first alias present wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetaField {
    Name,
    Description,
    Genre,
    Url,
    Bitrate,
    SampleRate,
    Channels,
}

const HEADER_ALIASES: &[(&str, MetaField)] = &[
    ("icy-name", MetaField::Name),
    ("ice-name", MetaField::Name),
    ("x-audiocast-name", MetaField::Name),
    ("icy-description", MetaField::Description),
    ("ice-description", MetaField::Description),
    ("x-audiocast-description", MetaField::Description),
    ("icy-genre", MetaField::Genre),
    ("ice-genre", MetaField::Genre),
    ("x-audiocast-genre", MetaField::Genre),
    ("icy-url", MetaField::Url),
    ("ice-url", MetaField::Url),
    ("x-audiocast-url", MetaField::Url),
    ("icy-br", MetaField::Bitrate),
    ("ice-bitrate", MetaField::Bitrate),
    ("x-audiocast-bitrate", MetaField::Bitrate),
    ("icy-sr", MetaField::SampleRate),
    ("ice-samplerate", MetaField::SampleRate),
    ("icy-channels", MetaField::Channels),
    ("ice-channels", MetaField::Channels),
];

/// Metadata extractor speaking the in-band ICY dialect.
///
/// One connection does it all: request metadata interleaving, inspect the
/// response headers, then conditionally read up to the first metadata block.
/// Whether the server supports interleaving at all is only learned from the
/// headers of this same connection.
pub struct IcyMetadataExtractor {
    connect_timeout: Duration,
    useragent: String,
}

impl IcyMetadataExtractor {
    pub fn new(connect_timeout: Duration, useragent: &str) -> Self {
        IcyMetadataExtractor {
            connect_timeout,
            useragent: useragent.to_string(),
        }
    }

    fn extract(
        &self,
        url: &str,
        time_budget: Duration,
        started: Instant,
    ) -> Result<StreamMetadata, String> {
        let client = Client::builder()
            .user_agent(&self.useragent)
            .connect_timeout(self.connect_timeout.min(time_budget))
            .timeout(time_budget)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|err| format!("Unable to create http client: {}", err))?;

        let mut response = client
            .get(url)
            .header("Icy-MetaData", "1")
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    String::from("Metadata extraction timed out")
                } else {
                    format!("Connection failed: {}", err)
                }
            })?;

        if !response.status().is_success() {
            return Err(format!(
                "Stream responded with status {}",
                response.status().as_u16()
            ));
        }

        let metadata = metadata_from_headers(response.headers());

        let metaint = match header_number(response.headers(), "icy-metaint") {
            Some(metaint) => metaint,
            None => return Err(String::from("Metadata not supported by this server")),
        };
        if metaint == 0 || metaint > MAX_METAINT {
            return Err(format!(
                "Server advertised an implausible metadata interval ({})",
                metaint
            ));
        }
        trace!("{}: metadata interval {} acknowledged", url, metaint);

        discard_audio(&mut response, metaint, time_budget, started)?;
        let block = read_metadata_block(&mut response, time_budget, started)?;

        let mut metadata = metadata;
        if let Some(block) = block {
            trace!("{}: metadata block '{}'", url, block);
            apply_icy_block(&block, &mut metadata);
        }
        Ok(metadata)
    }
}

impl MetadataExtractor for IcyMetadataExtractor {
    fn get_current_song(&self, url: &str, time_budget: Duration) -> MetadataExtractionResult {
        let started = Instant::now();
        // connection is dropped on every path out of extract()
        let result = self.extract(url, time_budget, started);
        let elapsed = started.elapsed().as_millis().min(u32::MAX as u128) as u32;
        match result {
            Ok(metadata) => MetadataExtractionResult::ok(metadata, elapsed),
            Err(error) => {
                debug!("metadata extraction failed for {}: {}", url, error);
                MetadataExtractionResult::failed(error, Some(elapsed))
            }
        }
    }
}

/// Reads and throws away the audio bytes preceding the first metadata block.
fn discard_audio(
    response: &mut Response,
    metaint: usize,
    time_budget: Duration,
    started: Instant,
) -> Result<(), String> {
    let mut remaining = metaint;
    let mut buf = [0u8; AUDIO_DISCARD_CHUNK];
    while remaining > 0 {
        if started.elapsed() >= time_budget {
            return Err(String::from("Metadata extraction timed out"));
        }
        let want = remaining.min(buf.len());
        match response.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(String::from(
                    "Stream ended before a metadata block was received",
                ))
            }
            Ok(n) => remaining -= n,
            Err(err) => return Err(read_error(err, time_budget, started)),
        }
    }
    Ok(())
}

/// Reads the length prefixed metadata block that follows the audio bytes.
/// An empty block (length byte 0) is a valid frame without text.
fn read_metadata_block(
    response: &mut Response,
    time_budget: Duration,
    started: Instant,
) -> Result<Option<String>, String> {
    let mut len_byte = [0u8; 1];
    response
        .read_exact(&mut len_byte)
        .map_err(|err| read_error(err, time_budget, started))?;

    let len = len_byte[0] as usize * METADATA_BLOCK_UNIT;
    if len == 0 {
        return Ok(None);
    }

    let mut block = vec![0u8; len];
    response
        .read_exact(&mut block)
        .map_err(|err| read_error(err, time_budget, started))?;

    // blocks are NUL padded to the 16 byte unit
    while block.last() == Some(&0) {
        block.pop();
    }
    // streams routinely send latin-1 here, decode lossily
    Ok(Some(String::from_utf8_lossy(&block).into_owned()))
}

fn read_error(err: io::Error, time_budget: Duration, started: Instant) -> String {
    if is_timeout_io(&err) || started.elapsed() >= time_budget {
        String::from("Metadata extraction timed out")
    } else if err.kind() == io::ErrorKind::UnexpectedEof {
        String::from("Stream ended before a metadata block was received")
    } else {
        format!("Error while reading stream: {}", err)
    }
}

fn is_timeout_io(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::TimedOut || err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    match err.get_ref() {
        Some(inner) => inner
            .downcast_ref::<reqwest::Error>()
            .map(|e| e.is_timeout())
            .unwrap_or(false),
        None => false,
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<usize> {
    header_str(headers, name).and_then(|value| value.parse().ok())
}

fn first_header(headers: &HeaderMap, field: MetaField) -> Option<String> {
    HEADER_ALIASES
        .iter()
        .filter(|(_, f)| *f == field)
        .find_map(|(alias, _)| header_str(headers, alias))
}

/// Builds the best-effort metadata view from the response headers alone.
/// Absent headers leave the fields absent.
fn metadata_from_headers(headers: &HeaderMap) -> StreamMetadata {
    let content_type = header_str(headers, CONTENT_TYPE.as_str());

    let mut bitrate = first_header(headers, MetaField::Bitrate).and_then(|v| v.parse().ok());
    let mut sample_rate = first_header(headers, MetaField::SampleRate).and_then(|v| v.parse().ok());
    let mut channels = first_header(headers, MetaField::Channels).and_then(|v| v.parse().ok());

    // Icecast packs the same values into one composite header
    if let Some(audio_info) = header_str(headers, "ice-audio-info") {
        for (key, value) in parse_audio_info(&audio_info) {
            match key.as_str() {
                "bitrate" => bitrate = bitrate.or_else(|| value.parse().ok()),
                "samplerate" => sample_rate = sample_rate.or_else(|| value.parse().ok()),
                "channels" => channels = channels.or_else(|| value.parse().ok()),
                _ => {}
            }
        }
    }

    let server_info = server_info_from_headers(headers);
    let extra = StreamExtraInfo {
        genre: first_header(headers, MetaField::Genre),
        url: first_header(headers, MetaField::Url),
        content_type: content_type.clone(),
        sample_rate,
        channels,
    };

    StreamMetadata {
        stream_title: None,
        bitrate,
        audio_format: content_type
            .as_deref()
            .and_then(AudioFormat::from_content_type),
        server_info: if server_info.is_empty() {
            None
        } else {
            Some(server_info)
        },
        extra: if extra.is_empty() { None } else { Some(extra) },
    }
}

fn server_info_from_headers(headers: &HeaderMap) -> ServerInfo {
    let mut software = None;
    let mut version = None;

    if let Some(server) = header_str(headers, "server") {
        let (s, v) = split_software_version(&server);
        software = s;
        version = v;
    } else if let Some(notice) = header_str(headers, "icy-notice2") {
        // Shoutcast v1 hides its identity in a free text notice
        if notice.to_lowercase().contains("shoutcast") {
            software = Some(String::from("SHOUTcast"));
            version = notice
                .split_whitespace()
                .find(|token| {
                    token.len() > 1
                        && token.starts_with('v')
                        && token[1..].starts_with(|c: char| c.is_ascii_digit())
                })
                .map(|token| token[1..].to_string());
        }
    }

    let description = first_header(headers, MetaField::Description)
        .or_else(|| first_header(headers, MetaField::Name));

    ServerInfo {
        software,
        version,
        description,
    }
}

/// "Icecast 2.4.4" and "Icecast/2.4.4" both occur in the wild.
fn split_software_version(server: &str) -> (Option<String>, Option<String>) {
    let mut parts = server.splitn(2, |c| c == '/' || c == ' ');
    let software = parts
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let version = parts
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    (software, version)
}

/// key=value pairs of the ice-audio-info header, "ice-" prefixes stripped.
fn parse_audio_info(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .filter_map(|pair| {
            pair.split_once('=').map(|(key, value)| {
                (
                    key.trim().trim_start_matches("ice-").to_lowercase(),
                    value.trim().to_string(),
                )
            })
        })
        .collect()
}

/// Parses the in-band `key='value';` string and merges the known keys into
/// the metadata. Unknown keys are ignored, nothing is fabricated.
fn apply_icy_block(block: &str, metadata: &mut StreamMetadata) {
    for (key, value) in parse_icy_block(block) {
        match key.as_str() {
            "StreamTitle" => {
                if !value.is_empty() {
                    metadata.stream_title = Some(value);
                }
            }
            "StreamUrl" => {
                if !value.is_empty() {
                    metadata.extra.get_or_insert_with(Default::default).url = Some(value);
                }
            }
            _ => {}
        }
    }
}

/// Splits a metadata block into key/value pairs. Values are delimited by
/// `'...';`, apostrophes inside a value survive as long as they are not
/// directly followed by a semicolon.
fn parse_icy_block(block: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for segment in block.split("';") {
        if let Some((key, value)) = segment.split_once("='") {
            let value = value.strip_suffix('\'').unwrap_or(value);
            pairs.push((key.trim().to_string(), value.to_string()));
        }
    }
    pairs
}
