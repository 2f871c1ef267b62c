use serde::{Deserialize, Serialize};

/// Why a connection test did not produce a valid stream. Not part of the
/// wire format, the boundary uses it to pick the right http status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The tester's own ceiling elapsed before a response arrived.
    Timeout,
    /// DNS / TLS / connect / other transport error.
    Unreachable,
    /// Response status outside [200,399].
    BadStatus,
    /// Reachable, but the content type is not an audio stream.
    NotAudio,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamTestOutcome {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub response_time_ms: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip)]
    pub failure: Option<FailureKind>,
}

impl StreamTestOutcome {
    pub fn valid(status_code: u16, content_type: Option<String>, response_time_ms: u32) -> Self {
        StreamTestOutcome {
            is_valid: true,
            status_code: Some(status_code),
            response_time_ms,
            content_type,
            error_message: None,
            failure: None,
        }
    }

    pub fn failed(
        failure: FailureKind,
        status_code: Option<u16>,
        content_type: Option<String>,
        error_message: String,
        response_time_ms: u32,
    ) -> Self {
        StreamTestOutcome {
            is_valid: false,
            status_code,
            response_time_ms,
            content_type,
            error_message: Some(error_message),
            failure: Some(failure),
        }
    }

    pub fn timed_out(&self) -> bool {
        self.failure == Some(FailureKind::Timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    #[serde(rename = "MP3")]
    Mp3,
    #[serde(rename = "AAC")]
    Aac,
    #[serde(rename = "OGG")]
    Ogg,
    #[serde(rename = "FLAC")]
    Flac,
}

impl AudioFormat {
    /// Best-effort mapping from a content-type header value. Parameters
    /// after ';' are ignored.
    pub fn from_content_type(content_type: &str) -> Option<AudioFormat> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase();
        match essence.as_str() {
            "audio/mpeg" | "audio/mp3" | "audio/mpeg3" | "audio/x-mpeg" => Some(AudioFormat::Mp3),
            "audio/aac" | "audio/aacp" | "audio/x-aac" | "audio/mp4" => Some(AudioFormat::Aac),
            "application/ogg" | "application/x-ogg" | "audio/ogg" | "audio/vorbis" => {
                Some(AudioFormat::Ogg)
            }
            "audio/flac" | "audio/x-flac" => Some(AudioFormat::Flac),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ServerInfo {
    pub fn is_empty(&self) -> bool {
        self.software.is_none() && self.version.is_none() && self.description.is_none()
    }
}

/// Dialect specific extras, filled from whatever headers the server sends.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamExtraInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
}

impl StreamExtraInfo {
    pub fn is_empty(&self) -> bool {
        self.genre.is_none()
            && self.url.is_none()
            && self.content_type.is_none()
            && self.sample_rate.is_none()
            && self.channels.is_none()
    }
}

/// Everything the extractor could recover. A field left at None means the
/// server did not advertise it, extraction failure is signalled through
/// MetadataExtractionResult instead.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_format: Option<AudioFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<StreamExtraInfo>,
}

#[derive(Debug, Clone)]
pub struct MetadataExtractionResult {
    pub success: bool,
    pub metadata: Option<StreamMetadata>,
    pub error: Option<String>,
    pub response_time_ms: Option<u32>,
}

impl MetadataExtractionResult {
    pub fn ok(metadata: StreamMetadata, response_time_ms: u32) -> Self {
        MetadataExtractionResult {
            success: true,
            metadata: Some(metadata),
            error: None,
            response_time_ms: Some(response_time_ms),
        }
    }

    pub fn failed(error: String, response_time_ms: Option<u32>) -> Self {
        MetadataExtractionResult {
            success: false,
            metadata: None,
            error: Some(error),
            response_time_ms,
        }
    }
}

/// What the composed probe hands to the boundary. Metadata problems stay
/// advisory, the overall verdict comes from the connection test alone.
#[derive(Debug, Clone)]
pub struct CombinedProbeResult {
    pub connection: StreamTestOutcome,
    pub metadata: Option<StreamMetadata>,
    pub metadata_error: Option<String>,
}
