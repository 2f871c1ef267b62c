use serde::Serialize;

use crate::probe::models::CombinedProbeResult;
use crate::probe::models::StreamMetadata;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub response_time: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Body of a completed probe, successful or not. Rejections that happen
/// before any probing (auth, rate limit, bad input) use ErrorMessage.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResponse {
    pub success: bool,
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub details: ProbeDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<StreamMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_error: Option<String>,
}

impl ProbeResponse {
    /// Maps a probe result to its body and http status. Only a timed out
    /// connection test changes the status code, every other completed
    /// probe is a 200 with the verdict in the body.
    pub fn from_result(result: CombinedProbeResult) -> (Self, u16) {
        let connection = result.connection;
        let details = ProbeDetails {
            status_code: connection.status_code,
            response_time: connection.response_time_ms,
            content_type: connection.content_type.clone(),
        };
        if connection.is_valid {
            let response = ProbeResponse {
                success: true,
                status: String::from("success"),
                message: String::from("Stream is reachable and serving audio"),
                error: None,
                details,
                metadata: result.metadata,
                metadata_error: result.metadata_error,
            };
            return (response, 200);
        }
        let status_code = if connection.timed_out() { 408 } else { 200 };
        let error = connection
            .error_message
            .unwrap_or_else(|| String::from("Stream connection test failed"));
        let response = ProbeResponse {
            success: false,
            status: String::from("failure"),
            message: error.clone(),
            error: Some(error),
            details,
            metadata: None,
            metadata_error: None,
        };
        (response, status_code)
    }

    pub fn get_response(self, status_code: u16) -> rouille::Response {
        match serde_json::to_string(&self) {
            Ok(j) => rouille::Response::text(j)
                .with_status_code(status_code)
                .with_no_cache()
                .with_unique_header("Content-Type", "application/json"),
            Err(_) => rouille::Response::text("").with_status_code(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::models::FailureKind;
    use crate::probe::models::StreamTestOutcome;

    #[test]
    fn valid_probe_maps_to_success_body() {
        let result = CombinedProbeResult {
            connection: StreamTestOutcome::valid(200, Some("audio/mpeg".to_string()), 1200),
            metadata: Some(StreamMetadata {
                stream_title: Some("Artist - Song".to_string()),
                ..Default::default()
            }),
            metadata_error: None,
        };
        let (response, status) = ProbeResponse::from_result(result);
        assert_eq!(status, 200);
        assert!(response.success);
        assert_eq!(response.status, "success");
        assert_eq!(response.details.status_code, Some(200));
        assert_eq!(
            response.metadata.unwrap().stream_title.as_deref(),
            Some("Artist - Song")
        );
    }

    #[test]
    fn metadata_failure_stays_in_a_success_body() {
        let result = CombinedProbeResult {
            connection: StreamTestOutcome::valid(200, Some("audio/aac".to_string()), 900),
            metadata: None,
            metadata_error: Some("Metadata not supported by this server".to_string()),
        };
        let (response, status) = ProbeResponse::from_result(result);
        assert_eq!(status, 200);
        assert!(response.success);
        assert_eq!(
            response.metadata_error.as_deref(),
            Some("Metadata not supported by this server")
        );
    }

    #[test]
    fn timeout_maps_to_408() {
        let result = CombinedProbeResult {
            connection: StreamTestOutcome::failed(
                FailureKind::Timeout,
                None,
                None,
                "Stream connection test timed out".to_string(),
                10000,
            ),
            metadata: None,
            metadata_error: None,
        };
        let (response, status) = ProbeResponse::from_result(result);
        assert_eq!(status, 408);
        assert!(!response.success);
        assert_eq!(
            response.error.as_deref(),
            Some("Stream connection test timed out")
        );
    }

    #[test]
    fn other_failures_map_to_200_failure_body() {
        let result = CombinedProbeResult {
            connection: StreamTestOutcome::failed(
                FailureKind::BadStatus,
                Some(404),
                None,
                "Stream not found".to_string(),
                150,
            ),
            metadata: None,
            metadata_error: None,
        };
        let (response, status) = ProbeResponse::from_result(result);
        assert_eq!(status, 200);
        assert!(!response.success);
        assert_eq!(response.status, "failure");
        assert_eq!(response.error.as_deref(), Some("Stream not found"));
        assert_eq!(response.details.status_code, Some(404));
    }
}
