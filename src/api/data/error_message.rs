use serde::Serialize;

/// Uniform shape for boundary rejections (bad input, auth, rate limit,
/// internal faults). Probe results use ProbeResponse instead.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    success: bool,
    status: String,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
}

impl ErrorMessage {
    pub fn new<S: Into<String>>(error: S) -> Self {
        ErrorMessage {
            success: false,
            status: String::from("error"),
            error: error.into(),
            retry_after_seconds: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after_seconds: u64) -> Self {
        self.retry_after_seconds = Some(retry_after_seconds);
        self
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
