use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;

use crate::probe::models::{FailureKind, StreamTestOutcome};
use crate::probe::ConnectionTester;

/// Connection tester backed by a real http client.
///
/// Opens a minimal request against the stream url, classifies the answer and
/// drops the connection as soon as the classification is possible. Radio
/// streams never terminate on their own, so no body bytes are read here.
pub struct HttpConnectionTester {
    timeout: Duration,
    connect_timeout: Duration,
    useragent: String,
}

impl HttpConnectionTester {
    pub fn new(timeout: Duration, connect_timeout: Duration, useragent: &str) -> Self {
        HttpConnectionTester {
            timeout,
            connect_timeout,
            useragent: useragent.to_string(),
        }
    }

    fn send(&self, client: &Client, method: Method, url: &str, timeout: Duration) -> reqwest::Result<Response> {
        client.request(method, url).timeout(timeout).send()
    }
}

impl ConnectionTester for HttpConnectionTester {
    fn test_stream_connection(&self, url: &str) -> StreamTestOutcome {
        let started = Instant::now();
        let client = match Client::builder()
            .user_agent(&self.useragent)
            .connect_timeout(self.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                error!("unable to create http client: {}", err);
                return StreamTestOutcome::failed(
                    FailureKind::Unreachable,
                    None,
                    None,
                    format!("Unable to create http client: {}", err),
                    elapsed_ms(started),
                );
            }
        };

        // HEAD is cheaper, but a number of stream servers mishandle it.
        // Whenever HEAD does not produce a usable answer, retry once with a
        // GET that reads no body. Both attempts share one ceiling.
        let head_result = self.send(&client, Method::HEAD, url, self.timeout);
        match head_result {
            Ok(response) if acceptable_status(&response) => classify_response(response, started),
            head_result => {
                let remaining = self.timeout.saturating_sub(started.elapsed());
                if remaining > Duration::ZERO {
                    match self.send(&client, Method::GET, url, remaining) {
                        Ok(response) => classify_response(response, started),
                        Err(get_err) => match head_result {
                            // HEAD at least got an answer, report its status
                            Ok(response) => classify_response(response, started),
                            Err(_) => classify_error(get_err, started),
                        },
                    }
                } else {
                    match head_result {
                        Ok(response) => classify_response(response, started),
                        Err(err) => classify_error(err, started),
                    }
                }
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u32 {
    started.elapsed().as_millis().min(u32::MAX as u128) as u32
}

fn acceptable_status(response: &Response) -> bool {
    let code = response.status().as_u16();
    (200..400).contains(&code)
}

fn classify_response(response: Response, started: Instant) -> StreamTestOutcome {
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());
    // drops (and thereby aborts) the connection, the body is never read
    drop(response);

    let elapsed = elapsed_ms(started);
    if !(200..400).contains(&status) {
        return StreamTestOutcome::failed(
            FailureKind::BadStatus,
            Some(status),
            content_type,
            status_message(status),
            elapsed,
        );
    }
    if !is_audio_content_type(content_type.as_deref()) {
        return StreamTestOutcome::failed(
            FailureKind::NotAudio,
            Some(status),
            content_type,
            String::from("URL is not an audio stream"),
            elapsed,
        );
    }
    StreamTestOutcome::valid(status, content_type, elapsed)
}

fn classify_error(err: reqwest::Error, started: Instant) -> StreamTestOutcome {
    let elapsed = elapsed_ms(started);
    if err.is_timeout() {
        StreamTestOutcome::failed(
            FailureKind::Timeout,
            None,
            None,
            String::from("Stream connection test timed out"),
            elapsed,
        )
    } else {
        StreamTestOutcome::failed(
            FailureKind::Unreachable,
            None,
            None,
            format!("Connection failed: {}", err),
            elapsed,
        )
    }
}

fn status_message(status: u16) -> String {
    match status {
        404 => String::from("Stream not found"),
        401 | 403 => String::from("Access to stream denied"),
        500..=599 => String::from("Stream server error"),
        _ => format!("Stream responded with status {}", status),
    }
}

/// Recognized audio/stream content type patterns. Legacy Shoutcast servers
/// send no content-type header at all, that case still counts as a stream.
fn is_audio_content_type(content_type: Option<&str>) -> bool {
    let content_type = match content_type {
        Some(content_type) => content_type,
        None => return true,
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    essence.starts_with("audio/") || essence == "application/ogg" || essence == "application/x-ogg"
}
