pub mod data;

mod auth;
mod parameters;
mod rate_limit;

use std::error::Error;
use std::fs::OpenOptions;
use std::io::prelude::*;

use rouille::Request;
use rouille::Response;
use url::Url;

use self::auth::AuthProvider;
use self::auth::StaticTokenAuth;
use self::data::ErrorMessage;
use self::data::ProbeResponse;
use self::parameters::RequestParameters;
use self::rate_limit::BuiltinRateLimiter;
use self::rate_limit::RateLimitDecision;
use self::rate_limit::RateLimiter;
use crate::config::Config;
use crate::probe::ConnectionTester;
use crate::probe::MetadataExtractor;
use crate::probe::StreamProbe;

fn add_cors(result: Response) -> Response {
    result
        .with_unique_header("Access-Control-Allow-Origin", "*")
        .with_unique_header(
            "Access-Control-Allow-Headers",
            "origin, x-requested-with, content-type, authorization",
        )
        .with_unique_header("Access-Control-Allow-Methods", "POST")
}

pub fn run(config: Config) {
    let listen_str = format!("{}:{}", config.listen_host, config.listen_port);
    info!("Listen on {} with {} threads", listen_str, config.threads);
    let pool_size: Option<usize> = Some(config.threads);
    let probe = StreamProbe::new(
        config.probe_timeout,
        config.connect_timeout,
        config.metadata_floor,
        &config.useragent,
    );
    let auth = StaticTokenAuth::new(config.admin_tokens.clone());
    let limiter = BuiltinRateLimiter::new(config.rate_limit, config.rate_limit_window);
    let log_dir = config.log_dir.clone();
    rouille::start_server_with_pool(listen_str, pool_size, move |request| {
        handle_connection(&probe, &auth, &limiter, request, &log_dir)
    });
}

fn log_to_file(file_name: &str, line: &str) {
    let file = OpenOptions::new()
        .write(true)
        .append(true)
        .create(true)
        .open(file_name);

    match file {
        Ok(mut file) => {
            if let Err(e) = writeln!(file, "{}", line) {
                error!("Couldn't write to file: {}", e);
            }
        }
        Err(err) => {
            error!("Could not open log file {}", err);
        }
    }
}

fn handle_connection<C: ConnectionTester, M: MetadataExtractor>(
    probe: &StreamProbe<C, M>,
    auth: &dyn AuthProvider,
    limiter: &dyn RateLimiter,
    request: &Request,
    log_dir: &str,
) -> Response {
    let remote_ip: String = request
        .header("X-Forwarded-For")
        .unwrap_or(&request.remote_addr().ip().to_string())
        .to_string();
    let referer: String = request.header("Referer").unwrap_or("-").to_string();
    let user_agent: String = request.header("User-agent").unwrap_or("-").to_string();

    let now = chrono::Utc::now().format("%d/%m/%Y:%H:%M:%S%.6f");
    let log_ok = |req: &Request, resp: &Response, _elap: std::time::Duration| {
        let line = format!(
            r#"{} - - [{}] "{} {}" {} {} "{}" "{}""#,
            remote_ip,
            now,
            req.method(),
            req.raw_url(),
            resp.status_code,
            0,
            referer,
            user_agent
        );
        debug!("{}", line);
        let log_file = format!("{}/access.log", log_dir);
        log_to_file(&log_file, &line);
    };
    let log_err = |req: &Request, _elap: std::time::Duration| {
        let line = format!(
            "{} {} Handler panicked: {} {}",
            remote_ip,
            now,
            req.method(),
            req.raw_url()
        );
        debug!("{}", line);
        let log_file = format!("{}/error.log", log_dir);
        log_to_file(&log_file, &line);
    };
    rouille::log_custom(request, log_ok, log_err, || {
        let result = handle_connection_internal(probe, auth, limiter, request);
        match result {
            Ok(response) => response,
            Err(err) => {
                error!("unexpected error while handling request: {}", err);
                ErrorMessage::new("Internal server error").get_response(500)
            }
        }
    })
}

fn handle_connection_internal<C: ConnectionTester, M: MetadataExtractor>(
    probe: &StreamProbe<C, M>,
    auth: &dyn AuthProvider,
    limiter: &dyn RateLimiter,
    request: &Request,
) -> Result<Response, Box<dyn Error>> {
    if request.method() != "POST" {
        return Ok(add_cors(Response::empty_404()));
    }

    let parts: Vec<&str> = request.raw_url().split('?').collect();
    let items: Vec<&str> = parts[0].split('/').collect();
    if items.len() == 4 {
        let format = items[1];
        let command = items[2];
        let action = items[3];
        match (command, action) {
            ("streams", "test") => match format {
                "json" => Ok(add_cors(handle_stream_test(probe, auth, limiter, request))),
                _ => Ok(add_cors(Response::empty_406())),
            },
            _ => Ok(add_cors(Response::empty_404())),
        }
    } else {
        Ok(add_cors(Response::empty_404()))
    }
}

fn handle_stream_test<C: ConnectionTester, M: MetadataExtractor>(
    probe: &StreamProbe<C, M>,
    auth: &dyn AuthProvider,
    limiter: &dyn RateLimiter,
    request: &Request,
) -> Response {
    let token = request
        .header("Authorization")
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or("");
    if !auth.is_admin(token) {
        return ErrorMessage::new("Not authorized").get_response(401);
    }

    // rate limited per token, anonymous callers per ip
    let remote_ip: String = request
        .header("X-Forwarded-For")
        .unwrap_or(&request.remote_addr().ip().to_string())
        .to_string();
    let caller = if token.is_empty() {
        remote_ip
    } else {
        token.to_string()
    };
    if let RateLimitDecision::Denied {
        retry_after_seconds,
    } = limiter.check(&caller)
    {
        return ErrorMessage::new("Too many stream tests, try again later")
            .with_retry_after(retry_after_seconds)
            .get_response(429);
    }

    let params = RequestParameters::new(request);
    let stream_url = match params.get_string("streamUrl") {
        Some(stream_url) if !stream_url.trim().is_empty() => stream_url,
        _ => return ErrorMessage::new("streamUrl is required").get_response(400),
    };
    match Url::parse(&stream_url) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {}
        _ => {
            return ErrorMessage::new("streamUrl must be an absolute http or https url")
                .get_response(400)
        }
    }

    info!("stream test requested for {}", stream_url);
    let result = probe.probe(&stream_url);
    let (response, status_code) = ProbeResponse::from_result(result);
    response.get_response(status_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::models::*;
    use std::io::Read;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedTester {
        outcome: StreamTestOutcome,
    }

    impl ConnectionTester for FixedTester {
        fn test_stream_connection(&self, _url: &str) -> StreamTestOutcome {
            self.outcome.clone()
        }
    }

    struct FixedExtractor {
        result: MetadataExtractionResult,
        calls: Arc<AtomicU32>,
    }

    impl FixedExtractor {
        fn new(result: MetadataExtractionResult) -> Self {
            FixedExtractor {
                result,
                calls: Arc::new(AtomicU32::new(0)),
            }
        }

        fn call_counter(&self) -> Arc<AtomicU32> {
            self.calls.clone()
        }
    }

    impl MetadataExtractor for FixedExtractor {
        fn get_current_song(
            &self,
            _url: &str,
            _time_budget: Duration,
        ) -> MetadataExtractionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn working_probe() -> StreamProbe<FixedTester, FixedExtractor> {
        StreamProbe::with_parts(
            FixedTester {
                outcome: StreamTestOutcome::valid(200, Some("audio/mpeg".to_string()), 1200),
            },
            FixedExtractor::new(MetadataExtractionResult::ok(
                StreamMetadata {
                    stream_title: Some("Artist - Song".to_string()),
                    ..Default::default()
                },
                30,
            )),
            10000,
            3000,
        )
    }

    fn open_auth() -> StaticTokenAuth {
        StaticTokenAuth::new(vec![])
    }

    fn wide_limiter() -> BuiltinRateLimiter {
        BuiltinRateLimiter::new(1000, Duration::from_secs(60))
    }

    fn post_json(url: &str, body: &str, token: Option<&str>) -> Request {
        let mut headers = vec![("Content-Type".to_owned(), "application/json".to_owned())];
        if let Some(token) = token {
            headers.push(("Authorization".to_owned(), format!("Bearer {}", token)));
        }
        Request::fake_http("POST", url, headers, body.as_bytes().to_vec())
    }

    fn body_json(response: Response) -> serde_json::Value {
        let (mut reader, _) = response.data.into_reader_and_size();
        let mut raw = String::new();
        reader.read_to_string(&mut raw).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    fn handle<C: ConnectionTester, M: MetadataExtractor>(
        probe: &StreamProbe<C, M>,
        auth: &dyn AuthProvider,
        limiter: &dyn RateLimiter,
        request: &Request,
    ) -> Response {
        handle_connection_internal(probe, auth, limiter, request).unwrap()
    }

    #[test]
    fn successful_probe_returns_the_full_body() {
        let probe = working_probe();
        let request = post_json(
            "/json/streams/test",
            r#"{"streamUrl":"http://stream.example/live"}"#,
            None,
        );
        let response = handle(&probe, &open_auth(), &wide_limiter(), &request);
        assert_eq!(response.status_code, 200);
        let body = body_json(response);
        assert_eq!(body["success"], true);
        assert_eq!(body["status"], "success");
        assert_eq!(body["details"]["statusCode"], 200);
        assert_eq!(body["metadata"]["streamTitle"], "Artist - Song");
    }

    #[test]
    fn missing_stream_url_is_a_400() {
        let probe = working_probe();
        let request = post_json("/json/streams/test", r#"{}"#, None);
        let response = handle(&probe, &open_auth(), &wide_limiter(), &request);
        assert_eq!(response.status_code, 400);
        let body = body_json(response);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "streamUrl is required");
    }

    #[test]
    fn non_http_scheme_is_a_400() {
        let probe = working_probe();
        let request = post_json(
            "/json/streams/test",
            r#"{"streamUrl":"ftp://stream.example/live"}"#,
            None,
        );
        let response = handle(&probe, &open_auth(), &wide_limiter(), &request);
        assert_eq!(response.status_code, 400);
    }

    #[test]
    fn relative_url_is_a_400() {
        let probe = working_probe();
        let request = post_json("/json/streams/test", r#"{"streamUrl":"/live.mp3"}"#, None);
        let response = handle(&probe, &open_auth(), &wide_limiter(), &request);
        assert_eq!(response.status_code, 400);
    }

    #[test]
    fn missing_token_is_a_401_when_tokens_are_configured() {
        let probe = working_probe();
        let auth = StaticTokenAuth::new(vec!["secret".to_string()]);
        let request = post_json(
            "/json/streams/test",
            r#"{"streamUrl":"http://stream.example/live"}"#,
            None,
        );
        let response = handle(&probe, &auth, &wide_limiter(), &request);
        assert_eq!(response.status_code, 401);
    }

    #[test]
    fn known_token_passes_auth() {
        let probe = working_probe();
        let auth = StaticTokenAuth::new(vec!["secret".to_string()]);
        let request = post_json(
            "/json/streams/test",
            r#"{"streamUrl":"http://stream.example/live"}"#,
            Some("secret"),
        );
        let response = handle(&probe, &auth, &wide_limiter(), &request);
        assert_eq!(response.status_code, 200);
    }

    #[test]
    fn rate_limit_is_a_429_with_a_retry_hint() {
        let probe = working_probe();
        let auth = open_auth();
        let limiter = BuiltinRateLimiter::new(1, Duration::from_secs(60));
        let request = post_json(
            "/json/streams/test",
            r#"{"streamUrl":"http://stream.example/live"}"#,
            None,
        );
        let first = handle(&probe, &auth, &limiter, &request);
        assert_eq!(first.status_code, 200);
        let second = handle(&probe, &auth, &limiter, &request);
        assert_eq!(second.status_code, 429);
        let body = body_json(second);
        assert!(body["retryAfterSeconds"].as_u64().unwrap() >= 1);
    }

    #[test]
    fn connection_timeout_maps_to_408() {
        let extractor =
            FixedExtractor::new(MetadataExtractionResult::failed("never".to_string(), None));
        let extractor_calls = extractor.call_counter();
        let probe = StreamProbe::with_parts(
            FixedTester {
                outcome: StreamTestOutcome::failed(
                    FailureKind::Timeout,
                    None,
                    None,
                    "Stream connection test timed out".to_string(),
                    10000,
                ),
            },
            extractor,
            10000,
            3000,
        );
        let request = post_json(
            "/json/streams/test",
            r#"{"streamUrl":"http://stream.example/live"}"#,
            None,
        );
        let response = handle(&probe, &open_auth(), &wide_limiter(), &request);
        assert_eq!(response.status_code, 408);
        let body = body_json(response);
        assert_eq!(body["error"], "Stream connection test timed out");
        assert_eq!(extractor_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_connection_is_still_a_200_with_a_failure_body() {
        let extractor =
            FixedExtractor::new(MetadataExtractionResult::failed("never".to_string(), None));
        let extractor_calls = extractor.call_counter();
        let probe = StreamProbe::with_parts(
            FixedTester {
                outcome: StreamTestOutcome::failed(
                    FailureKind::BadStatus,
                    Some(404),
                    None,
                    "Stream not found".to_string(),
                    140,
                ),
            },
            extractor,
            10000,
            3000,
        );
        let request = post_json(
            "/json/streams/test",
            r#"{"streamUrl":"http://stream.example/gone"}"#,
            None,
        );
        let response = handle(&probe, &open_auth(), &wide_limiter(), &request);
        assert_eq!(response.status_code, 200);
        let body = body_json(response);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Stream not found");
        assert_eq!(extractor_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn metadata_failure_stays_advisory_in_the_body() {
        let probe = StreamProbe::with_parts(
            FixedTester {
                outcome: StreamTestOutcome::valid(200, Some("audio/aac".to_string()), 900),
            },
            FixedExtractor::new(MetadataExtractionResult::failed(
                "Metadata not supported by this server".to_string(),
                Some(15),
            )),
            10000,
            3000,
        );
        let request = post_json(
            "/json/streams/test",
            r#"{"streamUrl":"http://stream.example/live"}"#,
            None,
        );
        let response = handle(&probe, &open_auth(), &wide_limiter(), &request);
        assert_eq!(response.status_code, 200);
        let body = body_json(response);
        assert_eq!(body["success"], true);
        assert_eq!(
            body["metadataError"],
            "Metadata not supported by this server"
        );
        assert!(body.get("metadata").is_none());
    }

    #[test]
    fn unknown_paths_are_404() {
        let probe = working_probe();
        let request = post_json("/json/other", r#"{}"#, None);
        let response = handle(&probe, &open_auth(), &wide_limiter(), &request);
        assert_eq!(response.status_code, 404);
    }

    #[test]
    fn unknown_format_is_406() {
        let probe = working_probe();
        let request = post_json(
            "/xml/streams/test",
            r#"{"streamUrl":"http://stream.example/live"}"#,
            None,
        );
        let response = handle(&probe, &open_auth(), &wide_limiter(), &request);
        assert_eq!(response.status_code, 406);
    }

    #[test]
    fn get_requests_are_404() {
        let probe = working_probe();
        let request = Request::fake_http("GET", "/json/streams/test", vec![], vec![]);
        let response = handle(&probe, &open_auth(), &wide_limiter(), &request);
        assert_eq!(response.status_code, 404);
    }
}
