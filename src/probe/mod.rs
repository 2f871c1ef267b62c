mod budget;
mod connection;
mod metadata;
pub mod models;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

pub use budget::derive_metadata_budget;
pub use connection::HttpConnectionTester;
pub use metadata::IcyMetadataExtractor;

use models::CombinedProbeResult;
use models::MetadataExtractionResult;
use models::StreamTestOutcome;

/// Fast reachability check. Implementations never panic or error for
/// ordinary network conditions, everything is reported in the outcome.
pub trait ConnectionTester {
    fn test_stream_connection(&self, url: &str) -> StreamTestOutcome;
}

/// In-band metadata extraction under a hard time budget. Same contract:
/// anticipated failures are reported in the result, never raised.
pub trait MetadataExtractor {
    fn get_current_song(&self, url: &str, time_budget: Duration) -> MetadataExtractionResult;
}

/// Composes the connection test, the budget derivation and the metadata
/// extraction into one probe. The two network operations run strictly in
/// sequence, metadata is only attempted once reachability is confirmed.
pub struct StreamProbe<C, M> {
    tester: C,
    extractor: M,
    overall_ceiling_ms: u32,
    metadata_floor_ms: u32,
}

impl StreamProbe<HttpConnectionTester, IcyMetadataExtractor> {
    pub fn new(
        probe_timeout: Duration,
        connect_timeout: Duration,
        metadata_floor: Duration,
        useragent: &str,
    ) -> Self {
        StreamProbe {
            tester: HttpConnectionTester::new(probe_timeout, connect_timeout, useragent),
            extractor: IcyMetadataExtractor::new(connect_timeout, useragent),
            overall_ceiling_ms: probe_timeout.as_millis().min(u32::MAX as u128) as u32,
            metadata_floor_ms: metadata_floor.as_millis().min(u32::MAX as u128) as u32,
        }
    }
}

impl<C: ConnectionTester, M: MetadataExtractor> StreamProbe<C, M> {
    #[cfg(test)]
    pub(crate) fn with_parts(tester: C, extractor: M, overall_ceiling_ms: u32, metadata_floor_ms: u32) -> Self {
        StreamProbe {
            tester,
            extractor,
            overall_ceiling_ms,
            metadata_floor_ms,
        }
    }

    pub fn probe(&self, url: &str) -> CombinedProbeResult {
        let connection = self.tester.test_stream_connection(url);
        if !connection.is_valid {
            debug!(
                "connection test failed for {} ({}ms): {}",
                url,
                connection.response_time_ms,
                connection.error_message.as_deref().unwrap_or("-")
            );
            return CombinedProbeResult {
                connection,
                metadata: None,
                metadata_error: None,
            };
        }

        let budget_ms = derive_metadata_budget(
            Some(connection.response_time_ms),
            self.overall_ceiling_ms,
            self.metadata_floor_ms,
        );
        debug!(
            "connection test ok for {} ({}ms), metadata budget {}ms",
            url, connection.response_time_ms, budget_ms
        );

        // the extractor reports its own failures, catch_unwind is only the
        // last resort for faults it did not anticipate
        let extraction = catch_unwind(AssertUnwindSafe(|| {
            self.extractor
                .get_current_song(url, Duration::from_millis(budget_ms.into()))
        }));

        match extraction {
            Ok(result) if result.success => CombinedProbeResult {
                connection,
                metadata: result.metadata,
                metadata_error: None,
            },
            Ok(result) => CombinedProbeResult {
                connection,
                metadata: None,
                metadata_error: Some(
                    result
                        .error
                        .unwrap_or_else(|| String::from("Metadata extraction failed")),
                ),
            },
            Err(_) => {
                warn!("metadata extraction panicked for {}", url);
                CombinedProbeResult {
                    connection,
                    metadata: None,
                    metadata_error: Some(String::from("Metadata extraction failed unexpectedly")),
                }
            }
        }
    }
}
