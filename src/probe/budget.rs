/// Derives the metadata extractor's time budget from what the connection
/// test already consumed. A slow connection eats into the budget but can
/// never push it below the floor.
pub fn derive_metadata_budget(
    connection_response_time_ms: Option<u32>,
    overall_ceiling_ms: u32,
    floor_ms: u32,
) -> u32 {
    let consumed = connection_response_time_ms.unwrap_or(0);
    overall_ceiling_ms.saturating_sub(consumed).max(floor_ms)
}
