// =============================================================================
// Wire formats — depth diff events and REST snapshot responses
// =============================================================================

use serde::Deserialize;

/// A single `depthUpdate` event from the combined WebSocket stream.
///
/// `pu` (previous final update id) is only present on the futures stream;
/// spot sequencing does not use it (SPEC_FULL.md §4.1).
#[derive(Debug, Clone, Deserialize)]
pub struct DepthDiff {
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "pu")]
    pub prev_final_update_id: Option<u64>,
    #[serde(rename = "b")]
    pub bids: Vec<(String, String)>,
    #[serde(rename = "a")]
    pub asks: Vec<(String, String)>,
}

/// A REST `/depth` snapshot response.
#[derive(Debug, Clone, Deserialize)]
pub struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<(String, String)>,
    pub asks: Vec<(String, String)>,
}
