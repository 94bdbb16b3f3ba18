/*
[INPUT]:  Raw WebSocket text frames
[OUTPUT]: Parsed ServerFrame values and the heartbeat sentinel
[POS]:    WebSocket layer - message parsing and validation
[UPDATE]: When adding new message types or changing format
*/

use serde::Deserialize;

use crate::types::TaskSnapshot;

/// Client heartbeat probe. The only frame a client ever sends.
pub const HEARTBEAT_SENTINEL: &str = r#"{"action":"ping"}"#;

/// Decoded server frame on a progress stream
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Heartbeat acknowledgment
    Pong,
    /// Task progress record
    Progress(TaskSnapshot),
}

#[derive(Deserialize)]
struct ControlFrame {
    #[serde(alias = "type")]
    action: String,
}

/// Decode one text frame.
///
/// Control frames are recognised by an `action` (or `type`) field equal to
/// `pong`; everything else must be a task snapshot.
pub fn decode_frame(text: &str) -> Result<ServerFrame, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if let Ok(control) = ControlFrame::deserialize(&value)
        && control.action.eq_ignore_ascii_case("pong")
    {
        return Ok(ServerFrame::Pong);
    }
    let snapshot = TaskSnapshot::deserialize(value)?;
    Ok(ServerFrame::Progress(snapshot))
}
