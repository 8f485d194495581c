use serde::Deserialize;
use serde_json::Value;

use common::error::FeedError;
use common::models::{ChannelEvent, Signal};

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>, // Parsed once we know the frame type.
}

/// Decodes one push frame.
///
/// `Ok(None)` is a well-formed frame of a type this client does not handle;
/// those are skipped, not treated as errors.
pub fn parse_frame(text: &str) -> Result<Option<ChannelEvent>, FeedError> {
    let raw: RawFrame = serde_json::from_str(text)
        .map_err(|e| FeedError::MalformedMessage(format!("not a typed frame: {e}")))?;

    match raw.kind.as_str() {
        "connected" => Ok(Some(ChannelEvent::Connected)),
        "signal" => {
            let data = raw.data.ok_or_else(|| {
                FeedError::MalformedMessage("signal frame without data".to_string())
            })?;
            let signal = serde_json::from_value::<Signal>(data)
                .map_err(|e| FeedError::MalformedMessage(format!("bad signal payload: {e}")))?;
            Ok(Some(ChannelEvent::Signal(signal)))
        }
        _ => Ok(None),
    }
}
