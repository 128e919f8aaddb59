//! Server-Sent Events Encoding
//!
//! Frames are `data: <json>\n\n`; the stream always ends with
//! `data: [DONE]\n\n`, also when the objective was already terminal.

use std::convert::Infallible;

use futures_util::stream::{self, Stream};
use tracing::warn;

use super::events::StreamEvent;
use super::subscription::Subscription;

/// Final frame of every stream
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Content type of the stream endpoint
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Encode one event as an SSE data frame.
pub fn encode_event(event: &StreamEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(format!("data: {}\n\n", json)),
        Err(e) => {
            warn!(error = %e, "dropping unserializable stream event");
            None
        }
    }
}

enum Phase {
    Events(Subscription),
    Done,
}

/// Turn a subscription into a byte-ready SSE frame stream.
pub fn sse_frames(subscription: Subscription) -> impl Stream<Item = Result<String, Infallible>> {
    stream::unfold(Some(Phase::Events(subscription)), |phase| async move {
        match phase? {
            Phase::Events(mut sub) => loop {
                match sub.next().await {
                    Some(event) => {
                        if let Some(frame) = encode_event(&event) {
                            return Some((Ok(frame), Some(Phase::Events(sub))));
                        }
                    }
                    None => return Some((Ok(DONE_FRAME.to_string()), Some(Phase::Done))),
                }
            },
            Phase::Done => None,
        }
    })
}

/// Parse the data payloads out of an SSE body (used by clients and tests).
pub fn parse_frames(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}
