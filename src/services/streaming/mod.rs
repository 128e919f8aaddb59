//! Client Streaming
//!
//! Delivery of an objective's progress to HTTP clients:
//! - `events` - `StreamEvent` wire type
//! - `subscription` - ledger replay followed by the live broadcast
//! - `sse` - `text/event-stream` framing

pub mod events;
pub mod sse;
pub mod subscription;

pub use events::StreamEvent;
pub use sse::{encode_event, parse_frames, sse_frames, DONE_FRAME, EVENT_STREAM_CONTENT_TYPE};
pub use subscription::Subscription;
