//! Client Stream Events
//!
//! What subscribers of an objective receive: streamed planner text and
//! finished ledger steps.

use serde::{Deserialize, Serialize};

use pixlie_core::ConversationStep;

/// One event on an objective's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental planner text
    Content { content: String },
    /// A step that reached Completed or Failed
    ToolExecution { step: ConversationStep },
}

impl StreamEvent {
    /// Step id carried by a step event.
    pub fn step_id(&self) -> Option<u32> {
        match self {
            StreamEvent::ToolExecution { step } => Some(step.step_id()),
            StreamEvent::Content { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let event = StreamEvent::Content {
            content: "42 ".into(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "content", "content": "42 "})
        );
        assert_eq!(event.step_id(), None);
    }
}
