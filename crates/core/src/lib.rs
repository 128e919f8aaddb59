//! Pixlie Core
//!
//! The types every other crate in the engine agrees on: the conversation
//! ledger, the tool contract and registry, provider stream events, and the
//! error taxonomy. Nothing here touches the network, the database or the
//! async runtime.
//!
//! - `ledger` - objectives, steps and tool executions (`Conversation`, `ConversationStep`)
//! - `tool` - `ToolSpec` + `ToolHandler` and the frozen `ToolRegistry`
//! - `context` - what a tool call knows about its caller (`ToolContext`)
//! - `streaming` - `ProviderEvent` and the `LineDecoder` trait
//! - `error` - `CoreError`

pub mod context;
pub mod error;
pub mod ledger;
pub mod streaming;
pub mod tool;

pub use context::{CallLimits, ToolContext};
pub use error::{CoreError, CoreResult};
pub use ledger::{
    Conversation, ConversationStatus, ConversationStep, LlmUsage, StepResult, StepStatus, StepType,
    TerminalReason, ToolExecution, ToolOutcome,
};
pub use streaming::{DecodeError, LineDecoder, ProviderEvent};
pub use tool::{AnalysisTool, ToolConstraints, ToolDescriptor, ToolHandler, ToolRegistry, ToolSpec};
