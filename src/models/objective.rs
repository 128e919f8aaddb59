//! Objective Models
//!
//! Objectives, their summaries and the workspace graph that persistence
//! reads and writes. Back-references between objects are ids.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pixlie_core::{Conversation, ConversationStatus, TerminalReason};

/// Lifecycle status of an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    /// Waiting to be planned (new, or restored after a restart)
    Pending,
    /// A loop is running for it
    Active,
    Completed,
    Cancelled,
    Failed,
}

impl ObjectiveStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ObjectiveStatus::Completed | ObjectiveStatus::Cancelled | ObjectiveStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectiveStatus::Pending => "pending",
            ObjectiveStatus::Active => "active",
            ObjectiveStatus::Completed => "completed",
            ObjectiveStatus::Cancelled => "cancelled",
            ObjectiveStatus::Failed => "failed",
        }
    }

    /// Objective status matching a conversation's terminal reason.
    pub fn from_terminal(reason: TerminalReason) -> Self {
        match reason.conversation_status() {
            ConversationStatus::Answered => ObjectiveStatus::Completed,
            ConversationStatus::Cancelled => ObjectiveStatus::Cancelled,
            _ => ObjectiveStatus::Failed,
        }
    }
}

impl std::fmt::Display for ObjectiveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ObjectiveStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ObjectiveStatus::Pending),
            "active" => Ok(ObjectiveStatus::Active),
            "completed" => Ok(ObjectiveStatus::Completed),
            "cancelled" => Ok(ObjectiveStatus::Cancelled),
            "failed" => Ok(ObjectiveStatus::Failed),
            other => Err(format!("unknown objective status: {}", other)),
        }
    }
}

/// One user-stated analysis goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub id: Uuid,
    /// Name of the owning workspace
    pub workspace: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub status: ObjectiveStatus,
    /// Set while the latest state failed to reach disk
    #[serde(default)]
    pub unsaved: bool,
}

impl Objective {
    pub fn new(workspace: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace: workspace.into(),
            text: text.into(),
            created_at: Utc::now(),
            status: ObjectiveStatus::Pending,
            unsaved: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// List view of an objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveSummary {
    pub id: Uuid,
    pub workspace: String,
    pub text: String,
    pub status: ObjectiveStatus,
    pub conversation_status: ConversationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_reason: Option<TerminalReason>,
    pub step_count: usize,
    pub unsaved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ObjectiveSummary {
    pub fn new(objective: &Objective, conversation: &Conversation) -> Self {
        Self {
            id: objective.id,
            workspace: objective.workspace.clone(),
            text: objective.text.clone(),
            status: objective.status,
            conversation_status: conversation.status(),
            terminal_reason: conversation.terminal_reason(),
            step_count: conversation.steps().len(),
            unsaved: objective.unsaved,
            created_at: objective.created_at,
            updated_at: conversation.updated_at(),
        }
    }
}

/// An objective with its ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveRecord {
    pub objective: Objective,
    pub conversation: Conversation,
}

/// Durable root holding a set of objectives.
#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    pub name: String,
    /// Directory containing workspace.db
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Objectives in creation order
    pub objectives: Vec<ObjectiveRecord>,
}

impl Workspace {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            created_at: Utc::now(),
            objectives: Vec::new(),
        }
    }

    pub fn objective(&self, id: Uuid) -> Option<&ObjectiveRecord> {
        self.objectives.iter().find(|r| r.objective.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_strings() {
        for status in [
            ObjectiveStatus::Pending,
            ObjectiveStatus::Active,
            ObjectiveStatus::Completed,
            ObjectiveStatus::Cancelled,
            ObjectiveStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ObjectiveStatus>().unwrap(), status);
        }
        assert!("paused".parse::<ObjectiveStatus>().is_err());
    }

    #[test]
    fn test_status_from_terminal_reason() {
        assert_eq!(
            ObjectiveStatus::from_terminal(TerminalReason::Answered),
            ObjectiveStatus::Completed
        );
        assert_eq!(
            ObjectiveStatus::from_terminal(TerminalReason::UserCancelled),
            ObjectiveStatus::Cancelled
        );
        assert_eq!(
            ObjectiveStatus::from_terminal(TerminalReason::MaxIterationsExceeded),
            ObjectiveStatus::Failed
        );
    }

    #[test]
    fn test_summary_counts_steps() {
        let objective = Objective::new("ws", "count distinct authors");
        let mut conversation = Conversation::new(objective.id, &objective.text);
        conversation
            .begin_step(pixlie_core::StepType::Planning)
            .unwrap();
        let summary = ObjectiveSummary::new(&objective, &conversation);
        assert_eq!(summary.step_count, 1);
        assert_eq!(summary.status, ObjectiveStatus::Pending);
        assert_eq!(summary.conversation_status, ConversationStatus::Active);
    }
}
