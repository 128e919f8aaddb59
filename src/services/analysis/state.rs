//! Shared Objective State
//!
//! The state one analysis loop shares with the coordinator. The loop is the
//! only writer; the coordinator takes snapshots and subscribes.
//!
//! Finished steps are published to the broadcast channel while the ledger
//! write lock is held, and subscribers snapshot the ledger and subscribe under
//! the read lock, so a subscriber sees every finished step exactly once.

use tokio::sync::{broadcast, RwLock};

use pixlie_core::{Conversation, ConversationStep};

use crate::models::objective::Objective;
use crate::services::streaming::StreamEvent;

/// Capacity of the per-objective broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Conversation plus the live event sender, guarded together.
#[derive(Debug)]
pub struct LedgerState {
    pub conversation: Conversation,
    /// `None` once the objective is terminal or no loop is attached
    pub events: Option<broadcast::Sender<StreamEvent>>,
}

impl LedgerState {
    /// Publish a finished step to live subscribers.
    pub fn publish_step(&self, step: ConversationStep) {
        if let Some(events) = &self.events {
            // No receivers is fine: nobody is watching.
            let _ = events.send(StreamEvent::ToolExecution { step });
        }
    }

    /// Publish streamed planner text.
    pub fn publish_content(&self, content: String) {
        if let Some(events) = &self.events {
            let _ = events.send(StreamEvent::Content { content });
        }
    }

    /// Finished steps with an id above `after`, in order.
    pub fn finished_steps_after(&self, after: u32) -> Vec<ConversationStep> {
        self.conversation
            .steps()
            .iter()
            .filter(|s| s.step_id() > after && s.status().is_finished())
            .cloned()
            .collect()
    }
}

/// Objective and ledger of one running or restored objective.
#[derive(Debug)]
pub struct SharedObjective {
    pub objective: RwLock<Objective>,
    pub ledger: RwLock<LedgerState>,
}

impl SharedObjective {
    pub fn new(objective: Objective, conversation: Conversation) -> Self {
        Self {
            objective: RwLock::new(objective),
            ledger: RwLock::new(LedgerState {
                conversation,
                events: None,
            }),
        }
    }

    /// Open a fresh broadcast channel for a loop about to start.
    pub async fn attach_events(&self) -> broadcast::Sender<StreamEvent> {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        self.ledger.write().await.events = Some(tx.clone());
        tx
    }

    /// Drop the stored sender so subscriptions end once the loop's clone is gone.
    pub async fn detach_events(&self) {
        self.ledger.write().await.events = None;
    }

    pub async fn conversation(&self) -> Conversation {
        self.ledger.read().await.conversation.clone()
    }

    pub async fn objective(&self) -> Objective {
        self.objective.read().await.clone()
    }
}
