//! Objective Subscriptions
//!
//! A subscription replays the finished steps already in the ledger, then
//! follows the live broadcast until the loop closes it. Step events are
//! delivered in `step_id` order without duplicates; a lagging receiver is
//! resynchronized from the ledger instead of skipping steps.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use pixlie_core::ConversationStep;

use super::events::StreamEvent;
use crate::services::analysis::SharedObjective;

/// Ledger replay followed by live events for one objective.
pub struct Subscription {
    shared: Arc<SharedObjective>,
    replay: VecDeque<ConversationStep>,
    live: Option<broadcast::Receiver<StreamEvent>>,
    last_step_id: u32,
}

impl Subscription {
    /// Snapshot the ledger and attach to the live channel atomically.
    pub async fn open(shared: Arc<SharedObjective>) -> Self {
        let (replay, live) = {
            let ledger = shared.ledger.read().await;
            let replay: VecDeque<_> = ledger.finished_steps_after(0).into();
            let live = ledger.events.as_ref().map(|tx| tx.subscribe());
            (replay, live)
        };
        Self {
            shared,
            replay,
            live,
            last_step_id: 0,
        }
    }

    /// Whether live events will follow the replay.
    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Next event, or `None` when the objective's stream is closed.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(step) = self.replay.pop_front() {
                self.last_step_id = step.step_id();
                return Some(StreamEvent::ToolExecution { step });
            }

            let live = self.live.as_mut()?;
            match live.recv().await {
                Ok(event) => match event.step_id() {
                    Some(id) if id <= self.last_step_id => continue,
                    Some(id) => {
                        self.last_step_id = id;
                        return Some(event);
                    }
                    None => return Some(event),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged, resyncing from ledger");
                    let ledger = self.shared.ledger.read().await;
                    self.replay = ledger.finished_steps_after(self.last_step_id).into();
                }
                Err(RecvError::Closed) => {
                    self.live = None;
                    // Catch steps that raced the close.
                    let ledger = self.shared.ledger.read().await;
                    self.replay = ledger.finished_steps_after(self.last_step_id).into();
                }
            }
        }
    }
}
