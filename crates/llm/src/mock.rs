//! Scripted Planners
//!
//! Offline planners for tests and for the `mock` provider type.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::plan::{PlanDecision, PlanOutcome, PlanRequest, Planner};
use crate::config::ProviderConfig;
use crate::error::{LlmError, LlmResult};
use pixlie_core::streaming::ProviderEvent;

/// Replays a fixed list of decisions.
///
/// When the script runs out, the last decision repeats if `repeat_last` is
/// set; otherwise planning fails.
pub struct ScriptedPlanner {
    name: String,
    script: Mutex<VecDeque<PlanDecision>>,
    last: Mutex<Option<PlanDecision>>,
    repeat_last: bool,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl ScriptedPlanner {
    pub fn new(script: Vec<PlanDecision>) -> Self {
        Self {
            name: "scripted".to_string(),
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            repeat_last: false,
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    /// A planner that returns the same decision forever.
    pub fn repeating(decision: PlanDecision) -> Self {
        let mut planner = Self::new(vec![decision]);
        planner.repeat_last = true;
        planner
    }

    /// Build from a `mock` provider config.
    ///
    /// `options.script` holds the decisions as JSON; `options.repeat_last`
    /// toggles repetition.
    pub fn from_config(config: &ProviderConfig) -> LlmResult<Self> {
        let script = match config.options.get("script") {
            Some(value) => serde_json::from_value::<Vec<PlanDecision>>(value.clone()).map_err(
                |e| LlmError::invalid_request(format!("Invalid mock script: {}", e)),
            )?,
            None => vec![PlanDecision::FinalAnswer {
                text: "The mock provider has no script configured.".to_string(),
                data: serde_json::Value::Null,
            }],
        };
        let repeat_last = config
            .options
            .get("repeat_last")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let mut planner = Self::new(script).with_name(format!("mock:{}", config.model));
        planner.repeat_last = repeat_last;
        Ok(planner)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sleep before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of plan calls received.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_decision(&self) -> LlmResult<PlanDecision> {
        let next = self
            .script
            .lock()
            .map_err(|_| LlmError::other("scripted planner lock poisoned"))?
            .pop_front();
        let mut last = self.last.lock().map_err(|_| LlmError::other("scripted planner lock poisoned"))?;
        match next {
            Some(decision) => {
                *last = Some(decision.clone());
                Ok(decision)
            }
            None if self.repeat_last => last.clone().ok_or_else(|| LlmError::other("empty script")),
            None => Err(LlmError::other("script exhausted")),
        }
    }

    async fn answer(&self) -> LlmResult<PlanOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let decision = self.next_decision()?;
        let mut outcome = PlanOutcome::new(decision, self.name.clone());
        if let PlanDecision::FinalAnswer { text, .. } = &outcome.decision {
            outcome.response_text = Some(text.clone());
        }
        Ok(outcome)
    }
}

/// Split text into word-sized chunks, keeping the separators.
fn chunk_text(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if ch == ' ' {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl Planner for ScriptedPlanner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn plan(&self, _request: &PlanRequest) -> LlmResult<PlanOutcome> {
        self.answer().await
    }

    async fn plan_stream(
        &self,
        _request: &PlanRequest,
        tx: mpsc::Sender<ProviderEvent>,
    ) -> LlmResult<PlanOutcome> {
        let outcome = self.answer().await?;
        if let PlanDecision::FinalAnswer { text, .. } = &outcome.decision {
            for chunk in chunk_text(text) {
                let _ = tx.send(ProviderEvent::TextDelta { content: chunk }).await;
            }
        }
        let _ = tx
            .send(ProviderEvent::Complete {
                stop_reason: Some(outcome.decision.kind().to_string()),
            })
            .await;
        Ok(outcome)
    }
}

/// Fails every call with the same error.
pub struct FailingPlanner {
    name: String,
    error: LlmError,
    calls: AtomicU32,
}

impl FailingPlanner {
    pub fn new(name: impl Into<String>, error: LlmError) -> Self {
        Self {
            name: name.into(),
            error,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Planner for FailingPlanner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn plan(&self, _request: &PlanRequest) -> LlmResult<PlanOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }

    async fn plan_stream(
        &self,
        request: &PlanRequest,
        _tx: mpsc::Sender<ProviderEvent>,
    ) -> LlmResult<PlanOutcome> {
        self.plan(request).await
    }
}
