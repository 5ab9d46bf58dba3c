//! Deterministic simulated driver.
//!
//! Stands in for the real automation backend in tests and demos. Outcomes
//! are pure functions of the action and session state, failures can be
//! scripted, and in-flight counters expose what the queue actually ran
//! concurrently.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use workcell_core::{StepAction, StepError, StepOutcome, StepResult};

use crate::session::AgentSession;
use crate::StepDriver;

#[derive(Default)]
pub struct SimulatedDriver {
    latency: Option<Duration>,
    scripted_failures: Mutex<VecDeque<StepError>>,
    repeating_failure: Mutex<Option<StepError>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add artificial per-action latency, for exercising wave timing.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue `count` copies of `error`; each `perform` call consumes one
    /// before succeeding again.
    pub fn script_failures(&self, error: StepError, count: usize) {
        let mut failures = self.scripted_failures.lock().unwrap();
        for _ in 0..count {
            failures.push_back(error.clone());
        }
    }

    /// Fail every call from now on with `error`.
    pub fn fail_always(&self, error: StepError) {
        *self.repeating_failure.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of `perform` calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn take_scripted_failure(&self) -> Option<StepError> {
        if let Some(err) = self.scripted_failures.lock().unwrap().pop_front() {
            return Some(err);
        }
        self.repeating_failure.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepDriver for SimulatedDriver {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn perform(
        &self,
        session: Option<&mut AgentSession>,
        action: &StepAction,
    ) -> StepResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let result = self.perform_inner(session, action).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl SimulatedDriver {
    async fn perform_inner(
        &self,
        session: Option<&mut AgentSession>,
        action: &StepAction,
    ) -> StepResult {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = self.take_scripted_failure() {
            return Err(err);
        }

        let current_url = session
            .as_ref()
            .and_then(|s| s.current_url.clone())
            .unwrap_or_else(|| "about:blank".to_string());

        match action {
            StepAction::Navigate { url } => {
                if let Some(session) = session {
                    session.current_url = Some(url.clone());
                }
                Ok(StepOutcome::with_data(json!({
                    "url": url,
                    "title": format!("Page at {}", url),
                })))
            }
            StepAction::Click { selector } => Ok(StepOutcome::with_data(json!({
                "selector": selector,
                "clicked": true,
            }))),
            StepAction::Type { selector, text } => {
                if let Some(session) = session {
                    session
                        .local_state
                        .insert(selector.clone(), json!(text.clone()));
                }
                Ok(StepOutcome::with_data(json!({
                    "selector": selector,
                    "typedChars": text.chars().count(),
                })))
            }
            StepAction::Select { selector, value } => Ok(StepOutcome::with_data(json!({
                "selector": selector,
                "selected": value,
            }))),
            StepAction::Wait { duration_ms } => {
                Ok(StepOutcome::with_log(format!("waited {}ms", duration_ms)))
            }
            StepAction::Screenshot { full_page } => Ok(StepOutcome {
                screenshot: Some(format!("sim-capture:{}:{}", current_url, full_page)),
                ..StepOutcome::default()
            }),
            StepAction::Extract {
                selector,
                attribute,
            } => Ok(StepOutcome::with_data(json!({
                "selector": selector,
                "attribute": attribute,
                "content": format!("content of {} at {}", selector, current_url),
            }))),
            StepAction::Evaluate { script } => Ok(StepOutcome::with_data(json!({
                "script": script,
                "result": "ok",
            }))),
            StepAction::HttpRequest { url, method, body } => Ok(StepOutcome::with_data(json!({
                "url": url,
                "method": method,
                "status": 200,
                "body": body.clone().unwrap_or(json!({})),
            }))),
            StepAction::FileOp {
                operation, path, ..
            } => Ok(StepOutcome::with_data(json!({
                "operation": operation,
                "path": path,
                "ok": true,
            }))),
            StepAction::Custom { name, .. } => Err(StepError::unsupported(name)),
        }
    }
}
