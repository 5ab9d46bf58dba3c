//! Remote automation driver.
//!
//! Thin HTTP client in front of a remote-control backend: each action is
//! posted as JSON and the JSON body of the reply becomes the step outcome.
//! `http_request` actions skip the backend and hit the target URL directly.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use workcell_core::{StepAction, StepError, StepErrorKind, StepOutcome, StepResult};

use crate::session::AgentSession;
use crate::StepDriver;

pub struct RemoteDriver {
    endpoint: String,
    client: reqwest::Client,
}

impl RemoteDriver {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn call_backend(&self, session: Option<&AgentSession>, action: &StepAction) -> StepResult {
        let url = format!("{}/v1/steps", self.endpoint);
        let payload = json!({
            "sessionId": session.map(|s| s.id.clone()),
            "viewport": session.map(|s| s.viewport),
            "action": action,
        });

        debug!(action = action.name(), url = %url, "Dispatching step to remote backend");

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StepError::driver(format!(
                "backend returned {} for '{}'",
                status,
                action.name()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| StepError::driver(format!("invalid backend response: {}", e)))?;

        Ok(StepOutcome {
            data: body.get("data").cloned(),
            screenshot: body
                .get("screenshot")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            log: body
                .get("log")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        })
    }

    async fn direct_request(&self, url: &str, method: &str, body: Option<&Value>) -> StepResult {
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| StepError::missing_param("method"))?;

        let mut request = self.client.request(method.clone(), url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status().as_u16();
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        Ok(StepOutcome::with_data(json!({
            "url": url,
            "method": method.as_str(),
            "status": status,
            "body": payload,
        })))
    }
}

fn map_transport_error(e: reqwest::Error) -> StepError {
    if e.is_timeout() {
        StepError::new(StepErrorKind::Timeout, format!("request timed out: {}", e), true)
    } else {
        StepError::network(e.to_string())
    }
}

#[async_trait]
impl StepDriver for RemoteDriver {
    fn name(&self) -> &str {
        "remote"
    }

    async fn perform(
        &self,
        session: Option<&mut AgentSession>,
        action: &StepAction,
    ) -> StepResult {
        match action {
            StepAction::HttpRequest { url, method, body } => {
                self.direct_request(url, method, body.as_ref()).await
            }
            StepAction::Custom { name, .. } => Err(StepError::unsupported(name)),
            _ => {
                let result = self.call_backend(session.as_deref(), action).await;
                if result.is_ok() {
                    if let (Some(session), StepAction::Navigate { url }) = (session, action) {
                        session.current_url = Some(url.clone());
                    }
                }
                result
            }
        }
    }
}
