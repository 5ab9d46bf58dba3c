//! Communication channel: per-destination mailboxes with an optional live
//! subscriber per destination.
//!
//! Everything funnels through one delivery primitive: append to the
//! destination's mailbox, then invoke its subscriber handler immediately
//! and synchronously if one is registered. Delivery is not guaranteed to a
//! handler that is registered after send; the message still sits in the
//! mailbox for polling.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use workcell_core::{AgentMessage, Error, MessageKind, Result, TaskSpec};

pub type MessageHandler = Arc<dyn Fn(&AgentMessage) + Send + Sync>;

#[derive(Default)]
struct ChannelState {
    mailboxes: HashMap<String, Vec<AgentMessage>>,
    subscribers: HashMap<String, MessageHandler>,
}

#[derive(Clone, Default)]
pub struct CommsChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl CommsChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-to-point message.
    pub async fn send(
        &self,
        from: &str,
        to: &str,
        kind: MessageKind,
        payload: Value,
    ) -> AgentMessage {
        let message = AgentMessage::new(from, to, kind, payload);
        self.deliver(message.clone()).await;
        message
    }

    /// Fan the same payload out to a list of destinations.
    pub async fn broadcast(&self, from: &str, to: &[String], payload: Value) -> Vec<AgentMessage> {
        let mut sent = Vec::with_capacity(to.len());
        for destination in to {
            let message =
                AgentMessage::new(from, destination, MessageKind::Broadcast, payload.clone());
            self.deliver(message.clone()).await;
            sent.push(message);
        }
        sent
    }

    /// Hand a task off to another agent: a typed message whose payload
    /// carries the full task spec for the receiver to resubmit.
    pub async fn handoff(&self, from: &str, to: &str, task: &TaskSpec) -> Result<AgentMessage> {
        let payload = json!({
            "task": serde_json::to_value(task)?,
            "handedOffBy": from,
        });
        let message = AgentMessage::new(from, to, MessageKind::Handoff, payload);
        self.deliver(message.clone()).await;
        Ok(message)
    }

    /// Mailbox contents for one destination, optionally unacknowledged only.
    pub async fn messages(&self, agent_id: &str, unacknowledged_only: bool) -> Vec<AgentMessage> {
        let state = self.state.lock().await;
        state
            .mailboxes
            .get(agent_id)
            .map(|mailbox| {
                mailbox
                    .iter()
                    .filter(|m| !unacknowledged_only || !m.acknowledged)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Flip the acknowledged flag. No redelivery is triggered.
    pub async fn acknowledge(&self, message_id: &str, agent_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let mailbox = state
            .mailboxes
            .get_mut(agent_id)
            .ok_or_else(|| Error::Channel(format!("no mailbox for agent '{}'", agent_id)))?;
        let message = mailbox
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| Error::NotFound(format!("message '{}'", message_id)))?;
        message.acknowledged = true;
        Ok(())
    }

    /// Register the live handler for a destination, replacing any previous
    /// one. The handler runs synchronously inside delivery.
    pub async fn subscribe(&self, agent_id: &str, handler: MessageHandler) {
        let mut state = self.state.lock().await;
        if state
            .subscribers
            .insert(agent_id.to_string(), handler)
            .is_some()
        {
            warn!(agent = %agent_id, "Replacing existing message subscriber");
        }
    }

    pub async fn unsubscribe(&self, agent_id: &str) {
        let mut state = self.state.lock().await;
        state.subscribers.remove(agent_id);
    }

    /// Drop the mailbox and subscriber of a terminated agent.
    pub async fn remove_destination(&self, agent_id: &str) {
        let mut state = self.state.lock().await;
        state.mailboxes.remove(agent_id);
        state.subscribers.remove(agent_id);
    }

    async fn deliver(&self, message: AgentMessage) {
        let handler = {
            let mut state = self.state.lock().await;
            debug!(
                from = %message.from_agent_id,
                to = %message.to_agent_id,
                kind = ?message.kind,
                "Delivering message"
            );
            state
                .mailboxes
                .entry(message.to_agent_id.clone())
                .or_default()
                .push(message.clone());
            state.subscribers.get(&message.to_agent_id).cloned()
        };
        // Invoked outside the lock so a handler may call back into the
        // channel, but still synchronously within delivery.
        if let Some(handler) = handler {
            handler(&message);
        }
    }
}
