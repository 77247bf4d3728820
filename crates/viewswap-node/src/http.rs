//! HTTP transport adapter
//!
//! A chat gateway posts each participant action to `POST /v1/actions` and
//! relays the returned messages. Messages the engine sends while handling
//! the action are collected in the [`OutboxRenderer`] and drained into the
//! response, together with the ids of messages the gateway should delete.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use viewswap_core::{
    ActionEnvelope, MessageId, OutboundMessage, ParticipantId, Renderer, TransportError,
};
use viewswap_engine::ExchangeEngine;
use viewswap_storage::LinkLedger;

/// A message waiting for the gateway to deliver it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub id: MessageId,
    #[serde(flatten)]
    pub message: OutboundMessage,
}

#[derive(Debug, Default)]
struct Outbox {
    pending: Vec<RenderedMessage>,
    retracted: Vec<MessageId>,
}

/// Renderer that queues messages per participant until the gateway drains them
#[derive(Debug, Default)]
pub struct OutboxRenderer {
    outboxes: DashMap<ParticipantId, Outbox>,
    next_id: AtomicU64,
}

impl OutboxRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything queued for a participant
    ///
    /// Messages retracted before they were drained are dropped from the
    /// pending list instead of being reported as retracted.
    pub fn drain(&self, participant: ParticipantId) -> (Vec<RenderedMessage>, Vec<MessageId>) {
        match self.outboxes.remove(&participant) {
            Some((_, outbox)) => (outbox.pending, outbox.retracted),
            None => (Vec::new(), Vec::new()),
        }
    }
}

#[async_trait]
impl Renderer for OutboxRenderer {
    async fn send(
        &self,
        participant: ParticipantId,
        message: OutboundMessage,
    ) -> Result<MessageId, TransportError> {
        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.outboxes
            .entry(participant)
            .or_default()
            .pending
            .push(RenderedMessage { id, message });
        Ok(id)
    }

    async fn retract(
        &self,
        participant: ParticipantId,
        message: MessageId,
    ) -> Result<(), TransportError> {
        let mut outbox = self.outboxes.entry(participant).or_default();
        let before = outbox.pending.len();
        outbox.pending.retain(|m| m.id != message);
        if outbox.pending.len() == before {
            outbox.retracted.push(message);
        }
        Ok(())
    }
}

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub engine: Arc<ExchangeEngine>,
    pub outbox: Arc<OutboxRenderer>,
    pub links: Arc<dyn LinkLedger>,
}

/// Reply to one posted action
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionResponse {
    pub messages: Vec<RenderedMessage>,
    /// Previously delivered messages the gateway should delete
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retracted: Vec<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub links: usize,
    pub sessions: usize,
}

/// Build the router
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/v1/actions", post(post_action))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// `POST /v1/actions`: run one action and return what to show the participant
pub async fn post_action(
    State(state): State<HttpState>,
    Json(envelope): Json<ActionEnvelope>,
) -> (StatusCode, Json<ActionResponse>) {
    let participant = envelope.participant;
    let result = state.engine.handle(envelope).await;
    let (messages, retracted) = state.outbox.drain(participant);

    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(ActionResponse {
                messages,
                retracted,
                error: None,
            }),
        ),
        Err(e) => {
            warn!(%participant, error = %e, "Action failed");
            // The participant was already told to try again.
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ActionResponse {
                    messages,
                    retracted,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

/// `GET /healthz`
pub async fn healthz(State(state): State<HttpState>) -> (StatusCode, Json<HealthResponse>) {
    match state.links.count().await {
        Ok(links) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                links,
                sessions: state.engine.sessions().len(),
            }),
        ),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded".to_string(),
                    links: 0,
                    sessions: state.engine.sessions().len(),
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outbox_drains_in_order() {
        let outbox = OutboxRenderer::new();
        let alice = ParticipantId::new(1);

        let first = outbox.send(alice, OutboundMessage::text("one")).await.unwrap();
        let second = outbox.send(alice, OutboundMessage::text("two")).await.unwrap();
        assert!(second.0 > first.0);

        let (messages, retracted) = outbox.drain(alice);
        let texts: Vec<_> = messages.iter().map(|m| m.message.text.as_str()).collect();
        assert_eq!(texts, ["one", "two"]);
        assert!(retracted.is_empty());
        assert!(outbox.drain(alice).0.is_empty());
    }

    #[tokio::test]
    async fn test_retract_before_and_after_drain() {
        let outbox = OutboxRenderer::new();
        let alice = ParticipantId::new(1);

        let delivered = outbox.send(alice, OutboundMessage::text("link")).await.unwrap();
        outbox.drain(alice);

        let queued = outbox.send(alice, OutboundMessage::text("stale")).await.unwrap();
        outbox.retract(alice, queued).await.unwrap();
        outbox.retract(alice, delivered).await.unwrap();

        let (messages, retracted) = outbox.drain(alice);
        assert!(messages.is_empty());
        assert_eq!(retracted, vec![delivered]);
    }

    #[test]
    fn test_response_json_shape() {
        let response = ActionResponse {
            messages: vec![RenderedMessage {
                id: MessageId(3),
                message: OutboundMessage::text("Main Menu:"),
            }],
            ..Default::default()
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["messages"][0]["id"], 3);
        assert_eq!(json["messages"][0]["text"], "Main Menu:");
        assert!(json.get("retracted").is_none());
        assert!(json.get("error").is_none());
    }
}
