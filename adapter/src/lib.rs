//! Compatibility adapter between a partially-conformant Bot-API upstream
//! and clients written against the canonical contract.
//!
//! Inbound payloads go through [`Adapter::normalize`], which fixes the
//! documented field-level divergences and synthesizes the structure the
//! upstream omits. Outbound calls go through [`Adapter::invoke`], which
//! substitutes degraded-but-safe behavior for capabilities the upstream
//! lacks. Both sides are gated by the divergence registry, so a correction
//! can be downgraded to a defensive no-op by flipping a record, not by
//! editing call sites.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use botbridge_core::divergence::DivergenceRegistry;
use botbridge_core::error::NormalizeError;
use botbridge_core::event::NormalizedEvent;
use botbridge_core::outbound::{Outcome, OutboundRequest};

pub mod config;
pub mod entities;
pub mod format;
pub mod normalize;
pub mod router;
pub mod transport;

pub use config::{AdapterConfig, ConfigError};
pub use entities::EntitySynthesizer;
pub use router::{CapabilityRouter, CapabilityTable, MethodSupport};
pub use transport::{BotTransport, HttpTransport, TransportError};

/// The one surface collaborators use. Stateless beyond the registry, the
/// synthesizer's metric counter, and the transport handle.
pub struct Adapter {
    registry: Arc<DivergenceRegistry>,
    synthesizer: EntitySynthesizer,
    router: CapabilityRouter,
}

impl Adapter {
    pub fn new(
        registry: Arc<DivergenceRegistry>,
        table: CapabilityTable,
        transport: Arc<dyn BotTransport>,
    ) -> Self {
        Self {
            router: CapabilityRouter::new(registry.clone(), table, transport),
            registry,
            synthesizer: EntitySynthesizer::new(),
        }
    }

    /// Wire up an adapter from config: HTTP transport, capability table,
    /// registry with overrides applied.
    pub fn from_config(config: &AdapterConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(
            &config.api_base_url,
            &config.api_token,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self::new(
            Arc::new(config.registry()),
            config.capability_table(),
            Arc::new(transport),
        ))
    }

    /// Normalize a raw webhook payload into a canonical event.
    pub fn normalize(&self, raw: &Value) -> Result<NormalizedEvent, NormalizeError> {
        normalize::normalize_update(raw, &self.registry, &self.synthesizer)
    }

    /// Execute an outbound call, degrading where the upstream falls short.
    pub async fn invoke(&self, request: &OutboundRequest) -> Outcome {
        self.router.invoke(request).await
    }

    /// The live registry, for status overrides and diagnostics.
    pub fn registry(&self) -> &DivergenceRegistry {
        &self.registry
    }

    /// Mentions dropped during normalization since startup.
    pub fn dropped_mentions(&self) -> u64 {
        self.synthesizer.dropped_mentions()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use botbridge_core::divergence::{Divergence, DivergenceStatus};
    use botbridge_core::event::CanonicalEvent;
    use botbridge_core::outbound::{Outcome, OutboundRequest, SubstituteAction};

    use super::*;
    use crate::transport::testing::MockTransport;

    fn adapter_with(table: CapabilityTable, transport: Arc<MockTransport>) -> Adapter {
        Adapter::new(Arc::new(DivergenceRegistry::new()), table, transport)
    }

    #[tokio::test]
    async fn normalize_then_reply_round_trip() {
        let transport = Arc::new(MockTransport::with_message_id(200));
        let adapter = adapter_with(
            CapabilityTable::full().without_reply_references(),
            transport.clone(),
        );

        let normalized = adapter
            .normalize(&json!({
                "update_id": 9,
                "message": {
                    "message_id": "12",
                    "from": { "id": "31337", "first_name": "Ada", "is_bot": false },
                    "chat": { "id": "g_450", "type": "group", "title": "readers" },
                    "text": "/luck",
                },
            }))
            .expect("normalize");

        let CanonicalEvent::Message(msg) = &normalized.event else {
            panic!("expected message");
        };
        assert_eq!(msg.chat.id, -450);

        let outcome = adapter
            .invoke(
                &OutboundRequest::send_message(msg.chat.id, "今日运势：大吉")
                    .with_reply_to(msg.message_id),
            )
            .await;
        assert_eq!(
            outcome,
            Outcome::Delivered {
                message_id: Some(200),
                reply_unattached: true,
            }
        );
        assert_eq!(transport.called_methods(), vec!["sendMessage"]);
    }

    #[tokio::test]
    async fn registry_flip_changes_facade_behavior_between_calls() {
        let transport = Arc::new(MockTransport::with_message_id(1));
        let adapter = adapter_with(CapabilityTable::full(), transport);

        let raw = json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "from": { "id": 5, "first_name": "Ada" },
                "chat": { "id": 5, "type": "private" },
                "text": "hi",
            },
        });

        adapter
            .registry()
            .set_status(Divergence::UserMissingBotFlag, DivergenceStatus::Unfixed);
        assert!(adapter.normalize(&raw).is_ok());

        adapter.registry().set_status(
            Divergence::UserMissingBotFlag,
            DivergenceStatus::FixedObserved,
        );
        assert!(adapter.normalize(&raw).is_err());
    }

    #[tokio::test]
    async fn degraded_edit_through_the_facade() {
        let transport = Arc::new(MockTransport::with_message_id(321));
        let adapter = adapter_with(
            CapabilityTable::full().without_edit_message(),
            transport,
        );

        let outcome = adapter
            .invoke(&OutboundRequest::edit_message_text(5, 1, "new text"))
            .await;
        assert_eq!(
            outcome,
            Outcome::Degraded {
                substitute: SubstituteAction::SentNewMessage,
                message_id: Some(321),
            }
        );
    }
}
