use std::sync::Arc;

use serde_json::{Map, Value};

use botbridge_core::divergence::{Divergence, DivergenceRegistry};
use botbridge_core::outbound::{
    ApiMethod, FailureReason, Outcome, OutboundRequest, SubstituteAction, params,
};

use crate::format::strip_formatting;
use crate::transport::{BotTransport, TransportError};

/// How much of a method the upstream actually implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodSupport {
    Supported,
    /// Absent upstream, but a documented substitute exists.
    Degraded,
    /// Absent upstream with no safe substitute.
    Unsupported,
}

/// Per-deployment capability map: method availability plus parameter-level
/// quirks. Built from config; the router consults it on every call.
#[derive(Debug, Clone)]
pub struct CapabilityTable {
    send_message: MethodSupport,
    edit_message: MethodSupport,
    chat_action: MethodSupport,
    answer_callback: MethodSupport,
    reply_references: bool,
    parse_mode: bool,
    callback_needs_chat: bool,
}

impl CapabilityTable {
    /// A fully conformant upstream.
    pub fn full() -> Self {
        Self {
            send_message: MethodSupport::Supported,
            edit_message: MethodSupport::Supported,
            chat_action: MethodSupport::Supported,
            answer_callback: MethodSupport::Supported,
            reply_references: true,
            parse_mode: true,
            callback_needs_chat: false,
        }
    }

    pub fn without_edit_message(mut self) -> Self {
        self.edit_message = MethodSupport::Degraded;
        self
    }

    pub fn without_chat_action(mut self) -> Self {
        self.chat_action = MethodSupport::Degraded;
        self
    }

    pub fn without_answer_callback(mut self) -> Self {
        self.answer_callback = MethodSupport::Degraded;
        self
    }

    pub fn without_reply_references(mut self) -> Self {
        self.reply_references = false;
        self
    }

    pub fn without_parse_mode(mut self) -> Self {
        self.parse_mode = false;
        self
    }

    pub fn with_callback_chat_requirement(mut self) -> Self {
        self.callback_needs_chat = true;
        self
    }

    pub fn set_support(&mut self, method: ApiMethod, support: MethodSupport) {
        match method {
            ApiMethod::SendMessage => self.send_message = support,
            ApiMethod::EditMessageText => self.edit_message = support,
            ApiMethod::SendChatAction => self.chat_action = support,
            ApiMethod::AnswerCallbackQuery => self.answer_callback = support,
        }
    }

    pub fn support(&self, method: ApiMethod) -> MethodSupport {
        match method {
            ApiMethod::SendMessage => self.send_message,
            ApiMethod::EditMessageText => self.edit_message,
            ApiMethod::SendChatAction => self.chat_action,
            ApiMethod::AnswerCallbackQuery => self.answer_callback,
        }
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        Self::full()
    }
}

/// Executes outbound calls, substituting degraded-but-safe behavior for
/// capabilities the upstream lacks. Substitutions happen in place of the
/// original call (no queueing), so per-chat ordering is whatever the caller
/// requested. Nothing here mutates the registry.
pub struct CapabilityRouter {
    registry: Arc<DivergenceRegistry>,
    table: CapabilityTable,
    transport: Arc<dyn BotTransport>,
}

impl CapabilityRouter {
    pub fn new(
        registry: Arc<DivergenceRegistry>,
        table: CapabilityTable,
        transport: Arc<dyn BotTransport>,
    ) -> Self {
        Self {
            registry,
            table,
            transport,
        }
    }

    pub async fn invoke(&self, request: &OutboundRequest) -> Outcome {
        if let Err(detail) = request.validate() {
            return Outcome::Failed {
                reason: FailureReason::InvalidRequest { detail },
            };
        }

        match request.method {
            ApiMethod::SendMessage => self.send_message(request).await,
            ApiMethod::EditMessageText => self.edit_message(request).await,
            ApiMethod::SendChatAction => self.send_chat_action(request).await,
            ApiMethod::AnswerCallbackQuery => self.answer_callback(request).await,
        }
    }

    async fn send_message(&self, request: &OutboundRequest) -> Outcome {
        if self.table.support(ApiMethod::SendMessage) != MethodSupport::Supported {
            // There is nothing safe to send a message *with* instead.
            return Outcome::Failed {
                reason: FailureReason::Unsupported {
                    method: ApiMethod::SendMessage,
                },
            };
        }

        let (wire_params, reply_unattached) = self.prepare_send_params(request.params.clone());
        match self
            .transport
            .call(ApiMethod::SendMessage.wire_name(), &wire_params)
            .await
        {
            Ok(result) => Outcome::Delivered {
                message_id: extract_message_id(&result),
                reply_unattached,
            },
            Err(err) => failed(err),
        }
    }

    async fn edit_message(&self, request: &OutboundRequest) -> Outcome {
        match self.table.support(ApiMethod::EditMessageText) {
            MethodSupport::Supported => {
                let (wire_params, _) = self.prepare_send_params(request.params.clone());
                match self
                    .transport
                    .call(ApiMethod::EditMessageText.wire_name(), &wire_params)
                    .await
                {
                    Ok(result) => Outcome::Delivered {
                        message_id: extract_message_id(&result)
                            .or_else(|| request.param_i64(params::MESSAGE_ID)),
                        reply_unattached: false,
                    },
                    Err(err) => failed(err),
                }
            }
            MethodSupport::Degraded => {
                // Substitute: send a fresh message carrying the same text.
                // The caller gets the new id and must track it as a distinct
                // message.
                self.log_substitution(
                    Divergence::EditMessageUnsupported,
                    "editMessageText substituted with sendMessage",
                );
                let mut send_params = Map::new();
                for key in [params::CHAT_ID, params::TEXT, params::PARSE_MODE, params::REPLY_MARKUP]
                {
                    if let Some(v) = request.params.get(key) {
                        send_params.insert(key.to_string(), v.clone());
                    }
                }
                let (wire_params, _) = self.prepare_send_params(send_params);
                match self
                    .transport
                    .call(ApiMethod::SendMessage.wire_name(), &wire_params)
                    .await
                {
                    Ok(result) => Outcome::Degraded {
                        substitute: SubstituteAction::SentNewMessage,
                        message_id: extract_message_id(&result),
                    },
                    Err(err) => failed(err),
                }
            }
            MethodSupport::Unsupported => Outcome::Failed {
                reason: FailureReason::Unsupported {
                    method: ApiMethod::EditMessageText,
                },
            },
        }
    }

    async fn send_chat_action(&self, request: &OutboundRequest) -> Outcome {
        // Purely cosmetic: an absent upstream implementation is a silent
        // no-op, never an error.
        if self.table.support(ApiMethod::SendChatAction) != MethodSupport::Supported {
            self.log_substitution(
                Divergence::ChatActionUnsupported,
                "sendChatAction skipped: not implemented upstream",
            );
            return Outcome::Degraded {
                substitute: SubstituteAction::Skipped,
                message_id: None,
            };
        }
        match self
            .transport
            .call(ApiMethod::SendChatAction.wire_name(), &request.params)
            .await
        {
            Ok(_) => Outcome::Delivered {
                message_id: None,
                reply_unattached: false,
            },
            Err(err) => failed(err),
        }
    }

    async fn answer_callback(&self, request: &OutboundRequest) -> Outcome {
        if self.table.support(ApiMethod::AnswerCallbackQuery) != MethodSupport::Supported {
            // The button stops spinning on its own; skipping beats failing
            // the whole interaction.
            self.log_substitution(
                Divergence::CallbackNeedsChatContext,
                "answerCallbackQuery skipped: not implemented upstream",
            );
            return Outcome::Degraded {
                substitute: SubstituteAction::Skipped,
                message_id: None,
            };
        }

        let mut wire_params = request.params.clone();
        if self.table.callback_needs_chat {
            if !wire_params.contains_key(params::CHAT_ID) {
                return Outcome::Failed {
                    reason: FailureReason::CallbackContextMissing,
                };
            }
            self.log_substitution(
                Divergence::CallbackNeedsChatContext,
                "supplied originating chat id to answerCallbackQuery",
            );
        } else {
            // A conformant remote does not know this parameter.
            wire_params.remove(params::CHAT_ID);
        }

        match self
            .transport
            .call(ApiMethod::AnswerCallbackQuery.wire_name(), &wire_params)
            .await
        {
            Ok(_) => Outcome::Delivered {
                message_id: None,
                reply_unattached: false,
            },
            Err(err) => failed(err),
        }
    }

    /// Apply parameter-level capabilities to an outgoing message body:
    /// strip unsupported reply references and formatting.
    fn prepare_send_params(&self, mut wire_params: Map<String, Value>) -> (Map<String, Value>, bool) {
        let mut reply_unattached = false;

        if !self.table.reply_references
            && wire_params.remove(params::REPLY_TO_MESSAGE_ID).is_some()
        {
            self.log_substitution(
                Divergence::ReplyReferenceUnsupported,
                "stripped reply_to_message_id from send",
            );
            reply_unattached = true;
        }

        if !self.table.parse_mode && wire_params.remove(params::PARSE_MODE).is_some() {
            if let Some(text) = wire_params.get(params::TEXT).and_then(Value::as_str) {
                let plain = strip_formatting(text);
                wire_params.insert(params::TEXT.to_string(), Value::String(plain));
            }
            self.log_substitution(
                Divergence::FormattingUnsupported,
                "stripped formatting markers before send",
            );
        }

        (wire_params, reply_unattached)
    }

    fn log_substitution(&self, divergence: Divergence, message: &str) {
        if self.registry.log_loudly(divergence) {
            tracing::info!("[{divergence}] {message}");
        } else {
            tracing::debug!("[{divergence}] {message}");
        }
    }
}

fn failed(err: TransportError) -> Outcome {
    let reason = match err {
        TransportError::Timeout => FailureReason::Timeout,
        TransportError::Io(detail) => FailureReason::Transport { detail },
        TransportError::Remote { description } => FailureReason::Remote { description },
    };
    Outcome::Failed { reason }
}

/// Message ids in responses suffer the same string-typing as inbound ids.
fn extract_message_id(result: &Value) -> Option<i64> {
    match result.get("message_id") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}
