use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Parameter names shared between requests and the router.
pub mod params {
    pub const CHAT_ID: &str = "chat_id";
    pub const TEXT: &str = "text";
    pub const MESSAGE_ID: &str = "message_id";
    pub const REPLY_TO_MESSAGE_ID: &str = "reply_to_message_id";
    pub const PARSE_MODE: &str = "parse_mode";
    pub const REPLY_MARKUP: &str = "reply_markup";
    pub const ACTION: &str = "action";
    pub const CALLBACK_QUERY_ID: &str = "callback_query_id";
    pub const SHOW_ALERT: &str = "show_alert";
}

/// The outbound methods the adapter fronts. Wire names follow the canonical
/// contract's camelCase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApiMethod {
    SendMessage,
    EditMessageText,
    SendChatAction,
    AnswerCallbackQuery,
}

impl ApiMethod {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::SendMessage => "sendMessage",
            Self::EditMessageText => "editMessageText",
            Self::SendChatAction => "sendChatAction",
            Self::AnswerCallbackQuery => "answerCallbackQuery",
        }
    }

    /// Declared parameter constraints for this method.
    pub fn spec(self) -> &'static MethodSpec {
        match self {
            Self::SendMessage => &SEND_MESSAGE_SPEC,
            Self::EditMessageText => &EDIT_MESSAGE_TEXT_SPEC,
            Self::SendChatAction => &SEND_CHAT_ACTION_SPEC,
            Self::AnswerCallbackQuery => &ANSWER_CALLBACK_QUERY_SPEC,
        }
    }
}

impl std::fmt::Display for ApiMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Expected JSON shape of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    Text,
    Bool,
    /// Opaque to the adapter (e.g. markup descriptors).
    Any,
}

impl ParamKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Text => value.is_string(),
            Self::Bool => value.is_boolean(),
            Self::Any => true,
        }
    }
}

/// Required/optional parameters for one method. Parameters outside both
/// lists pass through untouched: the adapter does not second-guess fields it
/// has no opinion about.
#[derive(Debug)]
pub struct MethodSpec {
    pub required: &'static [(&'static str, ParamKind)],
    pub optional: &'static [(&'static str, ParamKind)],
}

static SEND_MESSAGE_SPEC: MethodSpec = MethodSpec {
    required: &[(params::CHAT_ID, ParamKind::Int), (params::TEXT, ParamKind::Text)],
    optional: &[
        (params::REPLY_TO_MESSAGE_ID, ParamKind::Int),
        (params::PARSE_MODE, ParamKind::Text),
        (params::REPLY_MARKUP, ParamKind::Any),
    ],
};

static EDIT_MESSAGE_TEXT_SPEC: MethodSpec = MethodSpec {
    required: &[
        (params::CHAT_ID, ParamKind::Int),
        (params::MESSAGE_ID, ParamKind::Int),
        (params::TEXT, ParamKind::Text),
    ],
    optional: &[
        (params::PARSE_MODE, ParamKind::Text),
        (params::REPLY_MARKUP, ParamKind::Any),
    ],
};

static SEND_CHAT_ACTION_SPEC: MethodSpec = MethodSpec {
    required: &[(params::CHAT_ID, ParamKind::Int), (params::ACTION, ParamKind::Text)],
    optional: &[],
};

static ANSWER_CALLBACK_QUERY_SPEC: MethodSpec = MethodSpec {
    required: &[(params::CALLBACK_QUERY_ID, ParamKind::Text)],
    optional: &[
        (params::TEXT, ParamKind::Text),
        (params::SHOW_ALERT, ParamKind::Bool),
        // Some upstreams demand a chat id here; collaborators populate it
        // from the originating event context.
        (params::CHAT_ID, ParamKind::Int),
    ],
};

/// An outbound call request: a method plus named parameters. Requests are
/// plain data; nothing here touches the registry or the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub method: ApiMethod,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl OutboundRequest {
    pub fn send_message(chat_id: i64, text: &str) -> Self {
        let mut params = Map::new();
        params.insert(params::CHAT_ID.into(), json!(chat_id));
        params.insert(params::TEXT.into(), json!(text));
        Self {
            method: ApiMethod::SendMessage,
            params,
        }
    }

    pub fn edit_message_text(chat_id: i64, message_id: i64, text: &str) -> Self {
        let mut params = Map::new();
        params.insert(params::CHAT_ID.into(), json!(chat_id));
        params.insert(params::MESSAGE_ID.into(), json!(message_id));
        params.insert(params::TEXT.into(), json!(text));
        Self {
            method: ApiMethod::EditMessageText,
            params,
        }
    }

    pub fn send_chat_action(chat_id: i64, action: &str) -> Self {
        let mut params = Map::new();
        params.insert(params::CHAT_ID.into(), json!(chat_id));
        params.insert(params::ACTION.into(), json!(action));
        Self {
            method: ApiMethod::SendChatAction,
            params,
        }
    }

    pub fn answer_callback_query(callback_query_id: &str) -> Self {
        let mut params = Map::new();
        params.insert(params::CALLBACK_QUERY_ID.into(), json!(callback_query_id));
        Self {
            method: ApiMethod::AnswerCallbackQuery,
            params,
        }
    }

    pub fn with_reply_to(mut self, message_id: i64) -> Self {
        self.params
            .insert(params::REPLY_TO_MESSAGE_ID.into(), json!(message_id));
        self
    }

    pub fn with_parse_mode(mut self, mode: &str) -> Self {
        self.params.insert(params::PARSE_MODE.into(), json!(mode));
        self
    }

    pub fn with_reply_markup(mut self, markup: Value) -> Self {
        self.params.insert(params::REPLY_MARKUP.into(), markup);
        self
    }

    /// Attach the originating chat context to a callback answer, for
    /// upstreams that require it.
    pub fn with_chat_context(mut self, chat_id: i64) -> Self {
        self.params.insert(params::CHAT_ID.into(), json!(chat_id));
        self
    }

    /// Check this request against its method's declared constraints.
    pub fn validate(&self) -> Result<(), String> {
        let spec = self.method.spec();
        for (name, kind) in spec.required {
            match self.params.get(*name) {
                None => return Err(format!("{}: missing required param '{name}'", self.method)),
                Some(v) if !kind.matches(v) => {
                    return Err(format!("{}: param '{name}' has wrong type", self.method));
                }
                Some(_) => {}
            }
        }
        for (name, kind) in spec.optional {
            if let Some(v) = self.params.get(*name) {
                if !kind.matches(v) {
                    return Err(format!("{}: param '{name}' has wrong type", self.method));
                }
            }
        }
        Ok(())
    }

    pub fn param_i64(&self, name: &str) -> Option<i64> {
        self.params.get(name).and_then(Value::as_i64)
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }
}

/// What the router did instead of the requested call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstituteAction {
    /// Nothing was sent; the capability is cosmetic and absent upstream.
    Skipped,
    /// A fresh message was sent in place of the requested operation.
    SentNewMessage,
}

/// Why an outbound call failed. Degraded outcomes are not failures and never
/// appear here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The remote call did not complete in time. Never retried here; retry
    /// policy belongs to the collaborator.
    Timeout,
    Transport { detail: String },
    /// The remote answered with an error envelope.
    Remote { description: String },
    /// A callback answer needed originating-chat context the request did
    /// not carry.
    CallbackContextMissing,
    /// The request violated its method's parameter constraints.
    InvalidRequest { detail: String },
    /// The method is absent upstream and has no safe substitute.
    Unsupported { method: ApiMethod },
}

/// Result of an outbound invocation. `Degraded` is a successful delivery
/// through a substitute path and must never be conflated with `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Delivered {
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<i64>,
        /// True when a requested reply reference was stripped; the caller
        /// can compensate (e.g. quote the context in the text body).
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        reply_unattached: bool,
    },
    Degraded {
        substitute: SubstituteAction,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<i64>,
    },
    Failed {
        reason: FailureReason,
    },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn message_id(&self) -> Option<i64> {
        match self {
            Self::Delivered { message_id, .. } | Self::Degraded { message_id, .. } => *message_id,
            Self::Failed { .. } => None,
        }
    }
}
