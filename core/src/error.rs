use thiserror::Error;

/// Why a raw payload could not be normalized. Fatal to that single event
/// only; the adapter never retries inbound work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// A field the canonical schema cannot do without is unparsable or
    /// absent. Identifiers drive all downstream routing, so there is no
    /// recovery path.
    #[error("malformed payload at '{field}': {detail}")]
    MalformedPayload { field: String, detail: String },

    /// The chat kind could not be decided and a downstream decision (the
    /// negative-id scheme) requires certainty. Best-effort inference covers
    /// every other case and surfaces as a warning instead.
    #[error("chat kind undecidable for chat id '{chat_id}'")]
    AmbiguousChatKind { chat_id: String },
}

impl NormalizeError {
    pub fn malformed(field: &str, detail: impl Into<String>) -> Self {
        Self::MalformedPayload {
            field: field.to_string(),
            detail: detail.into(),
        }
    }

    /// Machine-readable code for wire responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedPayload { .. } => codes::MALFORMED_PAYLOAD,
            Self::AmbiguousChatKind { .. } => codes::AMBIGUOUS_CHAT_KIND,
        }
    }
}

/// Error codes used on the gateway surface
pub mod codes {
    pub const MALFORMED_PAYLOAD: &str = "malformed_payload";
    pub const AMBIGUOUS_CHAT_KIND: &str = "ambiguous_chat_kind";
    pub const INTERNAL_ERROR: &str = "internal_error";
}
