use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::divergence::Divergence;

/// Textual prefix some upstream deployments put in front of group chat ids
/// (`"g_12345"`). The canonical form negates the numeric suffix.
pub const GROUP_ID_PREFIX: &str = "g_";

/// A user as the canonical contract describes one. The identifier is the only
/// routing key; it is never derived from a display string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalUser {
    /// Platform-unique identifier. Always numeric, even when the upstream
    /// wire encodes it as a string.
    pub id: i64,
    /// Display name. Empty only when the upstream omits it and the
    /// corresponding correction is no longer applied.
    pub display_name: String,
    /// Whether the account is a bot. Always present in canonical form.
    pub is_bot: bool,
    /// Handle (`@username` without the `@`), when the upstream provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Conversation kind. `Broadcast` covers one-to-many channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
    Broadcast,
}

impl ChatKind {
    /// Parse an upstream `chat.type` string. Supergroups collapse into
    /// `Group`; unknown or empty strings are `None` (caller decides whether
    /// inference is allowed).
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "private" => Some(Self::Private),
            "group" | "supergroup" => Some(Self::Group),
            "channel" => Some(Self::Broadcast),
            _ => None,
        }
    }
}

/// A conversation. Sign of `id` is load-bearing: positive ids are one-to-one
/// chats (and equal the counterpart user's id), negative ids are groups. The
/// negation scheme guarantees a group id can never collide with a user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalChat {
    pub id: i64,
    pub kind: ChatKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// The raw textual id as received from the wire, kept while the upstream
    /// may emit both formats during a migration window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_id: Option<String>,
}

/// Derive the canonical (negative) group id from a prefixed wire id.
/// Returns `None` when the input is not a prefixed group id or the suffix is
/// not numeric.
pub fn canonical_group_id(raw: &str) -> Option<i64> {
    let suffix = raw.strip_prefix(GROUP_ID_PREFIX)?;
    let n: i64 = suffix.parse().ok()?;
    (n > 0).then_some(-n)
}

/// Reproduce the upstream wire form of a canonical group id. Inverse of
/// [`canonical_group_id`]; `None` for non-group (non-negative) ids.
pub fn upstream_group_id(id: i64) -> Option<String> {
    (id < 0).then(|| format!("{GROUP_ID_PREFIX}{}", -id))
}

/// Structural marker kind inside message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A leading `/command` token.
    Command,
    /// An `@username` mention.
    Mention,
    /// Any other formatting marker the upstream reports (bold, link, ...).
    Formatting,
}

/// A structural marker spanning part of the message text.
///
/// Offsets and lengths count characters of the normalized text. Zero-length
/// command/mention entities are invalid and never emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
    /// The referenced user, for mentions that carry one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<CanonicalUser>,
}

/// A normalized inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub message_id: i64,
    pub from: CanonicalUser,
    pub chat: CanonicalChat,
    pub text: String,
    /// Sorted by offset, non-overlapping.
    pub entities: Vec<CanonicalEntity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<i64>,
    /// Message timestamp as reported by the upstream, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

/// A normalized inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CanonicalEvent {
    Message(CanonicalMessage),
    CallbackQuery {
        id: String,
        from: CanonicalUser,
        /// The message the callback originated from. Normalized leniently;
        /// absent when the upstream payload is too broken to recover.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<CanonicalMessage>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },
}

/// A correction or anomaly noted during normalization. Not an error: the
/// event is still usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeWarning {
    /// Which payload field triggered the warning (e.g. `"chat.type"`).
    pub field: String,
    pub message: String,
    /// The documented divergence this warning belongs to, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub divergence: Option<Divergence>,
}

/// Normalization output: the canonical event plus everything the normalizer
/// had to fix or found suspicious along the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    #[serde(flatten)]
    pub event: CanonicalEvent,
    /// Empty = omitted from JSON.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<NormalizeWarning>,
}
