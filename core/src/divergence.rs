use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// A documented deviation between the upstream platform and the canonical
/// Bot-API contract. One variant per issue; wire names are stable keys used
/// in config overrides and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Divergence {
    /// User display name arrives empty.
    UserEmptyDisplayName,
    /// The `is_bot` flag is missing from user objects.
    UserMissingBotFlag,
    /// All identifiers arrive as strings instead of integers.
    StringIds,
    /// Mention entities arrive with length 0.
    MentionZeroLength,
    /// Private chat ids arrive as a non-numeric handle instead of the
    /// counterpart user's id.
    PrivateChatIdUnusable,
    /// `chat.type` arrives empty.
    ChatMissingKind,
    /// Group chat ids carry a textual prefix instead of a negative integer.
    GroupIdPrefix,
    /// Command messages arrive without entities.
    MissingCommandEntities,
    /// `sendChatAction` is not implemented upstream.
    ChatActionUnsupported,
    /// `editMessageText` is not implemented upstream.
    EditMessageUnsupported,
    /// `answerCallbackQuery` requires an undocumented chat id parameter.
    CallbackNeedsChatContext,
    /// `reply_to_message_id` is rejected on send calls.
    ReplyReferenceUnsupported,
    /// `parse_mode` formatting is rendered verbatim instead of styled.
    FormattingUnsupported,
}

impl Divergence {
    /// Stable key, identical to the serde wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserEmptyDisplayName => "user-empty-display-name",
            Self::UserMissingBotFlag => "user-missing-bot-flag",
            Self::StringIds => "string-ids",
            Self::MentionZeroLength => "mention-zero-length",
            Self::PrivateChatIdUnusable => "private-chat-id-unusable",
            Self::ChatMissingKind => "chat-missing-kind",
            Self::GroupIdPrefix => "group-id-prefix",
            Self::MissingCommandEntities => "missing-command-entities",
            Self::ChatActionUnsupported => "chat-action-unsupported",
            Self::EditMessageUnsupported => "edit-message-unsupported",
            Self::CallbackNeedsChatContext => "callback-needs-chat-context",
            Self::ReplyReferenceUnsupported => "reply-reference-unsupported",
            Self::FormattingUnsupported => "formatting-unsupported",
        }
    }

    /// Parse a stable key back into a variant.
    pub fn parse(key: &str) -> Option<Self> {
        CATALOG.iter().map(|r| r.id).find(|d| d.as_str() == key)
    }
}

impl std::fmt::Display for Divergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How badly the divergence breaks a conforming client when left uncorrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Routing or delivery breaks outright.
    Blocking,
    /// Functionality is lost but messages still flow.
    Degrading,
    /// Visible polish only.
    Cosmetic,
}

/// Upstream state of a divergence. Transitions happen only through an
/// explicit override (config or [`DivergenceRegistry::set_status`]), never
/// by sniffing a single payload: one correct payload proves nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DivergenceStatus {
    Unfixed,
    FixedObserved,
}

/// One catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergenceRecord {
    pub id: Divergence,
    pub severity: Severity,
    pub status: DivergenceStatus,
    /// Whether corrective logic keeps running (silently) after the upstream
    /// fix is observed.
    pub defensive: bool,
}

const fn record(
    id: Divergence,
    severity: Severity,
    status: DivergenceStatus,
    defensive: bool,
) -> DivergenceRecord {
    DivergenceRecord {
        id,
        severity,
        status,
        defensive,
    }
}

/// The static catalog. Initial statuses reflect the platform's last
/// published fix report; everything after that goes through overrides.
const CATALOG: &[DivergenceRecord] = &[
    record(
        Divergence::UserEmptyDisplayName,
        Severity::Degrading,
        DivergenceStatus::FixedObserved,
        true,
    ),
    record(
        Divergence::UserMissingBotFlag,
        Severity::Degrading,
        DivergenceStatus::FixedObserved,
        true,
    ),
    record(
        Divergence::StringIds,
        Severity::Blocking,
        DivergenceStatus::Unfixed,
        true,
    ),
    record(
        Divergence::MentionZeroLength,
        Severity::Degrading,
        DivergenceStatus::Unfixed,
        true,
    ),
    record(
        Divergence::PrivateChatIdUnusable,
        Severity::Blocking,
        DivergenceStatus::FixedObserved,
        true,
    ),
    record(
        Divergence::ChatMissingKind,
        Severity::Degrading,
        DivergenceStatus::FixedObserved,
        true,
    ),
    record(
        Divergence::GroupIdPrefix,
        Severity::Blocking,
        DivergenceStatus::Unfixed,
        true,
    ),
    record(
        Divergence::MissingCommandEntities,
        Severity::Degrading,
        DivergenceStatus::FixedObserved,
        true,
    ),
    record(
        Divergence::ChatActionUnsupported,
        Severity::Cosmetic,
        DivergenceStatus::Unfixed,
        true,
    ),
    record(
        Divergence::EditMessageUnsupported,
        Severity::Degrading,
        DivergenceStatus::Unfixed,
        true,
    ),
    record(
        Divergence::CallbackNeedsChatContext,
        Severity::Degrading,
        DivergenceStatus::Unfixed,
        true,
    ),
    record(
        Divergence::ReplyReferenceUnsupported,
        Severity::Degrading,
        DivergenceStatus::Unfixed,
        true,
    ),
    record(
        Divergence::FormattingUnsupported,
        Severity::Cosmetic,
        DivergenceStatus::Unfixed,
        true,
    ),
];

/// Registry of divergence records. Built once from the catalog; statuses are
/// readable at call time and mutable only through the explicit override
/// surface. Status writes are visible to the next call, which is what lets a
/// correction downgrade to a defensive no-op with no code change elsewhere.
#[derive(Debug)]
pub struct DivergenceRegistry {
    records: HashMap<Divergence, DivergenceRecord>,
    statuses: RwLock<HashMap<Divergence, DivergenceStatus>>,
}

impl DivergenceRegistry {
    pub fn new() -> Self {
        let records: HashMap<_, _> = CATALOG.iter().map(|r| (r.id, *r)).collect();
        let statuses = records.iter().map(|(id, r)| (*id, r.status)).collect();
        Self {
            records,
            statuses: RwLock::new(statuses),
        }
    }

    /// Current upstream status.
    pub fn status(&self, id: Divergence) -> DivergenceStatus {
        self.statuses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .copied()
            .unwrap_or(DivergenceStatus::Unfixed)
    }

    pub fn defensive(&self, id: Divergence) -> bool {
        self.records.get(&id).map(|r| r.defensive).unwrap_or(false)
    }

    pub fn severity(&self, id: Divergence) -> Severity {
        self.records
            .get(&id)
            .map(|r| r.severity)
            .unwrap_or(Severity::Degrading)
    }

    /// Whether corrective logic should run at all: either the divergence is
    /// still unfixed, or it is fixed but the record keeps the correction
    /// around defensively.
    pub fn correction_active(&self, id: Divergence) -> bool {
        self.status(id) == DivergenceStatus::Unfixed || self.defensive(id)
    }

    /// Whether a correction should be logged at operational severity. Fixed
    /// divergences log at debug so a defensive correction stops paging
    /// anyone.
    pub fn log_loudly(&self, id: Divergence) -> bool {
        self.status(id) == DivergenceStatus::Unfixed
    }

    /// Explicit status override. This is the reviewed-change surface; the
    /// registry never flips a status on its own.
    pub fn set_status(&self, id: Divergence, status: DivergenceStatus) {
        self.statuses
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, status);
    }

    /// Apply a batch of overrides (typically from config at startup).
    pub fn apply_overrides<I>(&self, overrides: I)
    where
        I: IntoIterator<Item = (Divergence, DivergenceStatus)>,
    {
        for (id, status) in overrides {
            self.set_status(id, status);
        }
    }

    /// Snapshot of the current records with live statuses, for diagnostics.
    pub fn snapshot(&self) -> Vec<DivergenceRecord> {
        let statuses = self.statuses.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<_> = self
            .records
            .values()
            .map(|r| DivergenceRecord {
                status: statuses.get(&r.id).copied().unwrap_or(r.status),
                ..*r
            })
            .collect();
        out.sort_by_key(|r| r.id.as_str());
        out
    }
}

impl Default for DivergenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
