use chrono::DateTime;
use serde_json::{Map, Value};

use botbridge_core::divergence::{Divergence, DivergenceRegistry, DivergenceStatus};
use botbridge_core::error::NormalizeError;
use botbridge_core::event::{
    CanonicalChat, CanonicalEntity, CanonicalEvent, CanonicalMessage, CanonicalUser, ChatKind,
    EntityKind, GROUP_ID_PREFIX, NormalizeWarning, NormalizedEvent, canonical_group_id,
};

use crate::entities::EntitySynthesizer;

/// Field-name aliases some upstream endpoints use for user objects.
const USER_KEY_ALIASES: &[(&str, &str)] = &[
    ("user_id", "id"),
    ("bot_id", "id"),
    ("name", "first_name"),
];

/// Map a raw webhook update into a canonical event, applying corrections
/// gated by the divergence registry. Fatal problems (unparsable identifiers,
/// undecidable chat kind where certainty is required) fail the whole event;
/// everything else becomes a warning on the result.
pub fn normalize_update(
    raw: &Value,
    registry: &DivergenceRegistry,
    synth: &EntitySynthesizer,
) -> Result<NormalizedEvent, NormalizeError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| NormalizeError::malformed("update", "expected a JSON object"))?;

    let mut warnings = Vec::new();

    let event = if let Some(message) = obj.get("message") {
        CanonicalEvent::Message(normalize_message(message, registry, synth, &mut warnings)?)
    } else if let Some(callback) = obj.get("callback_query") {
        normalize_callback(callback, registry, synth, &mut warnings)?
    } else {
        return Err(NormalizeError::malformed(
            "update",
            "neither 'message' nor 'callback_query' present",
        ));
    };

    Ok(NormalizedEvent { event, warnings })
}

pub fn normalize_message(
    raw: &Value,
    registry: &DivergenceRegistry,
    synth: &EntitySynthesizer,
    warnings: &mut Vec<NormalizeWarning>,
) -> Result<CanonicalMessage, NormalizeError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| NormalizeError::malformed("message", "expected a JSON object"))?;

    let from_raw = obj
        .get("from")
        .ok_or_else(|| NormalizeError::malformed("message.from", "missing"))?;
    let from = normalize_user(from_raw, "message.from", registry, warnings)?;

    let chat_raw = obj
        .get("chat")
        .ok_or_else(|| NormalizeError::malformed("message.chat", "missing"))?;
    let chat = normalize_chat(chat_raw, Some(&from), registry, warnings)?;

    let message_id = parse_id_field(obj, "message_id", "message.message_id", registry, warnings)?;

    let text = obj.get("text").and_then(Value::as_str);
    let upstream_raw = obj.get("entities").and_then(Value::as_array);

    // A payload whose entities claim a command but that carries no text is
    // unrecoverable: the command token cannot be reconstructed.
    if text.is_none() && upstream_claims_command(upstream_raw) {
        return Err(NormalizeError::malformed(
            "message.text",
            "absent on a command message",
        ));
    }
    let text = text.unwrap_or("").to_string();

    let upstream_entities = parse_upstream_entities(
        upstream_raw,
        &text,
        registry,
        synth,
        warnings,
    );
    let had_command = upstream_entities
        .iter()
        .any(|e| e.kind == EntityKind::Command);

    let entities = synth.merge(&text, upstream_entities, synth.synthesize(&text));

    if !had_command && entities.iter().any(|e| e.kind == EntityKind::Command) {
        log_correction(
            registry,
            Divergence::MissingCommandEntities,
            format!("synthesized command entity for message {message_id}"),
        );
        warnings.push(warning(
            "message.entities",
            "command entity synthesized from text",
            Divergence::MissingCommandEntities,
        ));
    }

    let reply_to_message_id = obj
        .get("reply_to_message")
        .and_then(|m| m.get("message_id"))
        .and_then(parse_i64);

    let date = obj
        .get("date")
        .and_then(parse_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0));

    Ok(CanonicalMessage {
        message_id,
        from,
        chat,
        text,
        entities,
        reply_to_message_id,
        date,
    })
}

fn normalize_callback(
    raw: &Value,
    registry: &DivergenceRegistry,
    synth: &EntitySynthesizer,
    warnings: &mut Vec<NormalizeWarning>,
) -> Result<CanonicalEvent, NormalizeError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| NormalizeError::malformed("callback_query", "expected a JSON object"))?;

    let id = match obj.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(NormalizeError::malformed("callback_query.id", "missing")),
    };

    let from_raw = obj
        .get("from")
        .ok_or_else(|| NormalizeError::malformed("callback_query.from", "missing"))?;
    let from = normalize_user(from_raw, "callback_query.from", registry, warnings)?;

    // The embedded message is context, not a routing source: normalize it
    // leniently and drop it (with a warning) when it is beyond repair.
    let message = match obj.get("message") {
        Some(raw_msg) => {
            let mut sub_warnings = Vec::new();
            match normalize_message(raw_msg, registry, synth, &mut sub_warnings) {
                Ok(msg) => {
                    warnings.extend(sub_warnings);
                    Some(msg)
                }
                Err(err) => {
                    warnings.push(NormalizeWarning {
                        field: "callback_query.message".into(),
                        message: format!("dropped unrecoverable embedded message: {err}"),
                        divergence: None,
                    });
                    None
                }
            }
        }
        None => None,
    };

    let data = obj.get("data").and_then(Value::as_str).map(String::from);

    Ok(CanonicalEvent::CallbackQuery {
        id,
        from,
        message,
        data,
    })
}

pub fn normalize_user(
    raw: &Value,
    field: &str,
    registry: &DivergenceRegistry,
    warnings: &mut Vec<NormalizeWarning>,
) -> Result<CanonicalUser, NormalizeError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| NormalizeError::malformed(field, "expected a JSON object"))?;

    // Some endpoints wrap the payload: {"user": {...}, "token": "..."}.
    let mut obj: Map<String, Value> = match obj.get("user") {
        Some(Value::Object(inner)) => inner.clone(),
        _ => obj.clone(),
    };
    for (alias, canonical) in USER_KEY_ALIASES {
        if !obj.contains_key(*canonical) {
            if let Some(v) = obj.get(*alias).cloned() {
                obj.insert((*canonical).to_string(), v);
            }
        }
    }

    let id_field = format!("{field}.id");
    let raw_id = obj
        .get("id")
        .ok_or_else(|| NormalizeError::malformed(&id_field, "missing"))?;
    let id = parse_i64(raw_id)
        .ok_or_else(|| NormalizeError::malformed(&id_field, format!("not numeric: {raw_id}")))?;
    note_string_id(raw_id, &id_field, registry, warnings);

    let username = obj
        .get("username")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    let is_bot = match obj.get("is_bot").and_then(Value::as_bool) {
        Some(flag) => flag,
        None => {
            if registry.status(Divergence::UserMissingBotFlag) == DivergenceStatus::Unfixed {
                log_correction(
                    registry,
                    Divergence::UserMissingBotFlag,
                    format!("defaulted missing is_bot to false for user {id}"),
                );
                warnings.push(warning(
                    &format!("{field}.is_bot"),
                    "missing, defaulted to false",
                    Divergence::UserMissingBotFlag,
                ));
                false
            } else {
                // Fixed upstream: an absent flag is a real contract breach.
                return Err(NormalizeError::malformed(
                    &format!("{field}.is_bot"),
                    "missing",
                ));
            }
        }
    };

    let first_name = obj
        .get("first_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");

    let display_name = if !first_name.is_empty() {
        first_name.to_string()
    } else {
        match registry.status(Divergence::UserEmptyDisplayName) {
            DivergenceStatus::Unfixed => {
                let fallback = username
                    .clone()
                    .or_else(|| {
                        obj.get("last_name")
                            .and_then(Value::as_str)
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                    })
                    .unwrap_or_else(|| if is_bot { id.to_string() } else { String::new() });
                log_correction(
                    registry,
                    Divergence::UserEmptyDisplayName,
                    format!("substituted display name '{fallback}' for user {id}"),
                );
                warnings.push(warning(
                    &format!("{field}.first_name"),
                    "empty, substituted from fallback fields",
                    Divergence::UserEmptyDisplayName,
                ));
                fallback
            }
            // Observed fixed: an empty name is an anomaly worth a quiet log,
            // not a substitution.
            DivergenceStatus::FixedObserved => {
                tracing::debug!(
                    "user {id} arrived with empty display name after upstream fix"
                );
                warnings.push(warning(
                    &format!("{field}.first_name"),
                    "empty after upstream fix, left as-is",
                    Divergence::UserEmptyDisplayName,
                ));
                String::new()
            }
        }
    };

    Ok(CanonicalUser {
        id,
        display_name,
        is_bot,
        username,
    })
}

pub fn normalize_chat(
    raw: &Value,
    from: Option<&CanonicalUser>,
    registry: &DivergenceRegistry,
    warnings: &mut Vec<NormalizeWarning>,
) -> Result<CanonicalChat, NormalizeError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| NormalizeError::malformed("chat", "expected a JSON object"))?;

    let title = obj.get("title").and_then(Value::as_str).map(String::from);
    let explicit_kind = obj
        .get("type")
        .and_then(Value::as_str)
        .and_then(ChatKind::from_wire);

    let raw_id = obj
        .get("id")
        .ok_or_else(|| NormalizeError::malformed("chat.id", "missing"))?;

    // Prefixed textual group id ("g_12345").
    if let Some(s) = raw_id.as_str() {
        if s.starts_with(GROUP_ID_PREFIX) {
            // Prefix says group; an explicit private declaration contradicts
            // the negative-id scheme selection, and that decision requires
            // certainty.
            if explicit_kind == Some(ChatKind::Private) {
                return Err(NormalizeError::AmbiguousChatKind {
                    chat_id: s.to_string(),
                });
            }
            let id = canonical_group_id(s).ok_or_else(|| {
                NormalizeError::malformed("chat.id", format!("group id suffix not numeric: {s}"))
            })?;
            log_correction(
                registry,
                Divergence::GroupIdPrefix,
                format!("rewrote group chat id '{s}' -> {id}"),
            );
            warnings.push(warning(
                "chat.id",
                "prefixed group id mapped to negative integer",
                Divergence::GroupIdPrefix,
            ));

            let kind = match explicit_kind {
                Some(kind) => kind,
                None => infer_kind_from_shape(s, ChatKind::Group, registry, warnings)?,
            };
            return Ok(CanonicalChat {
                id,
                kind,
                title,
                upstream_id: Some(s.to_string()),
            });
        }
    }

    // Plain numeric id (integer or numeric string).
    if let Some(id) = parse_i64(raw_id) {
        note_string_id(raw_id, "chat.id", registry, warnings);
        let upstream_id = raw_id.as_str().map(String::from);

        let kind = match explicit_kind {
            Some(kind) => kind,
            None if id < 0 => {
                // A bare negative id is group-shaped but carries no prefix;
                // the inference itself is ambiguous. Non-fatal here: nothing
                // downstream needs a scheme decision for an already-negative
                // id.
                let kind = infer_kind_from_shape(&id.to_string(), ChatKind::Group, registry, warnings)?;
                warnings.push(warning(
                    "chat.type",
                    "inference ambiguous for bare negative id",
                    Divergence::ChatMissingKind,
                ));
                kind
            }
            None => infer_kind_from_shape(&id.to_string(), ChatKind::Private, registry, warnings)?,
        };

        if kind == ChatKind::Private {
            if let Some(user) = from {
                if user.id != id {
                    warnings.push(NormalizeWarning {
                        field: "chat.id".into(),
                        message: format!(
                            "one-to-one chat id {id} does not match sender id {}",
                            user.id
                        ),
                        divergence: None,
                    });
                }
            }
        }

        return Ok(CanonicalChat {
            id,
            kind,
            title,
            upstream_id,
        });
    }

    // Non-numeric, unprefixed id. Only recoverable for one-to-one chats, by
    // substituting the sender's id.
    let shown = raw_id.as_str().map(String::from).unwrap_or_else(|| raw_id.to_string());
    if matches!(explicit_kind, Some(ChatKind::Group) | Some(ChatKind::Broadcast)) {
        return Err(NormalizeError::malformed(
            "chat.id",
            format!("group chat id not numeric: {shown}"),
        ));
    }
    if !registry.correction_active(Divergence::PrivateChatIdUnusable) {
        return Err(NormalizeError::malformed(
            "chat.id",
            format!("not numeric: {shown}"),
        ));
    }
    let Some(user) = from else {
        return Err(NormalizeError::malformed(
            "chat.id",
            format!("not numeric and no sender to substitute: {shown}"),
        ));
    };
    log_correction(
        registry,
        Divergence::PrivateChatIdUnusable,
        format!("substituted sender id {} for unusable chat id '{shown}'", user.id),
    );
    warnings.push(warning(
        "chat.id",
        "unusable one-to-one chat id replaced with sender id",
        Divergence::PrivateChatIdUnusable,
    ));

    let kind = match explicit_kind {
        Some(kind) => kind,
        None => infer_kind_from_shape(&shown, ChatKind::Private, registry, warnings)?,
    };

    Ok(CanonicalChat {
        id: user.id,
        kind,
        title,
        upstream_id: Some(shown),
    })
}

/// Best-effort chat-kind inference from the id's shape, allowed only while
/// the missing-kind correction is active. Inference is never authoritative
/// for routing; callers that need certainty fail before reaching here.
fn infer_kind_from_shape(
    shown_id: &str,
    inferred: ChatKind,
    registry: &DivergenceRegistry,
    warnings: &mut Vec<NormalizeWarning>,
) -> Result<ChatKind, NormalizeError> {
    if !registry.correction_active(Divergence::ChatMissingKind) {
        return Err(NormalizeError::malformed("chat.type", "missing"));
    }
    log_correction(
        registry,
        Divergence::ChatMissingKind,
        format!("inferred chat kind {inferred:?} for chat '{shown_id}'"),
    );
    warnings.push(warning(
        "chat.type",
        "empty, inferred from id shape",
        Divergence::ChatMissingKind,
    ));
    Ok(inferred)
}

fn upstream_claims_command(entities: Option<&Vec<Value>>) -> bool {
    entities
        .map(|list| {
            list.iter()
                .any(|e| e.get("type").and_then(Value::as_str) == Some("bot_command"))
        })
        .unwrap_or(false)
}

fn parse_upstream_entities(
    raw: Option<&Vec<Value>>,
    text: &str,
    registry: &DivergenceRegistry,
    synth: &EntitySynthesizer,
    warnings: &mut Vec<NormalizeWarning>,
) -> Vec<CanonicalEntity> {
    let Some(list) = raw else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for value in list {
        let Some(obj) = value.as_object() else {
            continue;
        };
        let kind = match obj.get("type").and_then(Value::as_str) {
            Some("bot_command") => EntityKind::Command,
            Some("mention") | Some("text_mention") => EntityKind::Mention,
            Some(_) => EntityKind::Formatting,
            None => continue,
        };
        let Some(offset) = obj.get("offset").and_then(Value::as_u64) else {
            continue;
        };
        let offset = offset as usize;
        let length = obj.get("length").and_then(Value::as_u64).unwrap_or(0) as usize;

        if kind != EntityKind::Mention {
            out.push(CanonicalEntity {
                kind,
                offset,
                length,
                user: None,
            });
            continue;
        }

        // Mention entities get repaired: recompute a broken span from the
        // referenced handle, or drop the entity entirely.
        let mut user_warnings = Vec::new();
        let user = obj
            .get("user")
            .and_then(|u| normalize_user(u, "entity.user", registry, &mut user_warnings).ok());
        match synth.repair_mention(text, offset, length, user) {
            Some(repaired) => {
                if repaired.length != length {
                    log_correction(
                        registry,
                        Divergence::MentionZeroLength,
                        format!(
                            "recomputed mention length {} -> {} at offset {offset}",
                            length, repaired.length
                        ),
                    );
                    warnings.push(warning(
                        "message.entities",
                        "mention length recomputed from handle",
                        Divergence::MentionZeroLength,
                    ));
                }
                out.push(repaired);
            }
            None => {
                log_correction(
                    registry,
                    Divergence::MentionZeroLength,
                    format!("dropped mention at offset {offset}: handle not found in text"),
                );
                warnings.push(warning(
                    "message.entities",
                    "dropped mention not backed by text",
                    Divergence::MentionZeroLength,
                ));
            }
        }
    }
    out
}

/// Parse a required id field that may arrive as integer or numeric string.
fn parse_id_field(
    obj: &Map<String, Value>,
    key: &str,
    field: &str,
    registry: &DivergenceRegistry,
    warnings: &mut Vec<NormalizeWarning>,
) -> Result<i64, NormalizeError> {
    let raw = obj
        .get(key)
        .ok_or_else(|| NormalizeError::malformed(field, "missing"))?;
    let id = parse_i64(raw)
        .ok_or_else(|| NormalizeError::malformed(field, format!("not numeric: {raw}")))?;
    note_string_id(raw, field, registry, warnings);
    Ok(id)
}

fn note_string_id(
    raw: &Value,
    field: &str,
    registry: &DivergenceRegistry,
    warnings: &mut Vec<NormalizeWarning>,
) {
    if raw.is_string() {
        log_correction(
            registry,
            Divergence::StringIds,
            format!("parsed string-typed id at {field}"),
        );
        warnings.push(warning(
            field,
            "string-typed id parsed to integer",
            Divergence::StringIds,
        ));
    }
}

fn parse_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn warning(field: &str, message: &str, divergence: Divergence) -> NormalizeWarning {
    NormalizeWarning {
        field: field.to_string(),
        message: message.to_string(),
        divergence: Some(divergence),
    }
}

fn log_correction(registry: &DivergenceRegistry, divergence: Divergence, message: String) {
    if registry.log_loudly(divergence) {
        tracing::info!("[{divergence}] {message}");
    } else {
        tracing::debug!("[{divergence}] {message}");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use botbridge_core::divergence::{Divergence, DivergenceRegistry, DivergenceStatus};
    use botbridge_core::error::NormalizeError;
    use botbridge_core::event::{CanonicalEvent, ChatKind, EntityKind};

    use super::{normalize_update, normalize_user};
    use crate::entities::EntitySynthesizer;

    fn registry() -> DivergenceRegistry {
        DivergenceRegistry::new()
    }

    fn update(message: serde_json::Value) -> serde_json::Value {
        json!({ "update_id": 1, "message": message })
    }

    fn message(raw: serde_json::Value) -> CanonicalEvent {
        let reg = registry();
        let synth = EntitySynthesizer::new();
        normalize_update(&update(raw), &reg, &synth)
            .expect("normalize")
            .event
    }

    fn plain_message(text: &str) -> serde_json::Value {
        json!({
            "message_id": 100,
            "from": { "id": 7, "first_name": "Ada", "is_bot": false },
            "chat": { "id": 7, "type": "private" },
            "text": text,
        })
    }

    #[test]
    fn numeric_string_ids_parse_to_exact_integers() {
        let event = message(json!({
            "message_id": "100",
            "from": { "id": "424242", "first_name": "Ada", "is_bot": false },
            "chat": { "id": "424242", "type": "private" },
            "text": "hi",
        }));
        let CanonicalEvent::Message(msg) = event else {
            panic!("expected message");
        };
        assert_eq!(msg.from.id, 424_242);
        assert_eq!(msg.chat.id, 424_242);
        assert_eq!(msg.message_id, 100);
    }

    #[test]
    fn non_numeric_user_id_is_fatal() {
        let reg = registry();
        let synth = EntitySynthesizer::new();
        let err = normalize_update(
            &update(json!({
                "message_id": 1,
                "from": { "id": "tarot_bot", "first_name": "Bot", "is_bot": true },
                "chat": { "id": 1, "type": "private" },
                "text": "hi",
            })),
            &reg,
            &synth,
        )
        .unwrap_err();
        assert!(matches!(err, NormalizeError::MalformedPayload { .. }));
    }

    #[test]
    fn non_numeric_private_chat_id_substitutes_sender_id() {
        let event = message(json!({
            "message_id": 1,
            "from": { "id": 9001, "first_name": "Ada", "is_bot": false },
            "chat": { "id": "some_bot_handle", "type": "private" },
            "text": "hi",
        }));
        let CanonicalEvent::Message(msg) = event else {
            panic!("expected message");
        };
        assert_eq!(msg.chat.id, 9001);
        assert_eq!(msg.chat.upstream_id.as_deref(), Some("some_bot_handle"));
    }

    #[test]
    fn prefixed_group_id_maps_to_negative_integer() {
        let event = message(json!({
            "message_id": 1,
            "from": { "id": 5, "first_name": "Ada", "is_bot": false },
            "chat": { "id": "g_8765", "title": "tarot fans" },
            "text": "hi",
        }));
        let CanonicalEvent::Message(msg) = event else {
            panic!("expected message");
        };
        assert_eq!(msg.chat.id, -8765);
        assert_eq!(msg.chat.kind, ChatKind::Group);
        assert_eq!(msg.chat.upstream_id.as_deref(), Some("g_8765"));
        assert_eq!(msg.chat.title.as_deref(), Some("tarot fans"));
    }

    #[test]
    fn prefixed_id_with_explicit_private_kind_is_ambiguous() {
        let reg = registry();
        let synth = EntitySynthesizer::new();
        let err = normalize_update(
            &update(json!({
                "message_id": 1,
                "from": { "id": 5, "first_name": "Ada", "is_bot": false },
                "chat": { "id": "g_8765", "type": "private" },
                "text": "hi",
            })),
            &reg,
            &synth,
        )
        .unwrap_err();
        assert!(matches!(err, NormalizeError::AmbiguousChatKind { .. }));
    }

    #[test]
    fn group_id_with_non_numeric_suffix_is_fatal() {
        let reg = registry();
        let synth = EntitySynthesizer::new();
        let err = normalize_update(
            &update(json!({
                "message_id": 1,
                "from": { "id": 5, "first_name": "Ada", "is_bot": false },
                "chat": { "id": "g_team", "type": "group" },
                "text": "hi",
            })),
            &reg,
            &synth,
        )
        .unwrap_err();
        assert!(matches!(err, NormalizeError::MalformedPayload { .. }));
    }

    #[test]
    fn missing_chat_kind_is_inferred_from_shape() {
        let event = message(json!({
            "message_id": 1,
            "from": { "id": 5, "first_name": "Ada", "is_bot": false },
            "chat": { "id": 5 },
            "text": "hi",
        }));
        let CanonicalEvent::Message(msg) = event else {
            panic!("expected message");
        };
        assert_eq!(msg.chat.kind, ChatKind::Private);
    }

    #[test]
    fn command_text_gets_exactly_one_command_entity() {
        let event = message(plain_message("/tarot 测事业"));
        let CanonicalEvent::Message(msg) = event else {
            panic!("expected message");
        };
        let commands: Vec<_> = msg
            .entities
            .iter()
            .filter(|e| e.kind == EntityKind::Command)
            .collect();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].offset, 0);
        assert_eq!(commands[0].length, 6);
    }

    #[test]
    fn upstream_command_entity_is_preserved_not_duplicated() {
        let event = message(json!({
            "message_id": 1,
            "from": { "id": 7, "first_name": "Ada", "is_bot": false },
            "chat": { "id": 7, "type": "private" },
            "text": "/luck",
            "entities": [ { "type": "bot_command", "offset": 0, "length": 5 } ],
        }));
        let CanonicalEvent::Message(msg) = event else {
            panic!("expected message");
        };
        assert_eq!(msg.entities.len(), 1);
        assert_eq!(msg.entities[0].length, 5);
    }

    #[test]
    fn zero_length_mention_is_repaired_from_handle() {
        let event = message(json!({
            "message_id": 1,
            "from": { "id": 7, "first_name": "Ada", "is_bot": false },
            "chat": { "id": "g_1", "type": "group" },
            "text": "@tarot_bot 今天如何",
            "entities": [ {
                "type": "mention",
                "offset": 0,
                "length": 0,
                "user": { "id": 99, "first_name": "晚晴", "is_bot": true, "username": "tarot_bot" },
            } ],
        }));
        let CanonicalEvent::Message(msg) = event else {
            panic!("expected message");
        };
        let mention = msg
            .entities
            .iter()
            .find(|e| e.kind == EntityKind::Mention)
            .expect("mention kept");
        assert_eq!(mention.offset, 0);
        assert_eq!(mention.length, 10);
        assert_eq!(mention.user.as_ref().map(|u| u.id), Some(99));
    }

    #[test]
    fn unbacked_mention_is_dropped_without_failing_the_event() {
        let reg = registry();
        let synth = EntitySynthesizer::new();
        let normalized = normalize_update(
            &update(json!({
                "message_id": 1,
                "from": { "id": 7, "first_name": "Ada", "is_bot": false },
                "chat": { "id": 7, "type": "private" },
                "text": "no mention here",
                "entities": [ {
                    "type": "mention",
                    "offset": 0,
                    "length": 0,
                    "user": { "id": 99, "first_name": "Bot", "is_bot": true, "username": "tarot_bot" },
                } ],
            })),
            &reg,
            &synth,
        )
        .expect("normalize succeeds");
        let CanonicalEvent::Message(msg) = normalized.event else {
            panic!("expected message");
        };
        assert!(msg.entities.is_empty());
        assert_eq!(synth.dropped_mentions(), 1);
        assert!(
            normalized
                .warnings
                .iter()
                .any(|w| w.divergence == Some(Divergence::MentionZeroLength))
        );
    }

    #[test]
    fn empty_display_name_substitution_follows_divergence_status() {
        let reg = registry();
        reg.set_status(Divergence::UserEmptyDisplayName, DivergenceStatus::Unfixed);
        let mut warnings = Vec::new();
        let raw = json!({ "id": 3, "first_name": "", "username": "ada_l", "is_bot": false });
        let user = normalize_user(&raw, "from", &reg, &mut warnings).unwrap();
        assert_eq!(user.display_name, "ada_l");

        // Flip to fixed-observed: same payload, no substitution.
        reg.set_status(
            Divergence::UserEmptyDisplayName,
            DivergenceStatus::FixedObserved,
        );
        let mut warnings = Vec::new();
        let user = normalize_user(&raw, "from", &reg, &mut warnings).unwrap();
        assert_eq!(user.display_name, "");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn missing_bot_flag_defaults_while_unfixed_and_fails_once_fixed() {
        let reg = registry();
        reg.set_status(Divergence::UserMissingBotFlag, DivergenceStatus::Unfixed);
        let raw = json!({ "id": 3, "first_name": "Ada" });
        let mut warnings = Vec::new();
        let user = normalize_user(&raw, "from", &reg, &mut warnings).unwrap();
        assert!(!user.is_bot);

        reg.set_status(
            Divergence::UserMissingBotFlag,
            DivergenceStatus::FixedObserved,
        );
        let mut warnings = Vec::new();
        assert!(normalize_user(&raw, "from", &reg, &mut warnings).is_err());
    }

    #[test]
    fn aliased_and_nested_user_payloads_unwrap() {
        let reg = registry();
        let mut warnings = Vec::new();
        let raw = json!({ "user": { "user_id": "55", "name": "晚晴", "is_bot": true }, "token": "secret" });
        let user = normalize_user(&raw, "from", &reg, &mut warnings).unwrap();
        assert_eq!(user.id, 55);
        assert_eq!(user.display_name, "晚晴");
        assert!(user.is_bot);
    }

    #[test]
    fn command_entities_without_text_are_fatal() {
        let reg = registry();
        let synth = EntitySynthesizer::new();
        let err = normalize_update(
            &update(json!({
                "message_id": 1,
                "from": { "id": 7, "first_name": "Ada", "is_bot": false },
                "chat": { "id": 7, "type": "private" },
                "entities": [ { "type": "bot_command", "offset": 0, "length": 5 } ],
            })),
            &reg,
            &synth,
        )
        .unwrap_err();
        assert!(matches!(err, NormalizeError::MalformedPayload { .. }));
    }

    #[test]
    fn reply_target_and_date_carry_over() {
        let event = message(json!({
            "message_id": 2,
            "date": 1_700_000_000,
            "from": { "id": 7, "first_name": "Ada", "is_bot": false },
            "chat": { "id": 7, "type": "private" },
            "text": "replying",
            "reply_to_message": { "message_id": 1 },
        }));
        let CanonicalEvent::Message(msg) = event else {
            panic!("expected message");
        };
        assert_eq!(msg.reply_to_message_id, Some(1));
        assert!(msg.date.is_some());
    }

    #[test]
    fn callback_query_normalizes_with_lenient_embedded_message() {
        let reg = registry();
        let synth = EntitySynthesizer::new();
        let normalized = normalize_update(
            &json!({
                "update_id": 2,
                "callback_query": {
                    "id": "cb-1",
                    "from": { "id": 7, "first_name": "Ada", "is_bot": false },
                    "data": "tarot:draw",
                    "message": { "chat": { "id": 7, "type": "private" } },
                },
            }),
            &reg,
            &synth,
        )
        .expect("normalize");
        let CanonicalEvent::CallbackQuery { id, from, message, data } = normalized.event else {
            panic!("expected callback query");
        };
        assert_eq!(id, "cb-1");
        assert_eq!(from.id, 7);
        assert_eq!(data.as_deref(), Some("tarot:draw"));
        // Embedded message lacks from/message_id: dropped, not fatal.
        assert!(message.is_none());
        assert!(
            normalized
                .warnings
                .iter()
                .any(|w| w.field == "callback_query.message")
        );
    }

    #[test]
    fn update_without_payload_is_fatal() {
        let reg = registry();
        let synth = EntitySynthesizer::new();
        assert!(normalize_update(&json!({ "update_id": 3 }), &reg, &synth).is_err());
    }
}
