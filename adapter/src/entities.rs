use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use botbridge_core::event::{CanonicalEntity, CanonicalUser, EntityKind};

/// First character of a command message.
pub const COMMAND_PREFIX: char = '/';

/// Derives the structural entities the upstream payload does not provide,
/// and repairs the ones it mangles. Depends on nothing but text.
///
/// Synthesis is additive and idempotent, so it runs on every message
/// regardless of divergence status; merging keeps upstream entities
/// authoritative where both sides produced one.
#[derive(Debug, Default)]
pub struct EntitySynthesizer {
    dropped_mentions: AtomicU64,
}

impl EntitySynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mentions dropped because the text at the reported offset did not
    /// contain the referenced handle. A dropped mention is non-fatal to
    /// delivery, so this is a counter rather than an error.
    pub fn dropped_mentions(&self) -> u64 {
        self.dropped_mentions.load(Ordering::Relaxed)
    }

    /// Synthesize entities from raw text. Currently: the leading command
    /// token. A bare `/` with no token is malformed and passes through
    /// unmarked.
    pub fn synthesize(&self, text: &str) -> Vec<CanonicalEntity> {
        match command_token_chars(text) {
            0 => Vec::new(),
            length => vec![CanonicalEntity {
                kind: EntityKind::Command,
                offset: 0,
                length,
                user: None,
            }],
        }
    }

    /// Repair an upstream mention whose reported length is zero or does not
    /// match the referenced user's handle. Returns the corrected entity, or
    /// `None` when the handle is not actually at the stated offset (the
    /// entity is dropped rather than emitted corrupt).
    pub fn repair_mention(
        &self,
        text: &str,
        offset: usize,
        reported_length: usize,
        user: Option<CanonicalUser>,
    ) -> Option<CanonicalEntity> {
        let handle = user.as_ref().and_then(|u| u.username.as_deref());

        let length = match handle {
            Some(handle) => {
                let expected = format!("@{handle}");
                if starts_with_at(text, offset, &expected) {
                    expected.chars().count()
                } else {
                    self.dropped_mentions.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
            // No handle to verify against: keep a plausible span, drop a
            // zero-length one.
            None if reported_length > 0 => reported_length,
            None => {
                self.dropped_mentions.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        Some(CanonicalEntity {
            kind: EntityKind::Mention,
            offset,
            length,
            user,
        })
    }

    /// Merge upstream and synthesized entities into the canonical set:
    /// sorted by offset, de-duplicated by (kind, offset) with upstream
    /// winning, non-overlapping, and within text bounds.
    pub fn merge(
        &self,
        text: &str,
        upstream: Vec<CanonicalEntity>,
        synthesized: Vec<CanonicalEntity>,
    ) -> Vec<CanonicalEntity> {
        let text_chars = text.chars().count();

        let mut tagged: Vec<(CanonicalEntity, bool)> = upstream
            .into_iter()
            .map(|e| (e, true))
            .chain(synthesized.into_iter().map(|e| (e, false)))
            .filter(|(e, _)| e.length > 0 && e.offset + e.length <= text_chars)
            .collect();

        // Stable order: by offset, upstream before synthesized on ties.
        tagged.sort_by(|(a, a_up), (b, b_up)| {
            a.offset.cmp(&b.offset).then(b_up.cmp(a_up))
        });

        let mut seen: HashSet<(EntityKind, usize)> = HashSet::new();
        let mut out: Vec<CanonicalEntity> = Vec::new();
        for (entity, _) in tagged {
            if !seen.insert((entity.kind, entity.offset)) {
                continue;
            }
            if let Some(prev) = out.last() {
                if entity.offset < prev.offset + prev.length {
                    continue;
                }
            }
            out.push(entity);
        }
        out
    }
}

/// Character length of the leading command token including the prefix, or 0
/// when the text does not start with a well-formed command.
fn command_token_chars(text: &str) -> usize {
    let mut chars = text.chars();
    if chars.next() != Some(COMMAND_PREFIX) {
        return 0;
    }
    let token = chars
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .count();
    if token == 0 { 0 } else { token + 1 }
}

/// Char-indexed `starts_with`: entity offsets count characters, not bytes.
fn starts_with_at(text: &str, offset: usize, needle: &str) -> bool {
    let mut tail = text.chars().skip(offset);
    needle.chars().all(|c| tail.next() == Some(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64, username: Option<&str>) -> CanonicalUser {
        CanonicalUser {
            id,
            display_name: "someone".into(),
            is_bot: false,
            username: username.map(String::from),
        }
    }

    #[test]
    fn command_token_spans_prefix_and_token() {
        let synth = EntitySynthesizer::new();
        let entities = synth.synthesize("/tarot 测事业");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].kind, EntityKind::Command);
        assert_eq!(entities[0].offset, 0);
        assert_eq!(entities[0].length, 6);
    }

    #[test]
    fn command_token_stops_at_non_token_chars() {
        let synth = EntitySynthesizer::new();
        let entities = synth.synthesize("/start@some_bot hello");
        assert_eq!(entities[0].length, 6);
    }

    #[test]
    fn bare_prefix_yields_no_entity() {
        let synth = EntitySynthesizer::new();
        assert!(synth.synthesize("/").is_empty());
        assert!(synth.synthesize("/ tarot").is_empty());
        assert!(synth.synthesize("hello").is_empty());
        assert!(synth.synthesize("").is_empty());
    }

    #[test]
    fn zero_length_mention_is_recomputed_from_handle() {
        let synth = EntitySynthesizer::new();
        let repaired = synth
            .repair_mention("@tarot_bot 今天运势如何", 0, 0, Some(user(99, Some("tarot_bot"))))
            .unwrap();
        assert_eq!(repaired.offset, 0);
        assert_eq!(repaired.length, 10);
        assert_eq!(synth.dropped_mentions(), 0);
    }

    #[test]
    fn mention_not_at_offset_is_dropped_and_counted() {
        let synth = EntitySynthesizer::new();
        let repaired = synth.repair_mention("hello there", 0, 0, Some(user(99, Some("tarot_bot"))));
        assert!(repaired.is_none());
        assert_eq!(synth.dropped_mentions(), 1);
    }

    #[test]
    fn inconsistent_length_is_corrected_to_handle_span() {
        let synth = EntitySynthesizer::new();
        let repaired = synth
            .repair_mention("@tarot_bot hi", 0, 3, Some(user(99, Some("tarot_bot"))))
            .unwrap();
        assert_eq!(repaired.length, 10);
    }

    #[test]
    fn mention_without_handle_keeps_plausible_span() {
        let synth = EntitySynthesizer::new();
        let repaired = synth.repair_mention("@someone hi", 0, 8, None).unwrap();
        assert_eq!(repaired.length, 8);
        assert!(synth.repair_mention("@someone hi", 0, 0, None).is_none());
    }

    #[test]
    fn merge_prefers_upstream_on_same_kind_and_offset() {
        let synth = EntitySynthesizer::new();
        let text = "/luck today";
        let upstream = vec![CanonicalEntity {
            kind: EntityKind::Command,
            offset: 0,
            length: 5,
            user: Some(user(1, None)),
        }];
        let merged = synth.merge(text, upstream.clone(), synth.synthesize(text));
        assert_eq!(merged, upstream);
    }

    #[test]
    fn merge_drops_out_of_bounds_and_zero_length() {
        let synth = EntitySynthesizer::new();
        let bogus = vec![
            CanonicalEntity {
                kind: EntityKind::Mention,
                offset: 3,
                length: 0,
                user: None,
            },
            CanonicalEntity {
                kind: EntityKind::Formatting,
                offset: 2,
                length: 50,
                user: None,
            },
        ];
        assert!(synth.merge("short", bogus, Vec::new()).is_empty());
    }

    #[test]
    fn merge_resolves_overlap_in_favor_of_earlier_entity() {
        let synth = EntitySynthesizer::new();
        let text = "@tarot_bot hello";
        let entities = vec![
            CanonicalEntity {
                kind: EntityKind::Mention,
                offset: 0,
                length: 10,
                user: None,
            },
            CanonicalEntity {
                kind: EntityKind::Formatting,
                offset: 5,
                length: 4,
                user: None,
            },
        ];
        let merged = synth.merge(text, entities, Vec::new());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].kind, EntityKind::Mention);
    }

    #[test]
    fn synthesis_is_idempotent_over_correct_entities() {
        let synth = EntitySynthesizer::new();
        let text = "/tarot 测事业";
        let first = synth.merge(text, Vec::new(), synth.synthesize(text));
        let second = synth.merge(text, first.clone(), synth.synthesize(text));
        assert_eq!(first, second);
    }
}
