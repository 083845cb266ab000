//! Competitor candidate selection.
//!
//! Persistence is idempotent on its own (`ON CONFLICT DO NOTHING` on the
//! case-insensitive unique index); this filter keeps obviously redundant
//! rows from reaching the database at all.

use std::collections::HashSet;

use aivis_core::{DetectedMention, MentionKind, MENTION_CONFIDENCE_THRESHOLD};

fn fold(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Choose which detected brand names should become new competitors.
///
/// A mention qualifies when it is a brand with confidence at or above the
/// threshold, and its trimmed name is neither the company itself nor an
/// existing competitor (case-insensitive). Within the batch the first
/// spelling of a name wins.
#[must_use]
pub fn select_new_competitors<'a, I>(
    company_name: &str,
    existing_competitors: I,
    mentions: &[DetectedMention],
) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut known: HashSet<String> = existing_competitors.into_iter().map(fold).collect();
    known.insert(fold(company_name));

    let mut selected = Vec::new();
    for mention in mentions {
        if mention.kind != MentionKind::Brand || mention.confidence < MENTION_CONFIDENCE_THRESHOLD
        {
            continue;
        }
        let name = mention.name.trim();
        if name.is_empty() {
            continue;
        }
        if known.insert(fold(name)) {
            selected.push(name.to_string());
        }
    }
    selected
}
