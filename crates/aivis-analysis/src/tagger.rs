//! Mention tagging: wraps validated mention spans in `<brand>` markers.
//!
//! Offsets are Unicode scalar (char) indices into the exact text the
//! detector saw. The tagger never searches for a name elsewhere in the text;
//! a mention whose offset does not point at its name is reported as a
//! failure and the text around it is left alone.

use std::fmt;
use std::sync::LazyLock;

use aivis_core::{DetectedMention, TagStatus, MENTION_CONFIDENCE_THRESHOLD};
use regex::Regex;

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<brand(?:\s+position\s*=\s*"(\d+)")?\s*>(.*?)</brand\s*>"#)
        .expect("valid regex")
});

#[derive(Debug, Clone, Copy)]
pub struct TagOptions<'a> {
    /// Mentions of the tracked company itself are never tagged.
    pub company_name: &'a str,
    /// Emit `<brand position="N">` instead of bare `<brand>`.
    pub position_attributes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    LowConfidence,
    SelfMention,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowConfidence => f.write_str("confidence below threshold"),
            Self::SelfMention => f.write_str("mention of the tracked company"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFailure {
    EmptyName,
    OutOfRange {
        offset: usize,
        len: usize,
        text_len: usize,
    },
    OffsetMismatch {
        expected: String,
        found: String,
    },
    Overlap {
        winner: String,
        winner_offset: usize,
    },
}

impl fmt::Display for TagFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => f.write_str("mention name is blank"),
            Self::OutOfRange {
                offset,
                len,
                text_len,
            } => write!(
                f,
                "span [{offset}, {}) is outside text of {text_len} chars",
                offset.saturating_add(*len)
            ),
            Self::OffsetMismatch { expected, found } => {
                write!(f, "expected '{expected}' at offset, found '{found}'")
            }
            Self::Overlap {
                winner,
                winner_offset,
            } => write!(f, "overlaps '{winner}' at offset {winner_offset}"),
        }
    }
}

/// What happened to one input mention. Index-aligned with the input slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagOutcome {
    Tagged,
    /// Same span as another accepted mention; one marker covers both.
    Duplicate,
    /// The span already sits inside an existing marker.
    AlreadyTagged,
    Skipped(SkipReason),
    Failed(TagFailure),
}

impl TagOutcome {
    #[must_use]
    pub fn status(&self) -> TagStatus {
        match self {
            Self::Tagged | Self::Duplicate | Self::AlreadyTagged => TagStatus::Tagged,
            Self::Skipped(_) => TagStatus::Skipped,
            Self::Failed(_) => TagStatus::Failed,
        }
    }

    /// Human-readable detail stored alongside the mention, if any.
    #[must_use]
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Tagged => None,
            Self::Duplicate => Some("duplicate span".to_string()),
            Self::AlreadyTagged => Some("already tagged".to_string()),
            Self::Skipped(reason) => Some(reason.to_string()),
            Self::Failed(failure) => Some(failure.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagReport {
    pub tagged_text: String,
    pub outcomes: Vec<TagOutcome>,
}

impl TagReport {
    /// Indices of mentions that ended up inside a marker.
    pub fn succeeded(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices_with(TagStatus::Tagged)
    }

    pub fn failed(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices_with(TagStatus::Failed)
    }

    pub fn skipped(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices_with(TagStatus::Skipped)
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failed().count()
    }

    fn indices_with(&self, status: TagStatus) -> impl Iterator<Item = usize> + '_ {
        self.outcomes
            .iter()
            .enumerate()
            .filter(move |(_, o)| o.status() == status)
            .map(|(i, _)| i)
    }
}

/// A marker parsed back out of tagged text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedBrand {
    pub name: String,
    pub position: Option<usize>,
}

/// Char-indexed view of a string with O(1) char→byte conversion.
struct CharIndex<'a> {
    text: &'a str,
    bytes: Vec<usize>,
}

impl<'a> CharIndex<'a> {
    fn new(text: &'a str) -> Self {
        let bytes = text
            .char_indices()
            .map(|(b, _)| b)
            .chain(std::iter::once(text.len()))
            .collect();
        Self { text, bytes }
    }

    fn char_len(&self) -> usize {
        self.bytes.len() - 1
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.text[self.bytes[start]..self.bytes[end]]
    }

    /// Char index of a byte offset that lies on a char boundary.
    fn char_at_byte(&self, byte: usize) -> usize {
        self.bytes.partition_point(|&b| b < byte)
    }
}

/// Existing marker, in char offsets: the whole `<brand>…</brand>` and its body.
struct ExistingMarker {
    outer: (usize, usize),
    inner: (usize, usize),
    name: String,
}

fn existing_markers(index: &CharIndex<'_>) -> Vec<ExistingMarker> {
    MARKER_RE
        .captures_iter(index.text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let body = caps.get(2)?;
            Some(ExistingMarker {
                outer: (
                    index.char_at_byte(whole.start()),
                    index.char_at_byte(whole.end()),
                ),
                inner: (
                    index.char_at_byte(body.start()),
                    index.char_at_byte(body.end()),
                ),
                name: body.as_str().to_string(),
            })
        })
        .collect()
}

fn same_ignoring_case(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

fn overlaps(a: (usize, usize), b: (usize, usize)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    mention: usize,
    start: usize,
    end: usize,
    confidence: f64,
}

impl Candidate {
    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// Validate each mention against `raw_text` and wrap the accepted spans.
///
/// The returned `outcomes` vector is index-aligned with `mentions`. Text
/// outside accepted spans is copied through unchanged.
#[must_use]
pub fn tag_mentions(
    raw_text: &str,
    mentions: &[DetectedMention],
    options: &TagOptions<'_>,
) -> TagReport {
    let index = CharIndex::new(raw_text);
    let markers = existing_markers(&index);
    let company = options.company_name.trim();

    // Every slot is overwritten below; candidates are resolved after the scan.
    let mut outcomes = vec![TagOutcome::Tagged; mentions.len()];
    let mut candidates = Vec::new();

    for (i, mention) in mentions.iter().enumerate() {
        let name = mention.name.as_str();
        if mention.confidence < MENTION_CONFIDENCE_THRESHOLD {
            outcomes[i] = TagOutcome::Skipped(SkipReason::LowConfidence);
            continue;
        }
        if name.trim().is_empty() {
            outcomes[i] = TagOutcome::Failed(TagFailure::EmptyName);
            continue;
        }
        if !company.is_empty() && same_ignoring_case(name.trim(), company) {
            outcomes[i] = TagOutcome::Skipped(SkipReason::SelfMention);
            continue;
        }

        let len = name.chars().count();
        let start = mention.offset;
        let end = match start.checked_add(len) {
            Some(end) if end <= index.char_len() => end,
            _ => {
                outcomes[i] = TagOutcome::Failed(TagFailure::OutOfRange {
                    offset: start,
                    len,
                    text_len: index.char_len(),
                });
                continue;
            }
        };

        let found = index.slice(start, end);
        if !same_ignoring_case(found, name) {
            outcomes[i] = TagOutcome::Failed(TagFailure::OffsetMismatch {
                expected: name.to_string(),
                found: found.to_string(),
            });
            continue;
        }

        if markers
            .iter()
            .any(|m| m.inner.0 <= start && end <= m.inner.1)
        {
            outcomes[i] = TagOutcome::AlreadyTagged;
            continue;
        }
        if let Some(m) = markers.iter().find(|m| overlaps(m.outer, (start, end))) {
            outcomes[i] = TagOutcome::Failed(TagFailure::Overlap {
                winner: m.name.clone(),
                winner_offset: m.inner.0,
            });
            continue;
        }

        candidates.push(Candidate {
            mention: i,
            start,
            end,
            confidence: mention.confidence,
        });
    }

    // Longest span first, then higher confidence, then earlier offset.
    candidates.sort_by(|a, b| {
        b.len()
            .cmp(&a.len())
            .then_with(|| b.confidence.total_cmp(&a.confidence))
            .then_with(|| a.start.cmp(&b.start))
            .then_with(|| a.mention.cmp(&b.mention))
    });

    let mut accepted: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let outcome = if accepted
            .iter()
            .any(|a| a.start == candidate.start && a.end == candidate.end)
        {
            TagOutcome::Duplicate
        } else if let Some(winner) = accepted
            .iter()
            .find(|a| overlaps((a.start, a.end), (candidate.start, candidate.end)))
        {
            TagOutcome::Failed(TagFailure::Overlap {
                winner: index.slice(winner.start, winner.end).to_string(),
                winner_offset: winner.start,
            })
        } else {
            accepted.push(candidate);
            TagOutcome::Tagged
        };
        outcomes[candidate.mention] = outcome;
    }

    accepted.sort_by_key(|c| c.start);
    let tagged_text = render(&index, &accepted, options.position_attributes);

    TagReport {
        tagged_text,
        outcomes,
    }
}

fn render(index: &CharIndex<'_>, accepted: &[Candidate], position_attributes: bool) -> String {
    let extra = accepted.len() * "<brand position=\"0000\"></brand>".len();
    let mut out = String::with_capacity(index.text.len() + extra);
    let mut cursor = 0;
    for span in accepted {
        out.push_str(index.slice(cursor, span.start));
        if position_attributes {
            out.push_str(&format!("<brand position=\"{}\">", span.start));
        } else {
            out.push_str("<brand>");
        }
        out.push_str(index.slice(span.start, span.end));
        out.push_str("</brand>");
        cursor = span.end;
    }
    out.push_str(index.slice(cursor, index.char_len()));
    out
}

/// Parse every `<brand>` marker in `text`, in document order.
///
/// Tag names are matched case-insensitively and both the bare and the
/// `position="N"` forms are accepted.
#[must_use]
pub fn extract_tagged_brands(text: &str) -> Vec<TaggedBrand> {
    MARKER_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let name = caps.get(2)?.as_str();
            Some(TaggedBrand {
                name: name.to_string(),
                position: caps.get(1).and_then(|p| p.as_str().parse().ok()),
            })
        })
        .collect()
}

#[cfg(test)]
#[path = "tagger_test.rs"]
mod tests;
