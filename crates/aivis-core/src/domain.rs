//! Status and kind enums shared by the pipeline, persistence, and API layers.
//!
//! Every enum round-trips through the lowercase string stored in Postgres
//! (`as_str` / `FromStr`) and through serde with the same spelling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Mentions below this confidence are neither tagged nor enriched.
pub const MENTION_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Error returned when a stored status string is not a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(
    /// Lifecycle of a report run: `pending -> running -> {completed, failed}`.
    RunStatus, "run status", {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
);

impl RunStatus {
    /// Completed and failed runs are immutable.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

string_enum!(
    AnswerStatus, "answer status", {
        Succeeded => "succeeded",
        Failed => "failed",
    }
);

string_enum!(
    /// What a detected mention refers to.
    MentionKind, "mention kind", {
        Brand => "brand",
        Product => "product",
    }
);

string_enum!(
    /// Outcome of tagging a single mention.
    TagStatus, "tag status", {
        Tagged => "tagged",
        Failed => "failed",
        Skipped => "skipped",
    }
);

string_enum!(
    /// How a citation was found in the answer text.
    CitationSource, "citation source", {
        Structured => "structured",
        BareUrl => "bare_url",
    }
);

string_enum!(
    /// Which backend call a cost record belongs to.
    InvocationKind, "invocation kind", {
        Generation => "generation",
        Detection => "detection",
    }
);

string_enum!(
    /// State of a row in the `report_jobs` queue.
    JobStatus, "job status", {
        Queued => "queued",
        Running => "running",
        Done => "done",
        Dead => "dead",
    }
);

/// Billable counts reported by one backend invocation.
///
/// Counts are signed: a negative value is a credit or correction and flows
/// through cost arithmetic unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cached_tokens: i64,
    pub thinking_tokens: i64,
    pub searches: i64,
}

impl TokenUsage {
    /// Sum of every token category (searches are not tokens).
    #[must_use]
    pub fn total_tokens(&self) -> i64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cached_tokens)
            .saturating_add(self.thinking_tokens)
    }
}

impl std::ops::Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_tokens: self.input_tokens.saturating_add(rhs.input_tokens),
            output_tokens: self.output_tokens.saturating_add(rhs.output_tokens),
            cached_tokens: self.cached_tokens.saturating_add(rhs.cached_tokens),
            thinking_tokens: self.thinking_tokens.saturating_add(rhs.thinking_tokens),
            searches: self.searches.saturating_add(rhs.searches),
        }
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for TokenUsage {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, u| acc + u)
    }
}

/// A brand or product reference reported by the mention-detection backend.
///
/// `offset` counts Unicode scalar values (not bytes) from the start of the
/// exact text that was submitted for detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedMention {
    pub name: String,
    pub kind: MentionKind,
    pub confidence: f64,
    pub context: Option<String>,
    pub offset: usize,
}
