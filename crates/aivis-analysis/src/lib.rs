//! Pure, synchronous analysis of answer text for AIVIS.
//!
//! Everything in this crate is deterministic and performs no I/O: pricing
//! an invocation, tagging detected mentions inside answer text, extracting
//! citations, and choosing which detected brands become new competitors.
//! The pipeline calls these between its external-call boundaries.

pub mod citations;
pub mod cost;
pub mod enrichment;
pub mod error;
pub mod tagger;

pub use citations::{extract_citations, Citation};
pub use cost::{calculate_cost, CostBreakdown};
pub use enrichment::select_new_competitors;
pub use error::CostError;
pub use tagger::{
    extract_tagged_brands, tag_mentions, SkipReason, TagFailure, TagOptions, TagOutcome,
    TagReport, TaggedBrand,
};
