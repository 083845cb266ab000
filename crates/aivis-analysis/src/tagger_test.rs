use aivis_core::{DetectedMention, MentionKind, TagStatus};

use super::*;

const TEXT: &str = "Acme leads, followed by Globex and Initech.";

fn mention(name: &str, offset: usize) -> DetectedMention {
    DetectedMention {
        name: name.to_string(),
        kind: MentionKind::Brand,
        confidence: 0.9,
        context: None,
        offset,
    }
}

fn with_confidence(mut m: DetectedMention, confidence: f64) -> DetectedMention {
    m.confidence = confidence;
    m
}

fn opts() -> TagOptions<'static> {
    TagOptions {
        company_name: "Acme",
        position_attributes: false,
    }
}

#[test]
fn wraps_competitor_at_its_offset() {
    let report = tag_mentions(TEXT, &[mention("Globex", 24)], &opts());
    assert_eq!(
        report.tagged_text,
        "Acme leads, followed by <brand>Globex</brand> and Initech."
    );
    assert_eq!(report.outcomes, vec![TagOutcome::Tagged]);
    assert_eq!(report.succeeded().collect::<Vec<_>>(), vec![0]);
}

#[test]
fn already_tagged_text_is_left_unchanged() {
    let text = "Acme leads, followed by <brand>Globex</brand> and Initech.";
    let report = tag_mentions(text, &[mention("Globex", 31)], &opts());
    assert_eq!(report.tagged_text, text);
    assert_eq!(report.outcomes, vec![TagOutcome::AlreadyTagged]);
    assert_eq!(report.outcomes[0].status(), TagStatus::Tagged);
}

#[test]
fn wrong_offset_fails_and_leaves_text_untouched() {
    let report = tag_mentions(TEXT, &[mention("Globex", 19)], &opts());
    assert_eq!(report.tagged_text, TEXT);
    assert!(matches!(
        &report.outcomes[0],
        TagOutcome::Failed(TagFailure::OffsetMismatch { expected, found })
            if expected == "Globex" && found == "d by G"
    ));
    assert_eq!(report.failure_count(), 1);
}

#[test]
fn offset_past_end_is_out_of_range() {
    let report = tag_mentions(TEXT, &[mention("Initech", 40)], &opts());
    assert_eq!(report.tagged_text, TEXT);
    assert!(matches!(
        report.outcomes[0],
        TagOutcome::Failed(TagFailure::OutOfRange { offset: 40, len: 7, .. })
    ));
}

#[test]
fn huge_offset_does_not_overflow() {
    let report = tag_mentions(TEXT, &[mention("Initech", usize::MAX)], &opts());
    assert!(matches!(
        report.outcomes[0],
        TagOutcome::Failed(TagFailure::OutOfRange { .. })
    ));
}

#[test]
fn low_confidence_and_self_mentions_are_skipped() {
    let mentions = [
        with_confidence(mention("Globex", 24), 0.49),
        mention("acme", 0),
        mention("Initech", 35),
    ];
    let report = tag_mentions(TEXT, &mentions, &opts());
    assert_eq!(
        report.outcomes,
        vec![
            TagOutcome::Skipped(SkipReason::LowConfidence),
            TagOutcome::Skipped(SkipReason::SelfMention),
            TagOutcome::Tagged,
        ]
    );
    assert_eq!(
        report.tagged_text,
        "Acme leads, followed by Globex and <brand>Initech</brand>."
    );
    assert_eq!(report.skipped().count(), 2);
}

#[test]
fn confidence_at_threshold_is_tagged() {
    let report = tag_mentions(
        TEXT,
        &[with_confidence(mention("Globex", 24), 0.5)],
        &opts(),
    );
    assert_eq!(report.outcomes, vec![TagOutcome::Tagged]);
}

#[test]
fn blank_name_fails() {
    let report = tag_mentions(TEXT, &[mention("  ", 0)], &opts());
    assert_eq!(
        report.outcomes,
        vec![TagOutcome::Failed(TagFailure::EmptyName)]
    );
}

#[test]
fn case_insensitive_match_keeps_original_spelling() {
    let report = tag_mentions(TEXT, &[mention("GLOBEX", 24)], &opts());
    assert_eq!(
        report.tagged_text,
        "Acme leads, followed by <brand>Globex</brand> and Initech."
    );
}

#[test]
fn multiple_mentions_are_tagged_in_one_pass() {
    let report = tag_mentions(
        TEXT,
        &[mention("Initech", 35), mention("Globex", 24)],
        &opts(),
    );
    assert_eq!(
        report.tagged_text,
        "Acme leads, followed by <brand>Globex</brand> and <brand>Initech</brand>."
    );
    assert_eq!(report.succeeded().count(), 2);
}

#[test]
fn offsets_count_chars_not_bytes() {
    let text = "Café Müller prefers Globex.";
    let report = tag_mentions(text, &[mention("Globex", 20)], &opts());
    assert_eq!(report.tagged_text, "Café Müller prefers <brand>Globex</brand>.");
}

#[test]
fn multibyte_names_are_sliced_on_char_boundaries() {
    let text = "Try Zürich Bank or Globex.";
    let report = tag_mentions(text, &[mention("Zürich Bank", 4)], &opts());
    assert_eq!(report.tagged_text, "Try <brand>Zürich Bank</brand> or Globex.");
}

#[test]
fn longer_overlapping_span_wins() {
    let text = "We like Globex Systems a lot.";
    let mentions = [
        with_confidence(mention("Globex", 8), 0.99),
        with_confidence(mention("Globex Systems", 8), 0.6),
    ];
    let report = tag_mentions(text, &mentions, &opts());
    assert_eq!(report.tagged_text, "We like <brand>Globex Systems</brand> a lot.");
    assert_eq!(
        report.outcomes[0],
        TagOutcome::Failed(TagFailure::Overlap {
            winner: "Globex Systems".to_string(),
            winner_offset: 8,
        })
    );
    assert_eq!(report.outcomes[1], TagOutcome::Tagged);
}

#[test]
fn equal_length_overlap_prefers_higher_confidence() {
    let text = "abcdef";
    let mentions = [
        with_confidence(mention("abcd", 0), 0.6),
        with_confidence(mention("cdef", 2), 0.8),
    ];
    let report = tag_mentions(text, &mentions, &opts());
    assert_eq!(report.tagged_text, "ab<brand>cdef</brand>");
    assert!(matches!(
        report.outcomes[0],
        TagOutcome::Failed(TagFailure::Overlap { winner_offset: 2, .. })
    ));
}

#[test]
fn full_tie_prefers_lower_offset() {
    let text = "abcdef";
    let mentions = [mention("cdef", 2), mention("abcd", 0)];
    let report = tag_mentions(text, &mentions, &opts());
    assert_eq!(report.tagged_text, "<brand>abcd</brand>ef");
    assert_eq!(report.outcomes[1], TagOutcome::Tagged);
}

#[test]
fn identical_spans_collapse_into_one_marker() {
    let report = tag_mentions(
        TEXT,
        &[mention("Globex", 24), mention("globex", 24)],
        &opts(),
    );
    assert_eq!(
        report.tagged_text,
        "Acme leads, followed by <brand>Globex</brand> and Initech."
    );
    assert_eq!(report.succeeded().count(), 2);
    assert!(report.outcomes.contains(&TagOutcome::Duplicate));
}

#[test]
fn span_crossing_an_existing_marker_fails() {
    let text = "Buy <brand>Globex</brand> Systems";
    // Starts inside the marker body and runs into the closing tag.
    let report = tag_mentions(text, &[mention("ex</brand", 15)], &opts());
    assert_eq!(report.tagged_text, text);
    assert!(matches!(
        &report.outcomes[0],
        TagOutcome::Failed(TagFailure::Overlap { winner, .. }) if winner == "Globex"
    ));
}

#[test]
fn position_attributes_carry_the_char_offset() {
    let options = TagOptions {
        company_name: "Acme",
        position_attributes: true,
    };
    let report = tag_mentions(TEXT, &[mention("Globex", 24)], &options);
    assert_eq!(
        report.tagged_text,
        "Acme leads, followed by <brand position=\"24\">Globex</brand> and Initech."
    );
}

#[test]
fn no_mentions_returns_text_verbatim() {
    let report = tag_mentions(TEXT, &[], &opts());
    assert_eq!(report.tagged_text, TEXT);
    assert!(report.outcomes.is_empty());
}

#[test]
fn extract_reads_bare_and_attributed_markers() {
    let text = "<brand>Globex</brand> vs <BRAND position=\"40\">Initech</Brand>";
    let brands = extract_tagged_brands(text);
    assert_eq!(
        brands,
        vec![
            TaggedBrand {
                name: "Globex".to_string(),
                position: None,
            },
            TaggedBrand {
                name: "Initech".to_string(),
                position: Some(40),
            },
        ]
    );
}

#[test]
fn extract_round_trips_tagger_output() {
    let report = tag_mentions(
        TEXT,
        &[mention("Globex", 24), mention("Initech", 35)],
        &TagOptions {
            company_name: "Acme",
            position_attributes: true,
        },
    );
    let names: Vec<_> = extract_tagged_brands(&report.tagged_text)
        .into_iter()
        .map(|b| (b.name, b.position))
        .collect();
    assert_eq!(
        names,
        vec![
            ("Globex".to_string(), Some(24)),
            ("Initech".to_string(), Some(35)),
        ]
    );
}
