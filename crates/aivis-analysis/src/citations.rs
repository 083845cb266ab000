//! Citation extraction from answer text.
//!
//! Two passes over the same text: structured markdown links first, then bare
//! `http(s)://` URLs that do not sit inside a markdown link. Results are
//! deduplicated by normalized URL in the order they were found.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;

use aivis_core::CitationSource;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// `[title](url)`, allowing one level of balanced parentheses inside the URL.
static MARKDOWN_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]\n]*)\]\((https?://(?:[^()\s]|\([^()\s]*\))+)\)").expect("valid regex")
});

static BARE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'\[\]]+"#).expect("valid regex"));

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '"', '\''];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// URL as it appeared in the text.
    pub url: String,
    pub normalized_url: String,
    pub domain: String,
    pub title: String,
    pub source: CitationSource,
}

/// Extract every distinct citation from `text`.
///
/// Pure and total: the same input always yields the same list, and malformed
/// or host-less URLs are dropped rather than reported.
#[must_use]
pub fn extract_citations(text: &str) -> Vec<Citation> {
    let mut seen = HashSet::new();
    let mut citations = Vec::new();
    let mut structured_ranges: Vec<Range<usize>> = Vec::new();

    for caps in MARKDOWN_LINK_RE.captures_iter(text) {
        let (Some(whole), Some(title), Some(url)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        structured_ranges.push(whole.range());
        if let Some(citation) =
            build_citation(url.as_str(), Some(title.as_str()), CitationSource::Structured)
        {
            push_unique(&mut citations, &mut seen, citation);
        }
    }

    for found in BARE_URL_RE.find_iter(text) {
        if structured_ranges
            .iter()
            .any(|r| r.start <= found.start() && found.start() < r.end)
        {
            continue;
        }
        let url = trim_trailing_punctuation(found.as_str());
        if let Some(citation) = build_citation(url, None, CitationSource::BareUrl) {
            push_unique(&mut citations, &mut seen, citation);
        }
    }

    citations
}

fn push_unique(citations: &mut Vec<Citation>, seen: &mut HashSet<String>, citation: Citation) {
    if seen.insert(citation.normalized_url.clone()) {
        citations.push(citation);
    }
}

/// Drop sentence punctuation and unbalanced closing parens from a bare URL.
fn trim_trailing_punctuation(url: &str) -> &str {
    let mut end = url.len();
    loop {
        let current = &url[..end];
        let Some(last) = current.chars().next_back() else {
            break;
        };
        let unbalanced_paren =
            last == ')' && current.matches(')').count() > current.matches('(').count();
        if TRAILING_PUNCTUATION.contains(&last) || unbalanced_paren {
            end -= last.len_utf8();
        } else {
            break;
        }
    }
    &url[..end]
}

fn build_citation(raw: &str, title: Option<&str>, source: CitationSource) -> Option<Citation> {
    let (normalized, domain) = normalize_url(raw)?;
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map_or_else(|| domain.clone(), ToString::to_string);
    Some(Citation {
        url: raw.to_string(),
        normalized_url: normalized,
        domain,
        title,
        source,
    })
}

/// Canonical form of `raw` and its display domain.
///
/// Scheme and host are lower-cased, a leading `www.` is removed, the fragment
/// and `utm_*` tracking parameters are dropped, and a trailing `/` is trimmed
/// from non-root paths. Returns `None` for unparseable or host-less URLs.
fn normalize_url(raw: &str) -> Option<(String, String)> {
    let mut url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    let host = url.host_str()?.to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }
    let domain = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if domain.is_empty() {
        return None;
    }
    if domain != host {
        url.set_host(Some(&domain)).ok()?;
    }

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.to_ascii_lowercase().starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if url.query().is_some() {
        if kept.is_empty() {
            url.set_query(None);
        } else if kept.len() != url.query_pairs().count() {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        url.set_path(if trimmed.is_empty() { "/" } else { &trimmed });
    }

    Some((url.to_string(), domain))
}
