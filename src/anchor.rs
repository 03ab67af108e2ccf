//! Clause-to-text anchoring.
//!
//! Locates each clause's anchor excerpt inside the current contract body so
//! it can be visually distinguished, tolerating the whitespace drift that
//! text extraction introduces. Re-run whenever the document text or the
//! clause list changes.

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::models::{usable_anchor, Clause};

/// A located anchor: byte offsets into the document plus the owning clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchoredSpan {
    pub start: usize,
    pub end: usize,
    pub clause_id: String,
}

/// One segment of the partitioned document. `clause_id` is `None` for plain
/// text between highlights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocSpan {
    pub text: String,
    pub clause_id: Option<String>,
}

/// Build a whitespace-tolerant, case-insensitive matcher for `anchor`.
///
/// Every regex metacharacter in the anchor is escaped and every whitespace
/// run becomes `\s+`, so `"pay within 30 days"` matches
/// `"pay within   30\ndays"`. Returns `None` for empty anchors, the `"N/A"`
/// sentinel, or anchors too large to compile.
pub fn flexible_pattern(anchor: &str) -> Option<Regex> {
    if !usable_anchor(anchor) {
        return None;
    }
    let mut pattern = String::new();
    for (i, word) in anchor.split_whitespace().enumerate() {
        if i > 0 {
            pattern.push_str(r"\s+");
        }
        pattern.push_str(&regex::escape(word));
    }
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()
}

/// Locate every anchorable clause in `document`: first match per clause,
/// sorted ascending by start, overlaps clamped so the later span in sort
/// order wins the overlapping region.
pub fn locate_clauses(document: &str, clauses: &[Clause]) -> Vec<AnchoredSpan> {
    let mut spans: Vec<AnchoredSpan> = Vec::new();
    for clause in clauses {
        let Some(pattern) = flexible_pattern(&clause.anchor_text) else {
            continue;
        };
        match pattern.find(document) {
            Some(found) => spans.push(AnchoredSpan {
                start: found.start(),
                end: found.end(),
                clause_id: clause.id.clone(),
            }),
            None => debug!(clause = %clause.id, "anchor text not found in document"),
        }
    }
    spans.sort_by_key(|span| span.start);
    for i in 0..spans.len().saturating_sub(1) {
        let next_start = spans[i + 1].start;
        if spans[i].end > next_start {
            spans[i].end = next_start;
        }
    }
    spans.retain(|span| span.start < span.end);
    spans
}

/// Partition `document` into alternating plain and highlighted segments in
/// one left-to-right pass. `spans` must be sorted and non-overlapping, as
/// produced by [`locate_clauses`].
pub fn partition_document(document: &str, spans: &[AnchoredSpan]) -> Vec<DocSpan> {
    let mut segments = Vec::with_capacity(spans.len() * 2 + 1);
    let mut cursor = 0usize;
    for span in spans {
        if span.start > cursor {
            segments.push(DocSpan {
                text: document[cursor..span.start].to_string(),
                clause_id: None,
            });
        }
        segments.push(DocSpan {
            text: document[span.start..span.end].to_string(),
            clause_id: Some(span.clause_id.clone()),
        });
        cursor = span.end;
    }
    if cursor < document.len() {
        segments.push(DocSpan {
            text: document[cursor..].to_string(),
            clause_id: None,
        });
    }
    segments
}

/// Convenience: locate then partition.
pub fn highlight(document: &str, clauses: &[Clause]) -> Vec<DocSpan> {
    partition_document(document, &locate_clauses(document, clauses))
}
