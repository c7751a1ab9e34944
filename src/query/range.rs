//! Compact range lists such as `"0-5,10:12,25"`.
//!
//! Grammar (comma separated tokens, expanded in the order given):
//!
//! | Token | Expands to |
//! |-------|-----------|
//! | `N`   | `N` |
//! | `A-B` | `A..=B` (inclusive) |
//! | `A:B` | `A..B` (exclusive of `B`) |
//!
//! The result is neither sorted nor deduplicated. `A > B` is an error rather
//! than an empty range, and a list expanding past [`MAX_EXPANDED_VALUES`]
//! integers is rejected.

use std::ops::RangeInclusive;

use crate::error::{InspectorError, Result};

/// Most integers a single range list may expand to.
pub const MAX_EXPANDED_VALUES: usize = 100_000;

/// Expand a range list into integers, preserving token order.
///
/// Lists expanding to more than [`MAX_EXPANDED_VALUES`] integers are a
/// validation error and are never materialised.
pub fn parse_ranges(text: &str) -> Result<Vec<i64>> {
    expand(text, &parse_spans(text)?)
}

/// Parse a fiber list and check every fiber lies in `0 <= FIBER < max_fiber`.
/// Bounds are checked on each token before anything is expanded.
pub fn parse_fibers(text: &str, max_fiber: i64) -> Result<Vec<i64>> {
    let spans = parse_spans(text)?;
    if spans.iter().any(|s| !s.is_empty() && (*s.start() < 0 || *s.end() >= max_fiber)) {
        return Err(InspectorError::validation(format!(
            "Fibers must be in 0 <= FIBER < {max_fiber}"
        )));
    }
    expand(text, &spans)
}

/// Parse a target id list (`"1234,5678"`, ranges allowed).
pub fn parse_target_ids(text: &str) -> Result<Vec<i64>> {
    parse_ranges(text)
}

/// One inclusive span per token; `A:A` is an empty span.
fn parse_spans(text: &str) -> Result<Vec<RangeInclusive<i64>>> {
    let mut spans = Vec::new();
    for token in text.split(',') {
        let malformed = || InspectorError::parse(format!("Failed to parse {token} as part of {text}"));

        let span = if let Some(value) = parse_literal(token) {
            value..=value
        } else if let Some((first, last)) = token.split_once('-') {
            let (first, last) = parse_bounds(first, last).ok_or_else(malformed)?;
            first..=last
        } else if let Some((first, last)) = token.split_once(':') {
            let (first, last) = parse_bounds(first, last).ok_or_else(malformed)?;
            // last >= first >= 0, so last - 1 cannot underflow
            first..=last - 1
        } else {
            return Err(malformed());
        };
        spans.push(span);
    }
    Ok(spans)
}

fn span_len(span: &RangeInclusive<i64>) -> u64 {
    if span.is_empty() {
        0
    } else {
        (span.end() - span.start()) as u64 + 1
    }
}

fn expand(text: &str, spans: &[RangeInclusive<i64>]) -> Result<Vec<i64>> {
    let total = spans.iter().map(span_len).fold(0u64, u64::saturating_add);
    if total > MAX_EXPANDED_VALUES as u64 {
        return Err(InspectorError::validation(format!(
            "{text} expands to {total} values; please limit the list to {MAX_EXPANDED_VALUES}"
        )));
    }
    let mut values = Vec::with_capacity(total as usize);
    for span in spans {
        values.extend(span.clone());
    }
    Ok(values)
}

/// A non-negative decimal literal made only of ASCII digits.
fn parse_literal(token: &str) -> Option<i64> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

fn parse_bounds(first: &str, last: &str) -> Option<(i64, i64)> {
    let first = parse_literal(first)?;
    let last = parse_literal(last)?;
    (first <= last).then_some((first, last))
}
