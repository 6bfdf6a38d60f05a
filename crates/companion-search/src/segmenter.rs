//! Markdown-aware document segmentation under a token budget.
//!
//! Splits a document along its heading structure, keeps only the regions
//! that contain one of the matched block texts, and recurses into regions
//! that still exceed the budget. Documents without useful headings fall back
//! to paragraph packing. Output strings are verbatim slices of the source
//! document, so callers can feed them straight into a prompt.

use pulldown_cmark::{Event, Options, Parser, Tag};
use tracing::warn;

use crate::error::{Result, SearchError};
use crate::tokenizer::TokenCounter;

/// Default per-segment token budget
pub const MAX_SEGMENT_TOKENS: usize = 512;

/// Split `document` into segments of at most `budget` tokens covering the
/// given `matching_blocks`.
///
/// Every returned segment either fits the budget or is a single indivisible
/// paragraph that exceeds it on its own (returned as-is with a warning).
/// Calling with no matching blocks is a programming error.
pub fn segment(
    document: &str,
    matching_blocks: &[String],
    counter: &TokenCounter,
    budget: usize,
) -> Result<Vec<String>> {
    if matching_blocks.is_empty() {
        return Err(SearchError::Segmentation(
            "matching_blocks must not be empty".to_string(),
        ));
    }

    Ok(segment_inner(document, matching_blocks, counter, budget))
}

fn segment_inner(
    document: &str,
    matching: &[String],
    counter: &TokenCounter,
    budget: usize,
) -> Vec<String> {
    // A document already within budget is never split.
    if counter.count(document) <= budget {
        return vec![document.to_string()];
    }

    let headings = heading_offsets(document);
    if headings.is_empty() {
        return paragraph_fallback(document, matching, counter, budget);
    }

    let mut levels: Vec<u32> = headings.iter().map(|(level, _)| *level).collect();
    levels.sort_unstable();
    levels.dedup();

    for level in levels {
        let blocks = split_at_level(document, &headings, level);
        if blocks.len() <= 1 {
            // No real split at this level; descend to the next one.
            continue;
        }

        let mut segments = Vec::new();
        for (title, body) in blocks {
            let probe = format!("{title}\n{body}");
            let subset: Vec<String> = matching
                .iter()
                .filter(|needle| probe.contains(needle.as_str()))
                .cloned()
                .collect();
            if subset.is_empty() || body.is_empty() {
                continue;
            }

            if counter.count(&body) <= budget {
                segments.push(body);
            } else {
                // The body excludes this level's heading line, so the
                // recursion descends to deeper levels or the fallback.
                segments.extend(segment_inner(&body, &subset, counter, budget));
            }
        }
        return segments;
    }

    paragraph_fallback(document, matching, counter, budget)
}

/// Byte offsets of every heading, as `(level, start)` pairs in document order.
fn heading_offsets(document: &str) -> Vec<(u32, usize)> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);

    Parser::new_ext(document, options)
        .into_offset_iter()
        .filter_map(|(event, range)| match event {
            Event::Start(Tag::Heading { level, .. }) => Some((level as u32, range.start)),
            _ => None,
        })
        .collect()
}

/// Split the document at headings of exactly `level` into `(title, body)`
/// blocks.
///
/// Text before the first such heading becomes an untitled preamble block.
/// Each heading's title is its own line; its body runs up to the next
/// heading of the same level.
fn split_at_level(document: &str, headings: &[(u32, usize)], level: u32) -> Vec<(String, String)> {
    let mut cuts: Vec<usize> = headings
        .iter()
        .filter(|(l, _)| *l == level)
        .map(|(_, offset)| *offset)
        .collect();

    if cuts.is_empty() {
        return Vec::new();
    }

    let mut blocks = Vec::new();

    let preamble = document[..cuts[0]].trim();
    if !preamble.is_empty() {
        blocks.push((String::new(), preamble.to_string()));
    }

    cuts.push(document.len());
    for window in cuts.windows(2) {
        let slice = document[window[0]..window[1]].trim();
        match slice.split_once('\n') {
            Some((title, body)) => {
                blocks.push((title.trim().to_string(), body.trim().to_string()));
            }
            None => blocks.push((slice.to_string(), String::new())),
        }
    }

    blocks
}

/// Terminal fallback: split on blank lines and greedily re-pack adjacent
/// paragraphs up to the budget, then keep only the chunks containing a
/// matching block.
fn paragraph_fallback(
    text: &str,
    matching: &[String],
    counter: &TokenCounter,
    budget: usize,
) -> Vec<String> {
    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        if current.is_empty() {
            current = paragraph.to_string();
            continue;
        }

        let candidate = format!("{current}\n\n{paragraph}");
        if counter.count(&candidate) <= budget {
            current = candidate;
        } else {
            chunks.push(current);
            current = paragraph.to_string();
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    for chunk in &chunks {
        if counter.count(chunk) > budget {
            warn!(
                "indivisible paragraph exceeds the segment budget ({} tokens > {budget})",
                counter.count(chunk)
            );
        }
    }

    chunks
        .into_iter()
        .filter(|chunk| matching.iter().any(|needle| chunk.contains(needle.as_str())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::TokenizerRegistry;
    use std::sync::Arc;

    fn counter() -> Arc<TokenCounter> {
        TokenizerRegistry::new().counter_for("gpt-3.5-turbo")
    }

    fn blocks(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_matching_blocks_rejected() {
        let counter = counter();
        let result = segment("# Doc", &[], &counter, 100);
        assert!(matches!(result, Err(SearchError::Segmentation(_))));
    }

    #[test]
    fn test_document_within_budget_not_split() {
        let counter = counter();
        let document = "# Title\n\nShort body";
        let segments = segment(document, &blocks(&["Short body"]), &counter, 1000).unwrap();
        assert_eq!(segments, vec![document.to_string()]);
    }

    #[test]
    fn test_heading_split_covers_all_matching_blocks() {
        let counter = counter();
        let document = "# H1\nP1\n\n## H2\nP2";
        let segments = segment(document, &blocks(&["P1", "P2"]), &counter, 8).unwrap();

        assert!(!segments.is_empty());
        assert!(segments.iter().any(|s| s.contains("P1")), "{segments:?}");
        assert!(segments.iter().any(|s| s.contains("P2")), "{segments:?}");
        for segment in &segments {
            assert!(counter.count(segment) <= 8, "over budget: {segment:?}");
        }
    }

    #[test]
    fn test_sections_without_matches_are_dropped() {
        let counter = counter();
        let document = "# Alpha\n\nalpha body text here\n\n# Beta\n\nbeta body text here";
        let segments = segment(document, &blocks(&["alpha body"]), &counter, 8).unwrap();

        assert!(segments.iter().any(|s| s.contains("alpha body")));
        assert!(segments.iter().all(|s| !s.contains("beta body")), "{segments:?}");
    }

    #[test]
    fn test_no_headings_uses_paragraph_fallback() {
        let counter = counter();
        let document = "first paragraph here\n\nsecond paragraph here\n\nthird paragraph here";
        let segments = segment(document, &blocks(&["second paragraph"]), &counter, 5).unwrap();

        assert!(!segments.is_empty());
        assert!(segments.iter().any(|s| s.contains("second paragraph")));
    }

    #[test]
    fn test_paragraph_fallback_packs_adjacent_paragraphs() {
        let counter = counter();
        let document = "one two\n\nthree four\n\nfive six";
        let segments = segment(document, &blocks(&["three four"]), &counter, 6).unwrap();

        assert!(!segments.is_empty());
        assert!(segments.iter().any(|s| s.contains("three four")));
        for segment in &segments {
            assert!(counter.count(segment) <= 6, "over budget: {segment:?}");
        }
    }

    #[test]
    fn test_oversized_indivisible_paragraph_returned_as_is() {
        let counter = counter();
        let long_paragraph = "token ".repeat(50);
        let document = format!("{}\n\nneedle paragraph", long_paragraph.trim());
        let segments = segment(&document, &blocks(&["token token"]), &counter, 10).unwrap();

        // The matching paragraph cannot be reduced below the budget, so it
        // comes back whole.
        assert!(segments.iter().any(|s| counter.count(s) > 10));
    }

    #[test]
    fn test_single_heading_descends_to_deeper_level() {
        let counter = counter();
        // One H1 at the very start: splitting at level 1 yields one block, so
        // the splitter must descend to the H2s.
        let document = "# Only\n\n## A\nalpha content words\n\n## B\nbeta content words";
        let segments = segment(document, &blocks(&["alpha content"]), &counter, 8).unwrap();

        assert!(segments.iter().any(|s| s.contains("alpha content")), "{segments:?}");
        assert!(segments.iter().all(|s| !s.contains("beta content")));
    }

    #[test]
    fn test_recursion_descends_into_oversized_section() {
        let counter = counter();
        let document = "# Top\n\n## Sub A\nneedle text lives here\n\n## Sub B\nother text sits here\n\n# Next\n\ntail";
        let segments = segment(document, &blocks(&["needle text"]), &counter, 8).unwrap();

        assert!(segments.iter().any(|s| s.contains("needle text")), "{segments:?}");
        for segment in &segments {
            assert!(counter.count(segment) <= 8, "over budget: {segment:?}");
        }
    }

    #[test]
    fn test_segments_are_verbatim_slices() {
        let counter = counter();
        let document = "# A\nalpha alpha alpha\n\n# B\nbeta beta beta";
        let segments = segment(document, &blocks(&["alpha", "beta"]), &counter, 5).unwrap();
        for segment in &segments {
            assert!(document.contains(segment.as_str()), "not a slice: {segment:?}");
        }
    }
}
