//! Token time-stamp alignment.
//!
//! Walks tokens and word spans in lockstep, accumulating characters on
//! both sides until the accumulated texts agree (whitespace aside); the
//! token closing a group gets the group's word time span. Segments
//! whose token text and word text diverge (possible after LLM
//! re-segmentation) are skipped; consumers tolerate missing token
//! times.

use jimaku_core::Segment;
use jimaku_core::domain::segment::{squashed_text, squashed_token_text};

/// Align every segment's tokens in place.
pub fn align_all(segments: &mut [Segment]) {
    for segment in segments {
        align_tokens(segment);
    }
}

/// Align one segment's tokens to its word-level timings.
pub fn align_tokens(segment: &mut Segment) {
    if segment.tokens.is_empty() || segment.word_segments.is_empty() {
        return;
    }

    let tokens_text = squashed_token_text(&segment.tokens);
    let words_text: String = segment
        .word_segments
        .iter()
        .flat_map(|w| w.text.chars())
        .filter(|c| !c.is_whitespace())
        .collect();
    if tokens_text != words_text {
        tracing::debug!(
            text = %segment.text,
            "token and word texts diverge, skipping time alignment"
        );
        return;
    }

    let mut word_index = 0;
    let mut group_start = 0;

    for token_index in 0..segment.tokens.len() {
        if squashed_text(&segment.tokens[token_index].text).is_empty() {
            continue;
        }

        let tokens_acc: String = segment.tokens[group_start..=token_index]
            .iter()
            .flat_map(|t| t.text.chars())
            .filter(|c| !c.is_whitespace())
            .collect();

        let mut words_acc = String::new();
        let mut word_end = word_index;
        while word_end < segment.word_segments.len() {
            words_acc.extend(
                segment.word_segments[word_end]
                    .text
                    .chars()
                    .filter(|c| !c.is_whitespace()),
            );

            if tokens_acc == words_acc {
                segment.tokens[token_index].start_time =
                    Some(segment.word_segments[word_index].start_time);
                segment.tokens[token_index].end_time =
                    Some(segment.word_segments[word_end].end_time);
                word_index = word_end + 1;
                group_start = token_index + 1;
                break;
            } else if tokens_acc.chars().count() < words_acc.chars().count() {
                // The word covers more tokens; move to the next token.
                break;
            }
            word_end += 1;
        }
    }
}
