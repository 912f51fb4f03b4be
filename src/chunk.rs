//! Bounded-size passage splitter with overlap.
//!
//! Splits extracted page text into [`Passage`]s no larger than
//! `max_chars`, with `overlap_chars` of trailing context repeated at the
//! start of the next passage so that nothing is lost at a cut. Cuts
//! prefer paragraph boundaries (`\n\n`), then line boundaries, then
//! whitespace, then an arbitrary position, in that order, so most
//! passages stay coherent natural-language units.
//!
//! Pages are split independently; passage indices are contiguous across
//! the whole document.

use crate::extract::PageText;
use crate::models::Passage;

/// Split a document's extracted pages into indexed passages.
pub fn split_passages(
    doc_id: &str,
    pages: &[PageText],
    max_chars: usize,
    overlap_chars: usize,
) -> Vec<Passage> {
    let mut passages = Vec::new();
    let mut chunk_index: i64 = 0;

    for page in pages {
        for piece in split_text(&page.text, max_chars, overlap_chars) {
            passages.push(Passage {
                doc_id: doc_id.to_string(),
                chunk_index,
                page: page.page,
                text: piece,
            });
            chunk_index += 1;
        }
    }

    passages
}

/// Split one text unit into overlapping pieces of at most `max_chars`
/// bytes. Pieces are trimmed; all-whitespace pieces are dropped.
fn split_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0usize;

    while start < text.len() {
        let remaining = &text[start..];
        if remaining.len() <= max_chars {
            let piece = remaining.trim();
            if !piece.is_empty() {
                out.push(piece.to_string());
            }
            break;
        }

        let mut window_end = floor_char_boundary(remaining, max_chars);
        if window_end == 0 {
            // max_chars smaller than the first character; take it whole
            window_end = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }
        let window = &remaining[..window_end];

        let cut = window
            .rfind("\n\n")
            .map(|p| p + 2)
            .or_else(|| window.rfind('\n').map(|p| p + 1))
            .or_else(|| window.rfind(' ').map(|p| p + 1))
            .unwrap_or(window_end);

        let piece = window[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }

        let mut advance = cut.saturating_sub(overlap_chars);
        if advance == 0 {
            advance = cut;
        }
        let mut next = start + advance;
        while next < text.len() && !text.is_char_boundary(next) {
            next += 1;
        }
        start = next.max(start + 1);
    }

    out
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
