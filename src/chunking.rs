//! Overlapping passage chunker
//!
//! Splits rendered session text into overlapping passages at natural
//! boundaries. Preference order for the break point within a window:
//! sentence end (`". "`), newline, space, hard cut. A break point is only
//! accepted in the back half of the window so chunks never collapse below
//! half the target size.

/// Find the nearest valid char boundary at or before the given byte index
#[inline]
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Find the nearest valid char boundary at or after the given byte index
#[inline]
fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Split `text` into trimmed, non-empty passages of roughly `chunk_size`
/// characters with roughly `overlap` characters shared between neighbors.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if text.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let overlap = overlap.min(chunk_size.saturating_sub(1));
    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let hard_end = floor_char_boundary(text, (start + chunk_size).min(text.len()));
        let mut end = hard_end;

        if hard_end < text.len() {
            let min_break = start + chunk_size / 2;
            let window = &text[start..hard_end];

            if let Some(pos) = window.rfind(". ").map(|p| start + p) {
                if pos >= min_break {
                    // Keep the period with the chunk
                    end = pos + 1;
                }
            }
            if end == hard_end {
                if let Some(pos) = window.rfind('\n').map(|p| start + p) {
                    if pos >= min_break {
                        end = pos;
                    }
                }
            }
            if end == hard_end {
                if let Some(pos) = window.rfind(' ').map(|p| start + p) {
                    if pos >= min_break {
                        end = pos;
                    }
                }
            }
        }

        let slice = text[start..end].trim();
        if !slice.is_empty() {
            chunks.push(slice.to_string());
        }

        if end >= text.len() {
            break;
        }

        // Step past the break character, then back off by the overlap;
        // the ceil keeps forward progress on multibyte text
        let next = (end + 1).saturating_sub(overlap);
        start = ceil_char_boundary(text, next.max(start + 1));
        if start >= text.len() {
            break;
        }
    }

    chunks
}
