//! Fixed-size overlapping text chunker.
//!
//! Splits normalized document text into windows of `size` characters that
//! advance by `size - overlap` characters, so consecutive chunks share
//! `overlap` characters. Boundaries do not respect words or paragraphs.
//!
//! Chunks headed for the content store are additionally capped by
//! [`truncate_chunk`]: anything longer than the cap keeps exactly `cap`
//! characters and gets [`TRUNCATION_MARKER`] appended. The cut-off tail is
//! dropped, never re-chunked (embedding models have a hard context limit).
//!
//! # Algorithm
//!
//! 1. Normalize line endings (`\r\n` and `\r` become `\n`).
//! 2. Start a window at character 0.
//! 3. Emit `text[start..start + size]` (clipped to the end of the text).
//! 4. Stop if that window reached the end, otherwise advance `start` by
//!    `size - overlap` and repeat.
//!
//! # Example
//!
//! ```rust
//! use docsync::chunk::split_text;
//!
//! let text = "a".repeat(3400);
//! let chunks = split_text(&text, 500, 100);
//! assert_eq!(chunks.len(), 9);
//! assert_eq!(chunks[8].chars().count(), 200);
//! ```

use std::borrow::Cow;

/// Appended to every chunk that was cut at the character cap.
pub const TRUNCATION_MARKER: &str = "...";

/// Normalize line endings so chunk boundaries do not depend on the
/// platform the document was written on.
pub fn normalize_text(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

/// Split `text` into overlapping windows of `size` characters.
///
/// Sizes are counted in characters, not bytes, so multibyte text never
/// splits inside a code point. A `size` of 0 is treated as 1 and an
/// `overlap >= size` degrades to a step of one character; configuration
/// validation rejects both before they reach here.
///
/// # Guarantees
///
/// - Empty text yields no chunks.
/// - Every character of the input appears in at least one chunk.
/// - The result is a pure function of `(text, size, overlap)`.
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let text = normalize_text(text);
    let size = size.max(1);
    let step = size.saturating_sub(overlap).max(1);

    // Byte offset of every char boundary, plus the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = bounds.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < total_chars {
        let end = (start + size).min(total_chars);
        chunks.push(text[bounds[start]..bounds[end]].to_string());
        if end == total_chars {
            break;
        }
        start += step;
    }
    chunks
}

/// Cap `text` at `cap` characters.
///
/// Returns the (possibly shortened) text and whether it was truncated.
/// A truncated chunk is exactly `cap` characters of the original followed
/// by [`TRUNCATION_MARKER`].
pub fn truncate_chunk(text: &str, cap: usize) -> (String, bool) {
    match text.char_indices().nth(cap) {
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + TRUNCATION_MARKER.len());
            out.push_str(&text[..byte_idx]);
            out.push_str(TRUNCATION_MARKER);
            (out, true)
        }
        None => (text.to_string(), false),
    }
}
