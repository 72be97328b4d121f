//! Line-boundary text chunker.
//!
//! Splits a file's content into pieces that fit a generation request's input
//! budget. Splitting happens on line breaks only, so a chunk never cuts a
//! line in half. A single line longer than the budget is kept whole as an
//! oversize chunk.
//!
//! Joining the chunks with `'\n'` reproduces the original content exactly.

use crate::error::{AnalysisError, Result};
use crate::models::Chunk;

/// Derive the per-chunk character budget from a model token budget.
///
/// `budget_fraction` leaves room in the request for the prompt scaffolding
/// and the model's reply. Never returns less than one character.
pub fn max_chunk_chars(max_tokens: usize, chars_per_token: usize, budget_fraction: f64) -> usize {
    let chars = (max_tokens as f64 * budget_fraction).floor() as usize * chars_per_token;
    chars.max(1)
}

/// Split text on line boundaries, keeping each chunk's total line length
/// (newlines excluded) within `max_chunk_size` where possible.
pub fn split_text(content: &str, max_chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_size = 0usize;

    for line in content.split('\n') {
        let line_len = line.chars().count();

        // Flush before this line would push a non-empty buffer over budget
        if current_size + line_len > max_chunk_size && !current.is_empty() {
            chunks.push(current.join("\n"));
            current.clear();
            current_size = 0;
        }

        current.push(line);
        current_size += line_len;
    }

    // `split` always yields at least one item, so this always flushes
    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }

    chunks
}

/// Split raw file content into [`Chunk`]s with contiguous indices from 0.
///
/// # Errors
///
/// Returns [`AnalysisError::InvalidInput`] when the content is not UTF-8
/// text.
pub fn split_content(content: &[u8], max_chunk_size: usize) -> Result<Vec<Chunk>> {
    let text = std::str::from_utf8(content).map_err(|e| {
        AnalysisError::InvalidInput(format!("content is not valid UTF-8 text: {}", e))
    })?;

    Ok(split_text(text, max_chunk_size)
        .into_iter()
        .enumerate()
        .map(|(sequence_index, text)| Chunk {
            sequence_index,
            text,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_text("Hello, world!", 1000);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_text() {
        let chunks = split_text("", 1000);
        assert_eq!(chunks, vec![String::new()]);
    }

    #[test]
    fn test_lines_grouped_until_budget() {
        // 5 + 5 fits in 10, the third line does not
        let chunks = split_text("aaaaa\nbbbbb\nccccc", 10);
        assert_eq!(chunks, vec!["aaaaa\nbbbbb".to_string(), "ccccc".to_string()]);
    }

    #[test]
    fn test_oversize_line_kept_whole() {
        let long = "x".repeat(50);
        let text = format!("short\n{}\nafter", long);
        let chunks = split_text(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1], long);
    }

    #[test]
    fn test_round_trip_reproduces_content() {
        let samples = [
            "",
            "\n",
            "\n\n\n",
            "single line",
            "trailing newline\n",
            "public class A {\n  void run() {}\n}\n\n// end",
            "ünïcödé línes\nçhars counted, not bytes\n",
        ];
        for sample in samples {
            for max in [1usize, 3, 8, 64, 10_000] {
                let chunks = split_text(sample, max);
                assert_eq!(
                    chunks.join("\n"),
                    sample,
                    "round trip failed for {:?} at max {}",
                    sample,
                    max
                );
            }
        }
    }

    #[test]
    fn test_no_chunk_splits_a_line() {
        let text = (0..40)
            .map(|i| format!("line number {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let original: Vec<&str> = text.split('\n').collect();
        for chunk in split_text(&text, 30) {
            for line in chunk.split('\n') {
                assert!(original.contains(&line), "line was cut: {:?}", line);
            }
        }
    }

    #[test]
    fn test_chars_not_bytes() {
        // four 2-byte chars per line: 8 chars fit in a budget of 8
        let chunks = split_text("éééé\néééé", 8);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\nBeta\nGamma\nDelta\nEpsilon";
        assert_eq!(split_text(text, 7), split_text(text, 7));
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("statement {};", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = split_content(text.as_bytes(), 25).unwrap();
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.sequence_index, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_non_utf8_is_invalid_input() {
        let err = split_content(&[0xff, 0xfe, 0x00], 100).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(_)));
    }

    #[test]
    fn test_budget_derivation() {
        assert_eq!(max_chunk_chars(2000, 1, 0.5), 1000);
        assert_eq!(max_chunk_chars(2000, 4, 0.5), 4000);
        assert_eq!(max_chunk_chars(1, 1, 0.5), 1);
    }
}
