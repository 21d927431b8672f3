//! Text chunking with page tracking. The core splitting algorithm (snap to
//! char boundary, prefer paragraph/sentence/word breaks) is grounded on the
//! teacher's `processing/chunker.rs`; page-majority tracking is new,
//! required by spec.md §3/§4.5 ("the page that contributed the majority of
//! its characters becomes the chunk's page attribute").

use crate::types::PageText;

#[derive(Debug, Clone)]
pub struct ChunkSpan {
    pub text: String,
    pub index: usize,
    pub page: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    min_chunk_size: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize, min_chunk_size: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            min_chunk_size,
        }
    }

    /// Chunk a sequence of pages, tracking which page contributed the
    /// majority of characters to each chunk. Empty pages are tolerated
    /// (they just don't contribute to the concatenation).
    pub fn chunk_pages(&self, pages: &[PageText]) -> Vec<ChunkSpan> {
        let mut concat = String::new();
        // (start_offset, end_offset, page_number) in the concatenated text
        let mut page_ranges: Vec<(usize, usize, usize)> = Vec::with_capacity(pages.len());

        for page in pages {
            if page.text.is_empty() {
                continue;
            }
            let start = concat.len();
            concat.push_str(&page.text);
            concat.push('\n');
            let end = concat.len();
            page_ranges.push((start, end, page.page_number));
        }

        if concat.trim().is_empty() {
            return Vec::new();
        }

        let raw_chunks = self.chunk_text(&concat);
        raw_chunks
            .into_iter()
            .map(|(text, index, start_offset, end_offset)| {
                let page = majority_page(&page_ranges, start_offset, end_offset)
                    .unwrap_or_else(|| pages.first().map(|p| p.page_number).unwrap_or(1));
                ChunkSpan {
                    text,
                    index,
                    page,
                    start_offset,
                    end_offset,
                }
            })
            .collect()
    }

    /// Split raw text into (text, index, start_offset, end_offset) tuples.
    fn chunk_text(&self, text: &str) -> Vec<(String, usize, usize, usize)> {
        if text.len() <= self.chunk_size {
            if text.len() < self.min_chunk_size {
                return Vec::new();
            }
            return vec![(text.to_string(), 0, 0, text.len())];
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        let mut index = 0;

        while start < text.len() {
            let raw_end = (start + self.chunk_size).min(text.len());
            let end = snap_to_char_boundary(text, raw_end);

            let actual_end = if end < text.len() {
                self.find_break_point(text, start, end)
            } else {
                end
            };

            let chunk_text = &text[start..actual_end];

            if chunk_text.len() >= self.min_chunk_size {
                chunks.push((chunk_text.to_string(), index, start, actual_end));
                index += 1;
            }

            let step = if actual_end - start > self.chunk_overlap {
                actual_end - start - self.chunk_overlap
            } else {
                actual_end - start
            };

            let raw_next = start + step;
            start = snap_to_char_boundary(text, raw_next);
            if start >= text.len() {
                break;
            }
        }

        chunks
    }

    fn find_break_point(&self, text: &str, start: usize, preferred_end: usize) -> usize {
        let raw_search_start = if preferred_end > 200 {
            preferred_end - 200
        } else {
            start
        };
        let search_start = snap_to_char_boundary(text, raw_search_start);
        let safe_end = snap_to_char_boundary(text, preferred_end);

        if search_start >= safe_end {
            return safe_end;
        }

        let search_region = &text[search_start..safe_end];

        if let Some(pos) = search_region.rfind("\n\n") {
            return search_start + pos + 2;
        }
        if let Some(pos) = search_region.rfind(". ") {
            return search_start + pos + 2;
        }
        if let Some(pos) = search_region.rfind(".\n") {
            return search_start + pos + 2;
        }
        if let Some(pos) = search_region.rfind('\n') {
            return search_start + pos + 1;
        }
        if let Some(pos) = search_region.rfind(' ') {
            return search_start + pos + 1;
        }

        safe_end
    }
}

/// Find the page whose range overlaps [start, end) by the most characters.
fn majority_page(page_ranges: &[(usize, usize, usize)], start: usize, end: usize) -> Option<usize> {
    let mut best_page = None;
    let mut best_overlap = 0usize;
    for &(p_start, p_end, page) in page_ranges {
        let overlap_start = start.max(p_start);
        let overlap_end = end.min(p_end);
        if overlap_end > overlap_start {
            let overlap = overlap_end - overlap_start;
            if overlap > best_overlap {
                best_overlap = overlap;
                best_page = Some(page);
            }
        }
    }
    best_page
}

/// Snap a byte offset to the nearest valid UTF-8 char boundary (rounding down).
fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: usize, text: &str) -> PageText {
        PageText {
            page_number: n,
            text: text.to_string(),
        }
    }

    #[test]
    fn single_small_page_becomes_one_chunk() {
        let chunker = TextChunker::new(800, 200, 10);
        let chunks = chunker.chunk_pages(&[page(1, "Hello world, this is page one.")]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page, 1);
    }

    #[test]
    fn empty_pages_are_tolerated() {
        let chunker = TextChunker::new(800, 200, 10);
        let chunks = chunker.chunk_pages(&[page(1, ""), page(2, "Some real content here for testing.")]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page, 2);
    }

    #[test]
    fn all_empty_pages_yield_no_chunks() {
        let chunker = TextChunker::new(800, 200, 10);
        let chunks = chunker.chunk_pages(&[page(1, ""), page(2, "")]);
        assert!(chunks.is_empty());
    }

    #[test]
    fn long_text_splits_into_overlapping_chunks_with_page_tracking() {
        let chunker = TextChunker::new(100, 20, 10);
        let page1_text = "a".repeat(90);
        let page2_text = "b".repeat(90);
        let chunks = chunker.chunk_pages(&[page(1, &page1_text), page(2, &page2_text)]);
        assert!(chunks.len() > 1);
        // First chunk should be majority page 1, later chunks majority page 2.
        assert_eq!(chunks[0].page, 1);
        assert_eq!(chunks.last().unwrap().page, 2);
    }

    #[test]
    fn chunks_never_split_mid_word_when_space_available() {
        let chunker = TextChunker::new(50, 10, 5);
        let text = "word ".repeat(40);
        let chunks = chunker.chunk_pages(&[page(1, &text)]);
        for c in &chunks {
            assert!(!c.text.ends_with(|ch: char| ch.is_alphanumeric()) || c.text.trim_end().ends_with("word"));
        }
    }
}
