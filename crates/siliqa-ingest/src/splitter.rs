//! Recursive character splitter.
//!
//! Splits on the coarsest separator present (paragraph → line → sentence →
//! space → character), recursing into oversize fragments, then merges
//! adjacent fragments into windows of at most `chunk_size` characters with
//! `chunk_overlap` characters carried between consecutive windows. All
//! lengths are measured in characters so CJK text splits on real boundaries.

#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<&'static str>,
}

impl RecursiveSplitter {
    /// Separator ladder used for PDF section text.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size, chunk_overlap, separators: vec!["\n\n", "\n", " ", ""] }
    }

    /// Ladder including CJK sentence punctuation, used for Markdown and flat
    /// fallback chunking.
    pub fn for_prose(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separators: vec!["\n\n", "\n", "。", "！", "？", "；", ",", " ", ""],
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split `text` into windows; trimmed, empties dropped.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_level(text, &self.separators)
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn split_level(&self, text: &str, separators: &[&'static str]) -> Vec<String> {
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }

        let (sep_idx, sep) = pick_separator(text, separators);
        if sep.is_empty() {
            return self.char_windows(text);
        }
        let remaining = &separators[sep_idx + 1..];
        let sep_len = char_len(sep);

        let mut chunks: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0usize;

        for fragment in text.split(sep) {
            let fragment_len = char_len(fragment);

            // Oversize fragment: flush what we have, recurse one level down.
            if fragment_len > self.chunk_size {
                if !current.is_empty() {
                    chunks.push(current.join(sep));
                    current.clear();
                    current_len = 0;
                }
                chunks.extend(self.split_level(fragment, remaining));
                continue;
            }

            let joined_len = current_len + fragment_len + if current.is_empty() { 0 } else { sep_len };
            if joined_len > self.chunk_size && !current.is_empty() {
                chunks.push(current.join(sep));
                let (kept, kept_len) = self.overlap_tail(&current, sep_len);
                current = kept;
                current_len = kept_len;
            }

            current_len += fragment_len + if current.is_empty() { 0 } else { sep_len };
            current.push(fragment.to_string());
        }

        if !current.is_empty() {
            chunks.push(current.join(sep));
        }
        chunks
    }

    /// Trailing fragments of the emitted window that fit in the overlap
    /// budget; they seed the next window.
    fn overlap_tail(&self, pieces: &[String], sep_len: usize) -> (Vec<String>, usize) {
        let mut kept: Vec<String> = Vec::new();
        let mut kept_len = 0usize;
        for piece in pieces.iter().rev() {
            let piece_len = char_len(piece) + if kept.is_empty() { 0 } else { sep_len };
            if kept_len + piece_len > self.chunk_overlap {
                break;
            }
            kept_len += piece_len;
            kept.push(piece.clone());
        }
        kept.reverse();
        (kept, kept_len)
    }

    /// Last resort: fixed character windows with overlap.
    fn char_windows(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = self.chunk_size.saturating_sub(self.chunk_overlap).max(1);
        let mut out = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            out.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        out
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn pick_separator<'a>(text: &str, separators: &[&'a str]) -> (usize, &'a str) {
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() || text.contains(sep) {
            return (i, sep);
        }
    }
    (separators.len().saturating_sub(1), "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let splitter = RecursiveSplitter::new(1000, 100);
        let chunks = splitter.split("a short paragraph");
        assert_eq!(chunks, vec!["a short paragraph".to_string()]);
    }

    #[test]
    fn windows_respect_chunk_size() {
        let splitter = RecursiveSplitter::new(100, 20);
        let text = "word ".repeat(200);
        let chunks = splitter.split(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn long_section_chunk_count_is_roughly_size_over_step() {
        // 1000/100 split of an n-char text advances ~900 chars per window.
        let splitter = RecursiveSplitter::new(1000, 100);
        let text = "word ".repeat(1800); // 9000 chars
        let chunks = splitter.split(&text);
        let expected = 9000usize.div_ceil(900);
        assert!(
            (chunks.len() as i64 - expected as i64).abs() <= 2,
            "expected ~{expected} chunks, got {}",
            chunks.len()
        );
    }

    #[test]
    fn consecutive_windows_overlap() {
        let splitter = RecursiveSplitter::new(100, 30);
        let text = (0..60).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let chunks = splitter.split(&text);
        assert!(chunks.len() >= 2);
        // The tail of each window reappears at the head of the next.
        for pair in chunks.windows(2) {
            let tail_word = pair[0].split_whitespace().last().unwrap();
            assert!(
                pair[1].contains(tail_word),
                "no overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn paragraph_boundaries_are_preferred() {
        let splitter = RecursiveSplitter::new(40, 0);
        let text = "first paragraph here\n\nsecond paragraph here\n\nthird one";
        let chunks = splitter.split(text);
        assert!(chunks.iter().any(|c| c == "first paragraph here"));
    }

    #[test]
    fn cjk_text_splits_on_char_boundaries() {
        let splitter = RecursiveSplitter::for_prose(10, 2);
        let text = "布线拥塞是物理设计中的常见问题需要及时处理".repeat(3);
        let chunks = splitter.split(&text);
        assert!(!chunks.is_empty());
        for chunk in chunks {
            assert!(chunk.chars().count() <= 10);
        }
    }

    #[test]
    fn oversize_fragment_recurses_to_finer_separator() {
        let splitter = RecursiveSplitter::new(50, 10);
        // One paragraph far larger than chunk_size, words inside.
        let long_paragraph = "token ".repeat(40);
        let text = format!("short intro\n\n{long_paragraph}");
        let chunks = splitter.split(&text);
        assert!(chunks.len() > 2);
        for chunk in chunks {
            assert!(chunk.chars().count() <= 50);
        }
    }
}
