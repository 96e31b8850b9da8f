//! Header-aware Markdown parser.
//!
//! Splits on `#`/`##`/`###` headers into parent sections; oversize sections
//! are further windowed. A document with no headers (or an unreadable file
//! body) degrades to the flat chunker with synthetic parent ids.

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use siliqa_common::chunk::{Chunk, ChunkMeta, SourceRole};
use siliqa_common::{Result, SiliqaError};
use tracing::{info, warn};

use crate::pdf::flat_chunk;
use crate::splitter::RecursiveSplitter;
use crate::ParsedDocument;

struct Section {
    /// Live titles for levels 1..=3; `None` below the deepest seen header.
    titles: [Option<String>; 3],
    body: String,
}

impl Section {
    fn breadcrumb(&self) -> String {
        self.titles
            .iter()
            .flatten()
            .cloned()
            .collect::<Vec<_>>()
            .join(" > ")
    }

    fn leaf_title(&self) -> String {
        self.titles
            .iter()
            .flatten()
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

/// Parse a Markdown file from disk.
pub fn parse(
    path: &Path,
    filename: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<ParsedDocument> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SiliqaError::Parse(format!("unreadable markdown {filename}: {e}")))?;
    Ok(parse_text(&text, filename, chunk_size, chunk_overlap))
}

/// Split markdown text into parent sections and child chunks.
pub fn parse_text(
    text: &str,
    filename: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> ParsedDocument {
    let sections = split_by_headers(text);
    if sections.is_empty() || sections.iter().all(|s| s.breadcrumb().is_empty()) {
        warn!(file = filename, "no markdown headers found, using flat fallback");
        return flat_chunk(filename, text, chunk_size, chunk_overlap);
    }

    let splitter = RecursiveSplitter::for_prose(chunk_size, chunk_overlap);
    let mut chunks = Vec::new();
    let mut parents: HashMap<String, String> = HashMap::new();
    let mut seen_paths: HashMap<String, usize> = HashMap::new();

    for section in &sections {
        let body = section.body.trim();
        if body.is_empty() {
            continue;
        }

        let breadcrumb = {
            let base = section.breadcrumb();
            if base.is_empty() { "preamble".to_string() } else { base }
        };
        // Repeated header paths get a disambiguating suffix so chunk ids stay
        // unique across the corpus.
        let occurrence = seen_paths.entry(breadcrumb.clone()).or_insert(0);
        let parent_id = if *occurrence == 0 {
            format!("{filename}::{breadcrumb}")
        } else {
            format!("{filename}::{breadcrumb}~{occurrence}")
        };
        *occurrence += 1;

        parents.insert(parent_id.clone(), body.to_string());

        let mut context = format!("[Source: {filename}]");
        for title in section.titles.iter().flatten() {
            context.push_str(" > ");
            context.push_str(title);
        }

        let pieces: Vec<String> = if body.chars().count() > chunk_size {
            splitter.split(body)
        } else {
            vec![body.to_string()]
        };

        for (child_index, piece) in pieces.into_iter().enumerate() {
            chunks.push(Chunk {
                content: format!("{context}\n\n{piece}"),
                meta: ChunkMeta {
                    source: filename.to_string(),
                    parent_id: parent_id.clone(),
                    section: section.leaf_title(),
                    context: context.clone(),
                    chunk_id: format!("{parent_id}_{child_index}"),
                    child_index,
                    source_role: SourceRole::Primary,
                },
            });
        }
    }

    info!(
        file = filename,
        sections = parents.len(),
        chunks = chunks.len(),
        "markdown parsing complete"
    );
    ParsedDocument { chunks, parents }
}

fn split_by_headers(text: &str) -> Vec<Section> {
    let header = Regex::new(r"^(#{1,3})\s+(.+?)\s*$").expect("header regex");

    let mut sections: Vec<Section> = Vec::new();
    let mut titles: [Option<String>; 3] = [None, None, None];
    let mut body = String::new();
    let mut saw_header = false;

    for line in text.lines() {
        if let Some(caps) = header.captures(line) {
            if !body.trim().is_empty() {
                sections.push(Section { titles: titles.clone(), body: std::mem::take(&mut body) });
            } else {
                body.clear();
            }
            let level = caps[1].len();
            titles[level - 1] = Some(caps[2].to_string());
            for deeper in titles.iter_mut().skip(level) {
                *deeper = None;
            }
            saw_header = true;
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }
    if !body.trim().is_empty() {
        sections.push(Section { titles, body });
    }

    if !saw_header {
        return Vec::new();
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Placement

Placement overview text.

## Congestion

Congestion is a major issue in physical design.

## Timing

Timing closure notes.

# Routing

Routing body.
";

    #[test]
    fn sections_follow_header_hierarchy() {
        let parsed = parse_text(SAMPLE, "guide.md", 500, 100);

        assert!(parsed.parents.contains_key("guide.md::Placement"));
        assert!(parsed.parents.contains_key("guide.md::Placement > Congestion"));
        assert!(parsed.parents.contains_key("guide.md::Placement > Timing"));
        assert!(parsed.parents.contains_key("guide.md::Routing"));

        let congestion = parsed
            .chunks
            .iter()
            .find(|c| c.meta.parent_id == "guide.md::Placement > Congestion")
            .unwrap();
        assert_eq!(congestion.meta.section, "Congestion");
        assert_eq!(congestion.meta.context, "[Source: guide.md] > Placement > Congestion");
        assert!(congestion.content.contains("major issue"));
    }

    #[test]
    fn every_child_parent_resolves_and_indices_count_up() {
        let long_body = format!("# Only\n\n{}", "sentence here. ".repeat(200));
        let parsed = parse_text(&long_body, "big.md", 500, 100);

        let children: Vec<_> = parsed.chunks.iter().collect();
        assert!(children.len() > 1, "3000-char section must split");
        for (i, child) in children.iter().enumerate() {
            assert_eq!(child.meta.child_index, i);
            assert!(parsed.parents.contains_key(&child.meta.parent_id));
        }
    }

    #[test]
    fn small_section_stays_whole() {
        let parsed = parse_text("# T\n\nshort body", "s.md", 500, 100);
        assert_eq!(parsed.chunks.len(), 1);
        assert_eq!(parsed.chunks[0].meta.chunk_id, "s.md::T_0");
    }

    #[test]
    fn headerless_document_uses_flat_fallback() {
        let text = "plain text without any headers ".repeat(40);
        let parsed = parse_text(&text, "flat.md", 500, 100);
        assert!(!parsed.chunks.is_empty());
        for chunk in &parsed.chunks {
            assert!(chunk.meta.parent_id.starts_with("flat.md_flat_"));
            assert!(parsed.parents.contains_key(&chunk.meta.parent_id));
        }
    }

    #[test]
    fn duplicate_header_paths_get_unique_parent_ids() {
        let text = "# A\n\nfirst body\n\n# A\n\nsecond body\n";
        let parsed = parse_text(text, "dup.md", 500, 100);
        assert_eq!(parsed.parents.len(), 2);
        assert!(parsed.parents.contains_key("dup.md::A"));
        assert!(parsed.parents.contains_key("dup.md::A~1"));
    }

    #[test]
    fn preamble_before_first_header_is_kept() {
        let text = "intro before headers\n\n# First\n\nbody\n";
        let parsed = parse_text(text, "p.md", 500, 100);
        assert!(parsed.parents.contains_key("p.md::preamble"));
    }
}
