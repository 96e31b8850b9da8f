//! Outline-driven PDF parser.
//!
//! Pipeline for one document:
//!   1. quality pre-scan (garbled / scanned detection on sampled pages)
//!   2. header/footer noise detection on the first and last three pages
//!   3. page-to-markdown conversion in fixed page batches
//!   4. outline-driven slicing with strict boundary truncation
//!   5. noise cleaning
//!   6. hierarchy injection (context path per section)
//!   7. parent + child emission
//!
//! A PDF without an extractable outline yields an empty result; the caller
//! falls back to [`parse_flat`]. Slicing operates on plain data
//! (outline entries + page markdown) so the boundary logic is testable
//! without fixture PDFs.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

use lopdf::{Dictionary, Document, Object, ObjectId};
use percent_encoding::percent_decode_str;
use regex::Regex;
use siliqa_common::chunk::{Chunk, ChunkMeta, SourceRole};
use siliqa_common::{Result, SiliqaError};
use tracing::{debug, info, warn};

use crate::splitter::RecursiveSplitter;
use crate::ParsedDocument;

/// Children at most this long stay whole; larger sections are split.
const MAX_CHUNK_SIZE: usize = 1000;
const CHUNK_OVERLAP: usize = 100;
/// Sections up to 1.5 × MAX_CHUNK_SIZE are emitted as a single child.
const SINGLE_CHUNK_FACTOR: f64 = 1.5;
/// Pages converted per batch during markdown conversion.
const CONVERT_BATCH: usize = 200;
/// Noise detection samples this many pages from each end of the document.
const NOISE_SAMPLE_PAGES: usize = 3;
/// A line is noise when it appears on more than half of the sampled pages.
const NOISE_THRESHOLD: f64 = 0.5;
/// Minimum printable-character ratio before a document counts as garbled.
const MIN_PRINTABLE_RATIO: f64 = 0.70;

/// Glyph-corruption residue left by broken font CMaps; any hit marks the
/// document garbled.
const CORRUPTION_MARKERS: [&str; 7] =
    ["Chu<", "<untdilbtm", "u<<", "<uti", "ut<<", "utu ", "tu eim<"];

/// One table-of-contents entry: nesting level (1-based), title, and the
/// 1-based page the section starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlineEntry {
    pub level: usize,
    pub title: String,
    pub page: usize,
}

/// Verdict of the quality pre-scan.
#[derive(Debug, Clone, PartialEq)]
pub enum PdfQuality {
    Clean,
    /// Text extraction produced corrupted glyphs; reason attached.
    Garbled(String),
    /// No extractable text in the sampled pages (scanned / image-only).
    Scanned,
}

// ── Quality pre-scan ──────────────────────────────────────────────────────────

/// Sample pages {0, 50, 102} (bounded by length) and judge extractability.
pub fn scan_quality(path: &Path) -> Result<PdfQuality> {
    let doc = Document::load(path).map_err(|e| SiliqaError::Parse(e.to_string()))?;
    let page_count = doc.get_pages().len();

    let mut sample_pages: Vec<u32> = vec![1];
    if page_count > 50 {
        sample_pages.push(51);
    }
    if page_count > 102 {
        sample_pages.push(103);
    }

    let mut sample_text = String::new();
    for page in sample_pages {
        if let Ok(text) = doc.extract_text(&[page]) {
            sample_text.push_str(&text);
        }
    }

    if sample_text.trim().is_empty() {
        return Ok(PdfQuality::Scanned);
    }

    for marker in CORRUPTION_MARKERS {
        if sample_text.contains(marker) {
            return Ok(PdfQuality::Garbled(format!(
                "font mapping failure (marker {marker:?})"
            )));
        }
    }

    let ratio = printable_ratio(&sample_text);
    if ratio < MIN_PRINTABLE_RATIO {
        return Ok(PdfQuality::Garbled(format!("low text density ({ratio:.2})")));
    }

    Ok(PdfQuality::Clean)
}

/// Share of common printable characters in `text`.
pub(crate) fn printable_ratio(text: &str) -> f64 {
    if text.is_empty() {
        return 1.0;
    }
    let clean = text
        .chars()
        .filter(|c| {
            c.is_ascii_alphanumeric()
                || c.is_whitespace()
                || ".,;:!?()-*/%#_[]{}".contains(*c)
        })
        .count();
    clean as f64 / text.chars().count() as f64
}

// ── Noise detection ───────────────────────────────────────────────────────────

/// Lines recurring across the sampled first/last pages are headers/footers.
/// Each page contributes its unique trimmed lines once; lines shorter than 4
/// or longer than 100 characters are ignored.
pub(crate) fn detect_noise(sampled_pages: &[String]) -> Vec<String> {
    if sampled_pages.is_empty() {
        return Vec::new();
    }

    let mut line_counts: HashMap<&str, usize> = HashMap::new();
    for page in sampled_pages {
        let unique: HashSet<&str> = page
            .lines()
            .map(str::trim)
            .filter(|l| {
                let n = l.chars().count();
                n >= 4 && n <= 100
            })
            .collect();
        for line in unique {
            *line_counts.entry(line).or_insert(0) += 1;
        }
    }

    let threshold = sampled_pages.len() as f64 * NOISE_THRESHOLD;
    let mut noise: Vec<String> = line_counts
        .into_iter()
        .filter(|(_, count)| *count as f64 > threshold)
        .map(|(line, _)| line.to_string())
        .collect();
    noise.sort();
    noise
}

fn sample_noise_pages(pages_md: &[String]) -> Vec<String> {
    let n = pages_md.len();
    let mut indices: Vec<usize> = (0..NOISE_SAMPLE_PAGES.min(n)).collect();
    if n > NOISE_SAMPLE_PAGES {
        indices.extend(n.saturating_sub(NOISE_SAMPLE_PAGES).max(NOISE_SAMPLE_PAGES)..n);
    }
    indices.sort_unstable();
    indices.dedup();
    indices.into_iter().map(|i| pages_md[i].clone()).collect()
}

// ── Cleaning ──────────────────────────────────────────────────────────────────

fn builtin_cleaning_rules() -> &'static [Regex] {
    static RULES: OnceLock<Vec<Regex>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![Regex::new(r"\[Feedback\]\(mailto:[^)]+\)").expect("builtin cleaning rule")]
    })
}

/// Strip detected noise lines and built-in rule matches.
pub(crate) fn clean_text(text: &str, noise_patterns: &[String]) -> String {
    let mut cleaned = text.to_string();
    for rule in builtin_cleaning_rules() {
        cleaned = rule.replace_all(&cleaned, "").into_owned();
    }
    for pattern in noise_patterns {
        if let Ok(re) = Regex::new(&regex::escape(pattern)) {
            cleaned = re.replace_all(&cleaned, "").into_owned();
        }
    }
    cleaned
}

// ── Page markdown conversion ──────────────────────────────────────────────────

/// Convert pages to markdown-ish text in [`CONVERT_BATCH`]-page batches.
///
/// Text extraction is percent-decoded and lines matching outline titles are
/// promoted to `#`-headers, which is what the strict-truncation regex keys
/// on. A failing batch degrades to per-page conversion; a failing page
/// contributes an empty string.
fn convert_pages_markdown(doc: &Document, outline: &[OutlineEntry]) -> Vec<String> {
    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    let mut pages_md = Vec::with_capacity(page_numbers.len());

    for batch in page_numbers.chunks(CONVERT_BATCH) {
        for &page in batch {
            let text = doc.extract_text(&[page]).unwrap_or_else(|e| {
                warn!(page, error = %e, "page text extraction failed");
                String::new()
            });
            pages_md.push(promote_headers(&percent_unquote(&text), outline));
        }
        debug!(converted = pages_md.len(), total = page_numbers.len(), "markdown batch done");
    }
    pages_md
}

/// Decode URL-encoded sequences the converter leaves in the text.
pub(crate) fn percent_unquote(text: &str) -> String {
    percent_decode_str(text)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| text.to_string())
}

/// Rewrite lines that exactly match an outline title into markdown headers of
/// the entry's level.
pub(crate) fn promote_headers(page_text: &str, outline: &[OutlineEntry]) -> String {
    let mut out = String::with_capacity(page_text.len());
    for line in page_text.lines() {
        let trimmed = line.trim();
        let promoted = outline
            .iter()
            .find(|entry| entry.title.eq_ignore_ascii_case(trimmed) && !trimmed.is_empty());
        match promoted {
            Some(entry) => {
                out.push_str(&"#".repeat(entry.level.clamp(1, 6)));
                out.push(' ');
                out.push_str(&entry.title);
            }
            None => out.push_str(line),
        }
        out.push('\n');
    }
    out
}

// ── Outline extraction ────────────────────────────────────────────────────────

fn decode_pdf_string(object: &Object) -> Option<String> {
    let Object::String(bytes, _) = object else {
        return None;
    };
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        // UTF-16BE with BOM.
        let utf16: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        Some(String::from_utf16_lossy(&utf16))
    } else {
        Some(String::from_utf8_lossy(bytes).into_owned())
    }
}

fn resolve_dest_page(
    doc: &Document,
    item: &Dictionary,
    page_numbers: &HashMap<ObjectId, usize>,
) -> Option<usize> {
    // Direct /Dest, or /A GoTo action with /D.
    let dest = item
        .get(b"Dest")
        .ok()
        .cloned()
        .or_else(|| match item.get(b"A").ok()? {
            Object::Dictionary(action) => action.get(b"D").ok().cloned(),
            Object::Reference(id) => doc
                .get_dictionary(*id)
                .ok()
                .and_then(|action| action.get(b"D").ok().cloned()),
            _ => None,
        })?;

    let dest = match dest {
        Object::Reference(id) => doc.get_object(id).ok()?.clone(),
        other => other,
    };

    match dest {
        Object::Array(items) => items
            .first()
            .and_then(|o| o.as_reference().ok())
            .and_then(|id| page_numbers.get(&id).copied()),
        // Named destinations are not resolved; the section is unmappable.
        _ => None,
    }
}

/// Flatten the outline tree into `(level, title, page)` entries in document
/// order. Unmappable entries are skipped with a warning.
pub fn extract_outline(doc: &Document) -> Vec<OutlineEntry> {
    let mut entries = Vec::new();

    let Ok(catalog) = doc.catalog() else {
        return entries;
    };
    let Some(outlines) = catalog
        .get(b"Outlines")
        .ok()
        .and_then(|o| o.as_reference().ok())
        .and_then(|id| doc.get_dictionary(id).ok())
    else {
        return entries;
    };

    let page_numbers: HashMap<ObjectId, usize> = doc
        .get_pages()
        .iter()
        .map(|(num, id)| (*id, *num as usize))
        .collect();

    let mut visited = HashSet::new();
    if let Some(first) = outlines.get(b"First").ok().and_then(|o| o.as_reference().ok()) {
        walk_outline(doc, first, 1, &page_numbers, &mut entries, &mut visited);
    }
    entries
}

fn walk_outline(
    doc: &Document,
    start: ObjectId,
    level: usize,
    page_numbers: &HashMap<ObjectId, usize>,
    entries: &mut Vec<OutlineEntry>,
    visited: &mut HashSet<ObjectId>,
) {
    let mut node = start;
    loop {
        if !visited.insert(node) {
            warn!("outline cycle detected, stopping traversal");
            return;
        }
        let Ok(item) = doc.get_dictionary(node) else {
            return;
        };

        if let Some(title) = item.get(b"Title").ok().and_then(decode_pdf_string) {
            match resolve_dest_page(doc, item, page_numbers) {
                Some(page) => entries.push(OutlineEntry { level, title, page }),
                None => warn!(title = %title, "outline entry has no mappable page, skipping"),
            }
        }

        if let Some(first) = item.get(b"First").ok().and_then(|o| o.as_reference().ok()) {
            walk_outline(doc, first, level + 1, page_numbers, entries, visited);
        }

        match item.get(b"Next").ok().and_then(|o| o.as_reference().ok()) {
            Some(next) => node = next,
            None => return,
        }
    }
}

// ── Slicing ───────────────────────────────────────────────────────────────────

/// Cut the candidate slice at the first markdown header carrying the next
/// section's title. This is the boundary-enforcement step that keeps a
/// section from absorbing the start of the next one.
pub(crate) fn strict_truncate(raw_md: &str, next_title: &str) -> String {
    let escaped = regex::escape(next_title).replace(' ', r"\s+");
    let pattern = format!(r"(?i)\n#{{1,6}}\s+{escaped}\s*(?:\n|$)");
    match Regex::new(&pattern) {
        Ok(re) => match re.find(raw_md) {
            Some(m) => raw_md[..m.start()].trim().to_string(),
            None => raw_md.to_string(),
        },
        Err(_) => raw_md.to_string(),
    }
}

pub(crate) fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(50)
        .collect()
}

/// Outline-driven slicing over page-ordered markdown. Pure with respect to
/// the PDF container: everything it needs arrives as plain data.
pub(crate) fn slice_sections(
    filename: &str,
    outline: &[OutlineEntry],
    pages_md: &[String],
    noise_patterns: &[String],
) -> ParsedDocument {
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut parents: HashMap<String, String> = HashMap::new();
    let splitter = RecursiveSplitter::new(MAX_CHUNK_SIZE, CHUNK_OVERLAP);

    // Live title per outline level, for context-path injection.
    let mut hierarchy: Vec<(usize, String)> = Vec::new();

    for (i, entry) in outline.iter().enumerate() {
        hierarchy.retain(|(level, _)| *level < entry.level);
        hierarchy.push((entry.level, entry.title.clone()));

        let mut context_path = format!("[Source: {filename}]");
        for (_, title) in &hierarchy {
            context_path.push_str(" > ");
            context_path.push_str(title);
        }

        let start_idx = entry.page.saturating_sub(1);
        let end_idx = match outline.get(i + 1) {
            Some(next) => next.page.saturating_sub(1).saturating_sub(1),
            None => pages_md.len().saturating_sub(1),
        };
        if start_idx > end_idx {
            continue;
        }

        // Clamp to the page array.
        let safe_start = start_idx.min(pages_md.len().saturating_sub(1));
        let safe_end = end_idx.min(pages_md.len().saturating_sub(1));
        if pages_md.is_empty() || safe_start > safe_end {
            warn!(section = %entry.title, "section pages out of range, skipping");
            continue;
        }

        let mut raw_md = pages_md[safe_start..=safe_end].join("\n\n");
        if let Some(next) = outline.get(i + 1) {
            raw_md = strict_truncate(&raw_md, &next.title);
        }

        let cleaned = clean_text(&raw_md, noise_patterns);
        if cleaned.trim().is_empty() {
            continue;
        }
        let cleaned = cleaned.trim().to_string();

        let parent_id = format!("{filename}_sec_{i:03}_{}", sanitize_title(&entry.title));
        parents.insert(parent_id.clone(), cleaned.clone());

        let make_meta = |ordinal: usize| ChunkMeta {
            source: filename.to_string(),
            parent_id: parent_id.clone(),
            section: entry.title.clone(),
            context: context_path.clone(),
            chunk_id: format!("{parent_id}_{ordinal}"),
            child_index: ordinal,
            source_role: SourceRole::Primary,
        };

        let section_len = cleaned.chars().count() as f64;
        if section_len <= MAX_CHUNK_SIZE as f64 * SINGLE_CHUNK_FACTOR {
            chunks.push(Chunk {
                content: format!("{context_path}\n\n{cleaned}"),
                meta: make_meta(0),
            });
        } else {
            for (ordinal, piece) in splitter.split(&cleaned).into_iter().enumerate() {
                chunks.push(Chunk {
                    content: format!("{context_path}\n\n{piece}"),
                    meta: make_meta(ordinal),
                });
            }
        }
    }

    ParsedDocument { chunks, parents }
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Parse a PDF along its outline. Returns an empty result when no outline is
/// extractable (caller decides whether to fall back to [`parse_flat`]).
pub fn parse(path: &Path, filename: &str) -> Result<ParsedDocument> {
    let doc = Document::load(path).map_err(|e| SiliqaError::Parse(e.to_string()))?;

    let outline = extract_outline(&doc);
    if outline.is_empty() {
        info!(file = filename, "no extractable outline");
        return Ok(ParsedDocument::default());
    }

    let pages_md = convert_pages_markdown(&doc, &outline);
    let noise = detect_noise(&sample_noise_pages(&pages_md));
    info!(file = filename, patterns = noise.len(), "noise patterns detected");

    let parsed = slice_sections(filename, &outline, &pages_md, &noise);
    info!(
        file = filename,
        sections = parsed.parents.len(),
        chunks = parsed.chunks.len(),
        "outline slicing complete"
    );
    Ok(parsed)
}

/// Flat fallback for outline-less PDFs: extract text with `## Page N`
/// markers, then window it. Each window becomes its own parent so expansion
/// still resolves.
pub fn parse_flat(
    path: &Path,
    filename: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<ParsedDocument> {
    let doc = Document::load(path).map_err(|e| SiliqaError::Parse(e.to_string()))?;

    let mut full_text = String::new();
    for (page, _) in doc.get_pages() {
        let text = doc.extract_text(&[page]).unwrap_or_default();
        full_text.push_str(&format!("\n\n## Page {page}\n\n{text}"));
    }

    Ok(flat_chunk(filename, &full_text, chunk_size, chunk_overlap))
}

/// Window `text` into synthetic-parent chunks (shared with the Markdown
/// fallback path).
pub(crate) fn flat_chunk(
    filename: &str,
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> ParsedDocument {
    static PAGE_MARKER: OnceLock<Regex> = OnceLock::new();
    let page_marker =
        PAGE_MARKER.get_or_init(|| Regex::new(r"## Page (\d+)").expect("page marker regex"));

    let splitter = RecursiveSplitter::for_prose(chunk_size, chunk_overlap);
    let context_path = format!("[Source: {filename}]");

    let mut chunks = Vec::new();
    let mut parents = HashMap::new();
    let mut current_section = String::new();

    for (i, window) in splitter.split(text).into_iter().enumerate() {
        if let Some(caps) = page_marker.captures_iter(&window).last() {
            current_section = format!("Page {}", &caps[1]);
        }
        let parent_id = format!("{filename}_flat_{i:03}");
        parents.insert(parent_id.clone(), window.clone());
        chunks.push(Chunk {
            content: format!("{context_path}\n\n{window}"),
            meta: ChunkMeta {
                source: filename.to_string(),
                parent_id: parent_id.clone(),
                section: current_section.clone(),
                context: context_path.clone(),
                chunk_id: format!("{parent_id}_0"),
                child_index: 0,
                source_role: SourceRole::Primary,
            },
        });
    }

    ParsedDocument { chunks, parents }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: usize, title: &str, page: usize) -> OutlineEntry {
        OutlineEntry { level, title: title.to_string(), page }
    }

    #[test]
    fn printable_ratio_flags_binary_noise() {
        assert!(printable_ratio("normal technical text 123.") > 0.95);
        let garbled: String = std::iter::repeat('\u{fffd}').take(80).chain("ok".chars()).collect();
        assert!(printable_ratio(&garbled) < MIN_PRINTABLE_RATIO);
    }

    #[test]
    fn detect_noise_finds_repeating_headers() {
        let pages: Vec<String> = (0..6)
            .map(|i| format!("Fusion Compiler User Guide\npage body {i}\nVersion T-2022.03\n"))
            .collect();
        let noise = detect_noise(&pages);
        assert!(noise.contains(&"Fusion Compiler User Guide".to_string()));
        assert!(noise.contains(&"Version T-2022.03".to_string()));
        // Unique body lines must not be flagged.
        assert!(!noise.iter().any(|n| n.starts_with("page body")));
    }

    #[test]
    fn detect_noise_ignores_short_and_long_lines() {
        let long_line = "x".repeat(150);
        let pages: Vec<String> =
            (0..4).map(|_| format!("ab\n{long_line}\nreal header line\n")).collect();
        let noise = detect_noise(&pages);
        assert_eq!(noise, vec!["real header line".to_string()]);
    }

    #[test]
    fn clean_text_removes_feedback_links_and_noise() {
        let noise = vec!["CONFIDENTIAL".to_string()];
        let text = "intro [Feedback](mailto:docs@example.com) body\nCONFIDENTIAL\nrest";
        let cleaned = clean_text(text, &noise);
        assert!(!cleaned.contains("mailto"));
        assert!(!cleaned.contains("CONFIDENTIAL"));
        assert!(cleaned.contains("intro"));
        assert!(cleaned.contains("rest"));
    }

    #[test]
    fn strict_truncate_cuts_at_next_header() {
        let md = "## Section B\n\nbody of B\n\n# C\n\nbody of C";
        let truncated = strict_truncate(md, "C");
        assert!(truncated.contains("body of B"));
        assert!(!truncated.contains("body of C"));
        assert!(!truncated.contains("# C"));
    }

    #[test]
    fn strict_truncate_is_whitespace_flexible_and_case_insensitive() {
        let md = "text\n### clock  tree synthesis\nnext body";
        let truncated = strict_truncate(md, "Clock Tree Synthesis");
        assert_eq!(truncated, "text");
    }

    #[test]
    fn strict_truncate_keeps_slice_without_header() {
        let md = "only body text mentioning C inline";
        assert_eq!(strict_truncate(md, "C"), md);
    }

    #[test]
    fn sanitize_title_replaces_specials_and_truncates() {
        assert_eq!(sanitize_title("Timing & Power (2022)"), "Timing___Power__2022_");
        let long = "a".repeat(80);
        assert_eq!(sanitize_title(&long).len(), 50);
    }

    #[test]
    fn promote_headers_rewrites_outline_titles() {
        let outline = vec![entry(2, "Congestion", 1)];
        let page = "preamble\nCongestion\nbody line";
        let md = promote_headers(page, &outline);
        assert!(md.contains("## Congestion\n"));
        assert!(md.contains("preamble"));
    }

    #[test]
    fn percent_unquote_decodes_sequences() {
        assert_eq!(percent_unquote("a%20b"), "a b");
        assert_eq!(percent_unquote("plain text"), "plain text");
    }

    /// Structural-slice scenario: outline [(1,"A",1),(2,"B",5),(1,"C",10)]
    /// over 12 pages with a `# C` cue on page 9.
    #[test]
    fn slice_sections_spans_and_truncates() {
        let outline = vec![entry(1, "A", 1), entry(2, "B", 5), entry(1, "C", 10)];
        let mut pages: Vec<String> = (1..=12).map(|p| format!("content of page {p}")).collect();
        pages[8] = "tail of B\n# C\nleaked start of C".to_string(); // page 9

        let parsed = slice_sections("file.pdf", &outline, &pages, &[]);

        let mut parent_ids: Vec<&String> = parsed.parents.keys().collect();
        parent_ids.sort();
        assert_eq!(
            parent_ids,
            vec!["file.pdf_sec_000_A", "file.pdf_sec_001_B", "file.pdf_sec_002_C"]
        );

        let a = &parsed.parents["file.pdf_sec_000_A"];
        assert!(a.contains("content of page 1"));
        assert!(a.contains("content of page 4"));
        assert!(!a.contains("content of page 5"));

        let b = &parsed.parents["file.pdf_sec_001_B"];
        assert!(b.contains("content of page 5"));
        assert!(b.contains("tail of B"));
        assert!(!b.contains("leaked start of C"), "B absorbed content past the # C header");

        let c = &parsed.parents["file.pdf_sec_002_C"];
        assert!(c.contains("content of page 10"));
        assert!(c.contains("content of page 12"));
    }

    #[test]
    fn slice_sections_builds_context_hierarchy() {
        let outline = vec![
            entry(1, "Placement", 1),
            entry(2, "Congestion", 2),
            entry(1, "Routing", 3),
        ];
        let pages: Vec<String> = (1..=4).map(|p| format!("page {p} body")).collect();
        let parsed = slice_sections("fc_ug.pdf", &outline, &pages, &[]);

        let congestion = parsed
            .chunks
            .iter()
            .find(|c| c.meta.section == "Congestion")
            .expect("congestion chunk");
        assert_eq!(
            congestion.meta.context,
            "[Source: fc_ug.pdf] > Placement > Congestion"
        );

        // Level-1 entry after a level-2 one drops the deeper title.
        let routing = parsed.chunks.iter().find(|c| c.meta.section == "Routing").unwrap();
        assert_eq!(routing.meta.context, "[Source: fc_ug.pdf] > Routing");
    }

    #[test]
    fn slice_sections_skips_empty_and_inverted_sections() {
        // B starts beyond A on the same page, producing start > end for A.
        let outline = vec![entry(1, "A", 5), entry(1, "B", 2)];
        let pages: Vec<String> = (1..=6).map(|p| format!("page {p}")).collect();
        let parsed = slice_sections("f.pdf", &outline, &pages, &[]);
        // A spans pages 5..1 → skipped; B spans 2..6.
        assert_eq!(parsed.parents.len(), 1);
        assert!(parsed.parents.contains_key("f.pdf_sec_001_B"));
    }

    #[test]
    fn small_section_is_one_child_large_section_splits() {
        let outline = vec![entry(1, "Small", 1), entry(1, "Large", 2)];
        let small_page = "short body".to_string();
        let large_page = "word ".repeat(800); // 4000 chars
        let pages = vec![small_page, large_page];
        let parsed = slice_sections("f.pdf", &outline, &pages, &[]);

        let small_children: Vec<_> =
            parsed.chunks.iter().filter(|c| c.meta.section == "Small").collect();
        assert_eq!(small_children.len(), 1);
        assert_eq!(small_children[0].meta.chunk_id, "f.pdf_sec_000_Small_0");

        let large_children: Vec<_> =
            parsed.chunks.iter().filter(|c| c.meta.section == "Large").collect();
        assert!(large_children.len() > 1);
        for (i, child) in large_children.iter().enumerate() {
            assert_eq!(child.meta.child_index, i);
            assert!(child.content.starts_with("[Source: f.pdf] > Large\n\n"));
        }
    }

    #[test]
    fn every_child_parent_resolves() {
        let outline = vec![entry(1, "A", 1), entry(2, "B", 2), entry(1, "C", 3)];
        let pages: Vec<String> = (1..=4).map(|p| format!("page {p} text")).collect();
        let parsed = slice_sections("f.pdf", &outline, &pages, &[]);
        for chunk in &parsed.chunks {
            assert!(
                parsed.parents.contains_key(&chunk.meta.parent_id),
                "dangling parent_id {}",
                chunk.meta.parent_id
            );
        }
    }

    #[test]
    fn flat_chunk_assigns_synthetic_parents_and_page_sections() {
        let text = format!("## Page 1\n\n{}\n\n## Page 2\n\n{}", "alpha ".repeat(200), "beta ".repeat(200));
        let parsed = flat_chunk("scan.pdf", &text, 500, 100);
        assert!(parsed.chunks.len() > 1);
        for chunk in &parsed.chunks {
            assert!(parsed.parents.contains_key(&chunk.meta.parent_id));
            assert!(chunk.meta.parent_id.starts_with("scan.pdf_flat_"));
        }
        assert!(parsed.chunks.iter().any(|c| c.meta.section == "Page 1"));
    }
}
