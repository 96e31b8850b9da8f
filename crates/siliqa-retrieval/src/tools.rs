//! Tool registry: disambiguates queries by product/tool.
//!
//! EDA vendors reuse terminology across tools, so a query naming a specific
//! tool should be answered from that tool's manuals. The registry maps query
//! keywords to filename patterns, is seeded with the common Synopsys tools,
//! and learns new entries from the ingested corpus on demand. The config file
//! is auto-created when missing and always rewritten atomically.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use siliqa_common::fsutil::write_json_atomic;
use siliqa_common::Result;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolEntry {
    pub id: String,
    pub display_name: String,
    pub filename_patterns: Vec<String>,
    pub query_keywords: Vec<String>,
}

pub struct ToolRegistry {
    path: PathBuf,
    entries: RwLock<Vec<ToolEntry>>,
}

fn seed_entries() -> Vec<ToolEntry> {
    let entry = |id: &str, name: &str, patterns: &[&str], keywords: &[&str]| ToolEntry {
        id: id.to_string(),
        display_name: name.to_string(),
        filename_patterns: patterns.iter().map(|s| s.to_string()).collect(),
        query_keywords: keywords.iter().map(|s| s.to_string()).collect(),
    };
    vec![
        entry("fc", "Fusion Compiler", &["fc", "fusion"], &["fc", "fusion compiler"]),
        entry("pt", "PrimeTime", &["pt", "primetime"], &["pt", "primetime", "prime time"]),
        entry("icc2", "IC Compiler II", &["icc2", "icc"], &["icc2", "ic compiler"]),
        entry("dc", "Design Compiler", &["dc", "design_compiler"], &["dc", "design compiler"]),
    ]
}

impl ToolRegistry {
    /// Load the registry, creating the file with seed entries when missing.
    pub fn load_or_create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            match serde_json::from_slice::<Vec<ToolEntry>>(&std::fs::read(&path)?) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "tool registry unreadable, reseeding");
                    let seeds = seed_entries();
                    write_json_atomic(&path, &seeds)?;
                    seeds
                }
            }
        } else {
            let seeds = seed_entries();
            write_json_atomic(&path, &seeds)?;
            info!(path = %path.display(), "tool registry created with seed entries");
            seeds
        };
        Ok(Self { path, entries: RwLock::new(entries) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Vec<ToolEntry> {
        self.entries.read().expect("tool registry lock poisoned").clone()
    }

    /// First tool whose query keywords match `question` on a word boundary.
    pub fn match_query(&self, question: &str) -> Option<ToolEntry> {
        let entries = self.entries.read().expect("tool registry lock poisoned");
        for entry in entries.iter() {
            for keyword in &entry.query_keywords {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(keyword));
                if Regex::new(&pattern).is_ok_and(|re| re.is_match(question)) {
                    return Some(entry.clone());
                }
            }
        }
        None
    }

    /// Whether `source` belongs to `entry` by filename pattern.
    pub fn source_matches(entry: &ToolEntry, source: &str) -> bool {
        let source = source.to_lowercase();
        entry
            .filename_patterns
            .iter()
            .any(|pattern| source.contains(&pattern.to_lowercase()))
    }

    /// Display label for a source file, or the file name itself when no tool
    /// claims it.
    pub fn label_for_source(&self, source: &str) -> String {
        let entries = self.entries.read().expect("tool registry lock poisoned");
        entries
            .iter()
            .find(|entry| Self::source_matches(entry, source))
            .map(|entry| entry.display_name.clone())
            .unwrap_or_else(|| source.to_string())
    }

    /// Scan corpus sources for files no tool claims and propose new entries
    /// from their leading name token. Low precision by design; the registry
    /// file is rewritten atomically and is reviewable.
    pub fn discover(&self, sources: &[String]) -> Result<Vec<ToolEntry>> {
        let split = Regex::new(r"[_\-\s]+").expect("token split regex");
        let mut new_entries: Vec<ToolEntry> = Vec::new();

        {
            let entries = self.entries.read().expect("tool registry lock poisoned");
            for source in sources {
                if entries.iter().any(|entry| Self::source_matches(entry, source)) {
                    continue;
                }
                let Some(token) = split.split(source).next().filter(|t| t.len() > 2) else {
                    continue;
                };
                let id = token.to_lowercase();
                if entries.iter().any(|e| e.id == id) || new_entries.iter().any(|e| e.id == id) {
                    continue;
                }
                new_entries.push(ToolEntry {
                    id: id.clone(),
                    display_name: token.to_uppercase(),
                    filename_patterns: vec![id.clone()],
                    query_keywords: vec![id],
                });
            }
        }

        if !new_entries.is_empty() {
            let mut entries = self.entries.write().expect("tool registry lock poisoned");
            entries.extend(new_entries.clone());
            write_json_atomic(&self.path, &*entries)?;
            info!(count = new_entries.len(), "tool registry extended by auto-discovery");
        }
        Ok(new_entries)
    }
}
