//! Domain-aware Chinese+English segmentation.
//!
//! A single shared jieba instance is built once per process. When a domain
//! dictionary (`eda_terms.txt`) is present its terms are registered before
//! first use so multi-word EDA vocabulary survives segmentation intact.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use jieba_rs::Jieba;
use tracing::{info, warn};

static SEGMENTER: OnceLock<Jieba> = OnceLock::new();
static DICT_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Register the optional domain dictionary. Must be called before the first
/// tokenization; later calls are ignored (load-once semantics).
pub fn configure_dictionary(path: Option<&Path>) {
    let _ = DICT_PATH.set(path.map(Path::to_path_buf));
}

fn build_segmenter() -> Jieba {
    let mut jieba = Jieba::new();
    let dict = DICT_PATH.get_or_init(|| None);
    if let Some(path) = dict {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let mut added = 0usize;
                for line in contents.lines() {
                    let term = line.trim();
                    if term.is_empty() || term.starts_with('#') {
                        continue;
                    }
                    jieba.add_word(term, None, None);
                    added += 1;
                }
                info!(path = %path.display(), terms = added, "domain dictionary loaded");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "domain dictionary unreadable"),
        }
    }
    jieba
}

/// Segment `text` into index tokens. Whitespace-only tokens are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    let jieba = SEGMENTER.get_or_init(build_segmenter);
    jieba
        .cut(text, false)
        .into_iter()
        .filter(|tok| !tok.trim().is_empty())
        .map(str::to_string)
        .collect()
}
