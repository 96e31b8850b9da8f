//! Parent-window expansion.
//!
//! Retrieved children are swapped for their enclosing section text just
//! before generation (the grader sees focused children; the generator sees
//! whole sections). Oversized parents are windowed around the child so one
//! giant section cannot crowd out the rest of the context.

use siliqa_common::chunk::{Chunk, ParentDocument};
use siliqa_index::ParentStore;
use tracing::{debug, warn};

/// Parents collected per query.
const MAX_PARENTS: usize = 8;
/// Parents longer than this are windowed instead of passed whole.
const WINDOW_THRESHOLD: usize = 8000;
/// Window length in characters (ellipsis sentinels excluded).
const WINDOW_SIZE: usize = 2000;
/// Leading characters of the child text used to locate it in the parent.
const PROBE_LEN: usize = 200;

/// Expand children to deduplicated parent documents.
pub fn expand_to_parents(children: &[Chunk], parents: &ParentStore) -> Vec<ParentDocument> {
    let mut expanded: Vec<ParentDocument> = Vec::new();

    for child in children {
        if expanded.len() >= MAX_PARENTS {
            break;
        }
        if expanded.iter().any(|p| p.parent_id == child.meta.parent_id) {
            continue;
        }

        let Some(parent_text) = parents
            .get(&child.meta.source, &child.meta.parent_id)
            .or_else(|| parents.lookup(&child.meta.parent_id))
        else {
            warn!(parent_id = %child.meta.parent_id, "parent text missing, keeping child");
            expanded.push(ParentDocument {
                parent_id: child.meta.parent_id.clone(),
                source: child.meta.source.clone(),
                content: child.content.clone(),
                is_windowed: false,
                source_role: child.meta.source_role,
            });
            continue;
        };

        let parent_len = parent_text.chars().count();
        let (content, is_windowed) = if parent_len > WINDOW_THRESHOLD {
            (window_around_child(&parent_text, &child.content), true)
        } else {
            (parent_text, false)
        };
        debug!(parent_id = %child.meta.parent_id, windowed = is_windowed, "parent expanded");

        expanded.push(ParentDocument {
            parent_id: child.meta.parent_id.clone(),
            source: child.meta.source.clone(),
            content,
            is_windowed,
            source_role: child.meta.source_role,
        });
    }

    expanded
}

/// Strip the breadcrumb header injected into child content at indexing time.
fn child_body(child_content: &str) -> &str {
    match child_content.split_once("\n\n") {
        Some((header, body)) if header.starts_with("[Source:") => body,
        _ => child_content,
    }
}

/// Center a [`WINDOW_SIZE`]-char window on the child's position inside the
/// parent. If the child prefix cannot be located, take the head of the
/// parent instead.
pub(crate) fn window_around_child(parent: &str, child_content: &str) -> String {
    let probe: String = child_body(child_content).chars().take(PROBE_LEN).collect();
    let probe = probe.trim();

    let parent_chars: Vec<char> = parent.chars().collect();
    let (start, end) = match (!probe.is_empty()).then(|| parent.find(probe)).flatten() {
        Some(byte_pos) => {
            let probe_start = parent[..byte_pos].chars().count();
            let center = probe_start + probe.chars().count() / 2;
            let half = WINDOW_SIZE / 2;
            let start = center.saturating_sub(half);
            let end = (start + WINDOW_SIZE).min(parent_chars.len());
            // Re-anchor if the window ran past the tail.
            (end.saturating_sub(WINDOW_SIZE), end)
        }
        None => (0, WINDOW_SIZE.min(parent_chars.len())),
    };

    let mut window: String = parent_chars[start..end].iter().collect();
    if start > 0 {
        window = format!("…{window}");
    }
    if end < parent_chars.len() {
        window = format!("{window}…");
    }
    window
}
