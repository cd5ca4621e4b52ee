//! Human-readable "why selected" strings for rendered list entries.

use crate::pipeline::select::{SelectedEntry, SelectionPhase};

/// Builds the `why` string for an admitted entry: the admitting phase,
/// then the notable scoring factors in a fixed order so re-runs produce
/// identical text.
pub(crate) fn why_selected(entry: &SelectedEntry) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(3);
    parts.push(
        match entry.phase {
            SelectionPhase::Core => "stable core pick",
            SelectionPhase::NewEntrant => "new entrant",
            SelectionPhase::Fill => "quality fill",
        }
        .to_string(),
    );

    let sources = entry.scored.candidate.hits.len();
    if sources >= 2 {
        parts.push(format!("{sources} sources agree"));
    }
    if entry.scored.is_new {
        parts.push("first appearance".to_string());
    } else if entry.scored.novelty_boost > 0.0 {
        parts.push("returning after a break".to_string());
    }

    parts.join(", ")
}
