//! Preferred-machine hints.
//!
//! Hints never affect conflict or cascade logic; they only pre-fill a duration
//! and order the machine picker.

use rustc_hash::FxHashMap;

use crate::models::{Machine, MachineHint};

/// Duration suggested by the first hint carrying a positive estimate.
pub fn prefill_duration(hints: &[MachineHint]) -> Option<i64> {
    hints
        .iter()
        .filter_map(|h| h.estimated_minutes)
        .find(|&minutes| minutes > 0)
}

/// Estimated run time on a specific machine, if hinted.
pub fn estimate_for(hints: &[MachineHint], machine_id: &str) -> Option<i64> {
    hints
        .iter()
        .find(|h| h.machine_id == machine_id)
        .and_then(|h| h.estimated_minutes)
        .filter(|&minutes| minutes > 0)
}

/// Active machines ordered for selection.
///
/// Hinted machines come first in hint order; the rest follow by display order,
/// then id. Inactive machines are dropped even when hinted.
pub fn rank_machines(machines: &[Machine], hints: &[MachineHint]) -> Vec<Machine> {
    let mut hint_rank: FxHashMap<&str, usize> = FxHashMap::default();
    for (i, hint) in hints.iter().enumerate() {
        hint_rank.entry(hint.machine_id.as_str()).or_insert(i);
    }

    let mut ranked: Vec<Machine> = machines.iter().filter(|m| m.is_active).cloned().collect();
    ranked.sort_by(|a, b| {
        let ra = hint_rank.get(a.id.as_str()).copied().unwrap_or(usize::MAX);
        let rb = hint_rank.get(b.id.as_str()).copied().unwrap_or(usize::MAX);
        ra.cmp(&rb)
            .then(a.display_order.cmp(&b.display_order))
            .then(a.id.cmp(&b.id))
    });
    ranked
}
