//! Reconciling a reordered visible subset back into the full collection.
//!
//! The visible block is spliced in where the first id of the new order used
//! to sit. Tasks outside the block keep their relative order.

use std::collections::{HashMap, HashSet};

use crate::task::Task;

/// Indices into `full_ids` describing the reconciled order.
pub fn reconcile_indices(full_ids: &[&str], visible_ids: &[&str]) -> Vec<usize> {
    let position: HashMap<&str, usize> = full_ids
        .iter()
        .enumerate()
        .rev()
        .map(|(idx, id)| (*id, idx))
        .collect();

    let mut seen = HashSet::new();
    let block: Vec<usize> = visible_ids
        .iter()
        .filter_map(|id| position.get(id).copied())
        .filter(|idx| seen.insert(*idx))
        .collect();

    let anchor = visible_ids.first().and_then(|id| position.get(id).copied());
    let in_block: HashSet<usize> = block.iter().copied().collect();

    let mut out = Vec::with_capacity(full_ids.len());
    let mut placed = false;
    for idx in 0..full_ids.len() {
        if anchor == Some(idx) {
            out.extend_from_slice(&block);
            placed = true;
        }
        if in_block.contains(&idx) {
            continue;
        }
        out.push(idx);
    }
    if !placed {
        out.extend_from_slice(&block);
    }
    out
}

pub fn reconcile(tasks: Vec<Task>, visible_ids: &[String]) -> Vec<Task> {
    let order = {
        let full: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        let visible: Vec<&str> = visible_ids.iter().map(String::as_str).collect();
        reconcile_indices(&full, &visible)
    };

    let mut slots: Vec<Option<Task>> = tasks.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|idx| slots.get_mut(idx).and_then(Option::take))
        .collect()
}
