use std::cmp::Reverse;
use std::collections::HashSet;

use crate::graph::NodeId;

use super::enumerate::Enumeration;
use super::legality::Island;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct SelectionResult {
    pub(crate) selected: Vec<usize>,
    pub(crate) rejected_overlap: usize,
}

/// Picks islands so no node lands in two of them; larger islands win, then lower root rank.
pub(crate) fn select_non_overlapping(
    islands: &[Island],
    enumeration: &Enumeration,
) -> SelectionResult {
    let mut order = (0..islands.len()).collect::<Vec<_>>();
    order.sort_by_key(|&idx| {
        let island = &islands[idx];
        (
            Reverse(island.nodes.len()),
            enumeration.rank(island.root).unwrap_or(usize::MAX),
            idx,
        )
    });

    let mut occupied = HashSet::<NodeId>::new();
    let mut selected = Vec::new();
    let mut rejected_overlap = 0usize;
    for idx in order {
        let island = &islands[idx];
        let has_overlap = island.nodes.iter().any(|node| occupied.contains(node));
        if has_overlap {
            rejected_overlap = rejected_overlap.saturating_add(1);
            continue;
        }
        occupied.extend(island.nodes.iter().copied());
        selected.push(idx);
    }

    SelectionResult {
        selected,
        rejected_overlap,
    }
}
