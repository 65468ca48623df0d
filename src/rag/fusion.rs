//! Reciprocal Rank Fusion: score = Σ 1/(k + rank_i)
//!
//! Combines multiple ranked lists into a single fused ranking without
//! requiring score normalization across different retrieval methods.

use std::collections::{HashMap, HashSet};

use crate::context::ScoredItem;

/// Reference smoothing constant.
pub const DEFAULT_RRF_K: usize = 60;

/// Fuse ranked lists using Reciprocal Rank Fusion.
///
/// Each source is `(tag, items)` with `items` already sorted best-first.
/// `k` is the smoothing constant; higher k reduces the influence of
/// top-ranked items from any single list (`0` is treated as `1`).
///
/// The output score is the RRF score. Content and metadata come from the
/// first source (in `sources` order) that produced the id. Ties keep the
/// order in which ids were first encountered, so the result is a pure
/// function of the input.
pub fn fuse<T: AsRef<str>>(sources: &[(T, Vec<ScoredItem>)], k: usize) -> Vec<ScoredItem> {
    let k = k.max(1) as f64;

    let mut fused: Vec<(ScoredItem, f64)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (tag, items) in sources {
        let mut seen_in_source: HashSet<&str> = HashSet::new();

        for (index, item) in items.iter().enumerate() {
            // A repeated id inside one list only counts at its best rank.
            if !seen_in_source.insert(item.id.as_str()) {
                continue;
            }

            let contribution = 1.0 / (k + (index + 1) as f64);
            match positions.get(&item.id) {
                Some(&pos) => fused[pos].1 += contribution,
                None => {
                    positions.insert(item.id.clone(), fused.len());
                    fused.push((item.clone(), contribution));
                }
            }
        }

        tracing::trace!(source = tag.as_ref(), items = items.len(), "Fused source");
    }

    // Stable sort: equal scores keep first-encountered order.
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    fused
        .into_iter()
        .map(|(item, score)| item.with_score(score))
        .collect()
}
