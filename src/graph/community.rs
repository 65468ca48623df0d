// Community Detection
// Label propagation over a GraphSnapshot, with a hierarchical variant

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::core::config::CommunitySettings;
use crate::core::deadline::CallOptions;
use crate::core::errors::RagError;
use crate::rag::store::GraphStore;

use super::snapshot::{load_snapshot, GraphNode, GraphSnapshot};

#[derive(Debug, Clone, PartialEq)]
pub struct DetectOptions {
    /// Upper bound on propagation rounds.
    pub max_iterations: usize,
    /// Stop once the share of relabelled nodes in a round drops below this.
    pub convergence_threshold: Option<f64>,
    /// Level-0 groups smaller than this are dropped.
    pub min_community_size: usize,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            convergence_threshold: None,
            min_community_size: 1,
        }
    }
}

impl From<&CommunitySettings> for DetectOptions {
    fn from(settings: &CommunitySettings) -> Self {
        Self {
            max_iterations: settings.max_iterations,
            convergence_threshold: settings.convergence_threshold,
            min_community_size: settings.min_community_size,
        }
    }
}

/// A group of entities (level 0) or of lower-level communities (level > 0).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub member_ids: BTreeSet<String>,
    pub level: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommunityHierarchy {
    levels: Vec<Vec<Community>>,
}

impl CommunityHierarchy {
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> &[Community] {
        self.levels.get(level).map(|c| c.as_slice()).unwrap_or(&[])
    }

    /// Community count per level, bottom first.
    pub fn counts(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.len()).collect()
    }

    pub fn community(&self, level: usize, id: &str) -> Option<&Community> {
        self.level(level).iter().find(|c| c.id == id)
    }

    /// Entity ids under a community, resolved through every lower level.
    pub fn flatten(&self, level: usize, id: &str) -> BTreeSet<String> {
        let Some(community) = self.community(level, id) else {
            return BTreeSet::new();
        };
        if level == 0 {
            return community.member_ids.clone();
        }
        community
            .member_ids
            .iter()
            .flat_map(|member| self.flatten(level - 1, member))
            .collect()
    }
}

/// Final label per node (ascending id order, Gauss–Seidel updates).
///
/// Each round visits nodes in ascending id order and immediately adopts the
/// most frequent label among the node's neighbours, the smallest label
/// winning ties. Nodes without neighbours keep their own id.
pub fn propagate_labels(snapshot: &GraphSnapshot, opts: &DetectOptions) -> BTreeMap<String, String> {
    let ids = snapshot.sorted_ids();
    let mut labels: HashMap<&str, String> = ids.iter().map(|id| (*id, id.to_string())).collect();
    let neighbours: HashMap<&str, BTreeSet<&str>> =
        ids.iter().map(|id| (*id, snapshot.neighbors(id))).collect();

    for round in 0..opts.max_iterations {
        let mut changed = 0usize;

        for id in &ids {
            let Some(adjacent) = neighbours.get(id) else {
                continue;
            };
            if adjacent.is_empty() {
                continue;
            }

            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for n in adjacent {
                if let Some(label) = labels.get(n) {
                    *counts.entry(label.as_str()).or_insert(0) += 1;
                }
            }

            // BTreeMap iterates ascending, so strict `>` keeps the smallest tied label.
            let mut best: Option<(&str, usize)> = None;
            for (label, count) in counts {
                if best.map_or(true, |(_, c)| count > c) {
                    best = Some((label, count));
                }
            }

            if let Some((label, _)) = best {
                let label = label.to_string();
                if labels.get(id) != Some(&label) {
                    labels.insert(*id, label);
                    changed += 1;
                }
            }
        }

        tracing::trace!(round, changed, "Label propagation round");

        if changed == 0 {
            break;
        }
        if let Some(threshold) = opts.convergence_threshold {
            if (changed as f64 / ids.len() as f64) < threshold {
                break;
            }
        }
    }

    labels
        .into_iter()
        .map(|(id, label)| (id.to_string(), label))
        .collect()
}

/// Group connected nodes of `snapshot` by label: `label -> sorted member ids`.
pub fn communities(snapshot: &GraphSnapshot, opts: &DetectOptions) -> BTreeMap<String, Vec<String>> {
    let labels = propagate_labels(snapshot, opts);
    let mut groups = group_by_label(&labels, |id| snapshot.degree(id) > 0);
    groups.retain(|_, members| members.len() >= opts.min_community_size.max(1));
    groups
}

fn group_by_label<F>(labels: &BTreeMap<String, String>, keep: F) -> BTreeMap<String, Vec<String>>
where
    F: Fn(&str) -> bool,
{
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    // `labels` is ordered by id, so member lists come out sorted.
    for (id, label) in labels {
        if keep(id.as_str()) {
            groups.entry(label.clone()).or_default().push(id.clone());
        }
    }
    groups
}

/// Load `graph_id` and run label propagation over it.
pub async fn detect(
    store: &dyn GraphStore,
    graph_id: &str,
    opts: &DetectOptions,
    call: &CallOptions,
) -> Result<BTreeMap<String, Vec<String>>, RagError> {
    let snapshot = load_snapshot(store, graph_id, call).await?;
    let groups = communities(&snapshot, opts);
    tracing::debug!(graph_id, communities = groups.len(), "Detected communities");
    Ok(groups)
}

/// Build `levels` levels of communities (at least one).
///
/// Level n propagates labels over a meta-graph of level n-1 communities,
/// two of which are adjacent when any of their entities are adjacent in
/// `snapshot`. Every community lands in exactly one parent, so counts
/// never grow going up.
pub fn build_hierarchy(
    snapshot: &GraphSnapshot,
    levels: usize,
    opts: &DetectOptions,
) -> CommunityHierarchy {
    let levels = levels.max(1);
    let mut hierarchy = CommunityHierarchy::default();

    let base = to_communities(0, communities(snapshot, opts));
    // entity id -> id of the community holding it at the current top level
    let mut owner: HashMap<String, String> = HashMap::new();
    for community in &base {
        for member in &community.member_ids {
            owner.insert(member.clone(), community.id.clone());
        }
    }
    hierarchy.levels.push(base);

    for level in 1..levels {
        let previous = &hierarchy.levels[level - 1];
        let meta = meta_graph(snapshot, previous, &owner);
        let labels = propagate_labels(&meta, opts);
        let groups = group_by_label(&labels, |_| true);
        let current = to_communities(level, groups);

        let mut parent_of: HashMap<&str, &str> = HashMap::new();
        for community in &current {
            for member in &community.member_ids {
                parent_of.insert(member.as_str(), community.id.as_str());
            }
        }
        let lifted: HashMap<String, String> = owner
            .iter()
            .filter_map(|(entity, child)| {
                parent_of
                    .get(child.as_str())
                    .map(|parent| (entity.clone(), parent.to_string()))
            })
            .collect();
        owner = lifted;

        hierarchy.levels.push(current);
    }

    tracing::debug!(counts = ?hierarchy.counts(), "Built community hierarchy");
    hierarchy
}

/// Load `graph_id` and build its community hierarchy.
pub async fn detect_hierarchical(
    store: &dyn GraphStore,
    graph_id: &str,
    levels: usize,
    opts: &DetectOptions,
    call: &CallOptions,
) -> Result<CommunityHierarchy, RagError> {
    let snapshot = load_snapshot(store, graph_id, call).await?;
    Ok(build_hierarchy(&snapshot, levels, opts))
}

fn to_communities(level: usize, groups: BTreeMap<String, Vec<String>>) -> Vec<Community> {
    groups
        .into_values()
        .enumerate()
        .map(|(index, members)| Community {
            id: format!("L{}-{}", level, index),
            member_ids: members.into_iter().collect(),
            level,
        })
        .collect()
}

fn meta_graph(
    snapshot: &GraphSnapshot,
    communities: &[Community],
    owner: &HashMap<String, String>,
) -> GraphSnapshot {
    let mut meta = GraphSnapshot::new();
    for community in communities {
        meta.add_node(GraphNode::new(community.id.clone()));
    }
    for (source, target) in snapshot.edges() {
        if let (Some(a), Some(b)) = (owner.get(source), owner.get(target)) {
            meta.add_edge(a, b);
        }
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::memory::InMemoryGraphStore;

    fn snapshot(edges: &[(&str, &str)]) -> GraphSnapshot {
        GraphSnapshot::from_parts(
            Vec::new(),
            edges
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
        )
    }

    /// Two triangles joined by one bridge, plus a separate pair joined to
    /// the second triangle by a chain.
    fn clustered() -> GraphSnapshot {
        snapshot(&[
            ("a1", "a2"),
            ("a2", "a3"),
            ("a1", "a3"),
            ("b1", "b2"),
            ("b2", "b3"),
            ("b1", "b3"),
            ("a3", "b1"),
            ("c1", "c2"),
            ("c2", "d1"),
            ("d1", "d2"),
            ("d2", "d3"),
            ("d1", "d3"),
        ])
    }

    #[tokio::test]
    async fn two_disconnected_pairs_form_two_communities() {
        let store = InMemoryGraphStore::new();
        for id in ["a", "b", "c", "d"] {
            store.add_node("g", id, id, "").unwrap();
        }
        store.add_edge("g", "a", "b").unwrap();
        store.add_edge("g", "c", "d").unwrap();

        let groups = detect(&store, "g", &DetectOptions::default(), &CallOptions::unbounded())
            .await
            .unwrap();

        assert_eq!(groups.len(), 2);
        let members: Vec<&Vec<String>> = groups.values().collect();
        assert_eq!(members[0], &vec!["a".to_string(), "b".to_string()]);
        assert_eq!(members[1], &vec!["c".to_string(), "d".to_string()]);
    }

    #[tokio::test]
    async fn empty_and_isolated_graphs_have_no_communities() {
        let store = InMemoryGraphStore::new();
        let empty = detect(&store, "g", &DetectOptions::default(), &CallOptions::unbounded())
            .await
            .unwrap();
        assert!(empty.is_empty());

        store.add_node("g", "lonely", "Lonely", "").unwrap();
        let isolated = detect(&store, "g", &DetectOptions::default(), &CallOptions::unbounded())
            .await
            .unwrap();
        assert!(isolated.is_empty());
    }

    #[test]
    fn ties_break_to_smallest_label() {
        // b sees labels "b" (from a) and "c" once each; "b" wins.
        let labels = propagate_labels(&snapshot(&[("a", "b"), ("b", "c")]), &DetectOptions::default());
        assert_eq!(labels["a"], labels["b"]);
        assert_eq!(labels["b"], labels["c"]);
        assert_eq!(labels["a"], "b");
    }

    #[test]
    fn zero_iterations_keeps_singletons() {
        let opts = DetectOptions {
            max_iterations: 0,
            ..Default::default()
        };
        let labels = propagate_labels(&snapshot(&[("a", "b")]), &opts);
        assert_eq!(labels["a"], "a");
        assert_eq!(labels["b"], "b");
    }

    #[test]
    fn convergence_threshold_stops_early() {
        // Path a - d - b - c: round one relabels a, b and d (3 of 4 nodes),
        // round two still moves a from "d" to "c".
        let graph = snapshot(&[("a", "d"), ("d", "b"), ("b", "c")]);

        let full = propagate_labels(&graph, &DetectOptions::default());
        assert!(full.values().all(|label| label == "c"));

        let early = propagate_labels(
            &graph,
            &DetectOptions {
                convergence_threshold: Some(0.9),
                ..Default::default()
            },
        );
        assert_eq!(early["a"], "d");
        assert_eq!(early["b"], "c");
        assert_eq!(early["d"], "c");

        // A threshold below the round-one change ratio keeps iterating.
        let loose = propagate_labels(
            &graph,
            &DetectOptions {
                convergence_threshold: Some(0.5),
                ..Default::default()
            },
        );
        assert_eq!(loose, full);
    }

    #[test]
    fn detection_is_deterministic() {
        let graph = clustered();
        let opts = DetectOptions::default();
        assert_eq!(communities(&graph, &opts), communities(&graph, &opts));
        assert_eq!(build_hierarchy(&graph, 3, &opts), build_hierarchy(&graph, 3, &opts));
    }

    #[test]
    fn min_size_drops_small_groups() {
        let graph = snapshot(&[("a", "b"), ("b", "c"), ("x", "y")]);
        let opts = DetectOptions {
            min_community_size: 3,
            ..Default::default()
        };
        let groups = communities(&graph, &opts);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.values().next().map(|m| m.len()), Some(3));
    }

    #[test]
    fn hierarchy_counts_never_increase() {
        let hierarchy = build_hierarchy(&clustered(), 3, &DetectOptions::default());
        let counts = hierarchy.counts();
        assert_eq!(counts.len(), 3);
        assert!(counts[0] > 0);
        for pair in counts.windows(2) {
            assert!(pair[1] <= pair[0], "counts grew: {:?}", counts);
        }
    }

    #[test]
    fn flatten_resolves_entities_through_levels() {
        let graph = clustered();
        let hierarchy = build_hierarchy(&graph, 2, &DetectOptions::default());

        let base_entities: BTreeSet<String> = hierarchy
            .level(0)
            .iter()
            .flat_map(|c| c.member_ids.iter().cloned())
            .collect();
        let top_entities: BTreeSet<String> = hierarchy
            .level(1)
            .iter()
            .flat_map(|c| hierarchy.flatten(1, &c.id))
            .collect();
        assert_eq!(base_entities, top_entities);
        assert_eq!(base_entities.len(), graph.node_count());
    }

    #[test]
    fn levels_are_clamped_to_one() {
        let hierarchy = build_hierarchy(&snapshot(&[("a", "b")]), 0, &DetectOptions::default());
        assert_eq!(hierarchy.depth(), 1);
        assert_eq!(hierarchy.level(0)[0].level, 0);
    }
}
