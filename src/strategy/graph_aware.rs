use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;

use crate::context::{RequestContext, ScoredItem};
use crate::core::errors::RagError;
use crate::graph::{communities, load_snapshot, DetectOptions, GraphNode, GraphSnapshot};
use crate::rag::fusion::fuse;
use crate::rag::lexical;

use super::hybrid::search_candidates;
use super::{
    elapsed_ms, ensure_active, maybe_rerank, synthesize, Adapters, Capability, GraphMode,
    RetrievalOptions, RetrievalResult, RetrievalStrategy, StrategyKind,
};

/// Neighbours inherit this share of the seed entity's score.
const NEIGHBOUR_DECAY: f64 = 0.5;

/// Vector retrieval fused with entities or communities from the graph store.
pub struct GraphAware {
    adapters: Adapters,
}

impl GraphAware {
    pub fn new(adapters: Adapters) -> Self {
        Self { adapters }
    }

    async fn ranked(
        &self,
        query: &str,
        ctx: &RequestContext,
        opts: &RetrievalOptions,
    ) -> Result<Vec<ScoredItem>, RagError> {
        let graph_store = self.adapters.graph_store()?;
        let graph_call = opts.graph_call();

        let (candidates, snapshot) = tokio::join!(
            search_candidates(&self.adapters, query, opts),
            load_snapshot(graph_store.as_ref(), &opts.graph_id, &graph_call),
        );
        let (candidates, snapshot) = (candidates?, snapshot?);

        let graph = graph_items(&snapshot, query, opts.graph_mode, &opts.detect, opts.rrf_k);
        tracing::debug!(
            request_id = %ctx.request_id,
            mode = opts.graph_mode.as_str(),
            vector = candidates.len(),
            graph = graph.len(),
            "Graph-aware candidates"
        );

        let fused = fuse(&[("vector", candidates), ("graph", graph)], opts.rrf_k);
        let mut items = maybe_rerank(&self.adapters, query, ctx, fused, opts).await;
        items.truncate(opts.top_k);
        Ok(items)
    }
}

#[async_trait]
impl RetrievalStrategy for GraphAware {
    fn name(&self) -> StrategyKind {
        StrategyKind::GraphAware
    }

    fn required_adapters(&self) -> BTreeSet<Capability> {
        BTreeSet::from([
            Capability::Embedder,
            Capability::VectorStore,
            Capability::GraphStore,
        ])
    }

    async fn retrieve(
        &self,
        query: &str,
        ctx: &RequestContext,
        opts: &RetrievalOptions,
    ) -> Result<RetrievalResult, RagError> {
        let started = Instant::now();
        if !ensure_active(ctx)? {
            return Ok(RetrievalResult::empty(StrategyKind::GraphAware));
        }
        self.adapters.ensure(&self.required_adapters())?;

        let items = self.ranked(query, ctx, opts).await?;
        let (answer, critique) = match (opts.generate_answer, self.adapters.llm.as_ref()) {
            (true, Some(llm)) => synthesize(llm, ctx, &items, opts).await?,
            _ => (None, None),
        };

        Ok(RetrievalResult {
            items,
            answer,
            strategy: StrategyKind::GraphAware,
            timing_ms: elapsed_ms(started),
            critique,
        })
    }

    async fn retrieve_items(
        &self,
        query: &str,
        ctx: &RequestContext,
        opts: &RetrievalOptions,
    ) -> Result<Vec<ScoredItem>, RagError> {
        if !ensure_active(ctx)? {
            return Ok(Vec::new());
        }
        self.adapters.ensure(&self.required_adapters())?;
        self.ranked(query, ctx, opts).await
    }
}

/// Graph-derived candidates for `query`, best first.
pub(crate) fn graph_items(
    snapshot: &GraphSnapshot,
    query: &str,
    mode: GraphMode,
    detect: &DetectOptions,
    rrf_k: usize,
) -> Vec<ScoredItem> {
    let terms = lexical::terms(query);
    match mode {
        GraphMode::Local => local_items(snapshot, &terms),
        GraphMode::Global => global_items(snapshot, &terms, detect),
        GraphMode::Hybrid => fuse(
            &[
                ("local", local_items(snapshot, &terms)),
                ("global", global_items(snapshot, &terms, detect)),
            ],
            rrf_k,
        ),
    }
}

/// Entities mentioned by the query, then their direct neighbours.
fn local_items(snapshot: &GraphSnapshot, terms: &HashSet<String>) -> Vec<ScoredItem> {
    let mut seeds: Vec<(&GraphNode, f64)> = snapshot
        .nodes()
        .map(|node| (node, lexical::coverage(terms, &describe(node))))
        .filter(|(_, score)| *score > 0.0)
        .collect();
    seeds.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.id.cmp(&b.0.id))
    });

    let mut seen: HashSet<&str> = seeds.iter().map(|(node, _)| node.id.as_str()).collect();
    let mut items: Vec<ScoredItem> = seeds
        .iter()
        .map(|(node, score)| entity_item(node, *score, "seed"))
        .collect();

    for (seed, score) in &seeds {
        for neighbour in snapshot.neighbors(&seed.id) {
            if !seen.insert(neighbour) {
                continue;
            }
            if let Some(node) = snapshot.node(neighbour) {
                items.push(entity_item(node, score * NEIGHBOUR_DECAY, "neighbour"));
            }
        }
    }
    items
}

/// Community summaries ranked by overlap with the query.
///
/// When nothing overlaps, every community is returned largest first so
/// broad questions still see the graph's main themes.
fn global_items(
    snapshot: &GraphSnapshot,
    terms: &HashSet<String>,
    detect: &DetectOptions,
) -> Vec<ScoredItem> {
    let mut scored: Vec<(String, Vec<String>, String, f64)> = communities(snapshot, detect)
        .into_iter()
        .map(|(label, members)| {
            let summary = members
                .iter()
                .filter_map(|id| snapshot.node(id))
                .map(describe)
                .collect::<Vec<_>>()
                .join("\n");
            let score = lexical::coverage(terms, &summary);
            (label, members, summary, score)
        })
        .collect();

    if scored.iter().any(|(_, _, _, score)| *score > 0.0) {
        scored.retain(|(_, _, _, score)| *score > 0.0);
    }
    scored.sort_by(|a, b| {
        b.3.partial_cmp(&a.3)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.1.len().cmp(&a.1.len()))
            .then_with(|| a.0.cmp(&b.0))
    });

    scored
        .into_iter()
        .map(|(label, members, summary, score)| {
            ScoredItem::new(format!("community:{}", label), summary, score)
                .with_metadata("source", json!("graph"))
                .with_metadata("kind", json!("community"))
                .with_metadata("members", json!(members))
        })
        .collect()
}

fn describe(node: &GraphNode) -> String {
    if node.description.is_empty() {
        node.name.clone()
    } else {
        format!("{}: {}", node.name, node.description)
    }
}

fn entity_item(node: &GraphNode, score: f64, relation: &str) -> ScoredItem {
    ScoredItem::new(format!("entity:{}", node.id), describe(node), score)
        .with_metadata("source", json!("graph"))
        .with_metadata("kind", json!("entity"))
        .with_metadata("entity_id", json!(node.id))
        .with_metadata("relation", json!(relation))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::strategy::testing::{corpus, knowledge_graph, JudgeLlm, VowelEmbedder};

    fn options(mode: GraphMode) -> RetrievalOptions {
        RetrievalOptions {
            index_id: "docs".into(),
            graph_id: "kg".into(),
            graph_mode: mode,
            ..Default::default()
        }
    }

    fn ids(items: &[ScoredItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    fn adapters() -> Adapters {
        Adapters::new()
            .with_embedder(Arc::new(VowelEmbedder::default()))
            .with_vector_store(Arc::new(corpus()))
            .with_graph_store(Arc::new(knowledge_graph()))
    }

    #[tokio::test]
    async fn local_mode_returns_matched_entities_and_neighbours() {
        let strategy = GraphAware::new(adapters());
        let result = strategy
            .retrieve("Elixir", &RequestContext::new("Elixir"), &options(GraphMode::Local))
            .await
            .unwrap();

        let found = ids(&result.items);
        assert!(found.contains(&"entity:elixir"));
        assert!(found.contains(&"entity:beam"));
        assert!(found.contains(&"entity:otp"));
        assert!(!found.contains(&"entity:go"));
        assert!(found.contains(&"d1"));
        assert!(result.answer.is_none());
        assert_eq!(result.strategy, StrategyKind::GraphAware);
    }

    #[test]
    fn local_seeds_outrank_neighbours() {
        let graph = GraphSnapshot::from_parts(
            vec![
                GraphNode::new("elixir").with_description("Elixir", "language"),
                GraphNode::new("beam").with_description("BEAM", "virtual machine"),
            ],
            vec![("elixir".into(), "beam".into())],
        );
        let items = local_items(&graph, &lexical::terms("elixir"));
        assert_eq!(ids(&items), vec!["entity:elixir", "entity:beam"]);
        assert_eq!(items[1].score, items[0].score * NEIGHBOUR_DECAY);
        assert_eq!(items[1].metadata["relation"], json!("neighbour"));
    }

    #[tokio::test]
    async fn global_mode_ranks_community_summaries() {
        let strategy = GraphAware::new(adapters());
        let result = strategy
            .retrieve(
                "virtual machine",
                &RequestContext::new("virtual machine"),
                &options(GraphMode::Global),
            )
            .await
            .unwrap();

        let found = ids(&result.items);
        assert!(found.contains(&"community:elixir"));
        assert!(!found.contains(&"community:goroutine"));
        let community = result
            .items
            .iter()
            .find(|i| i.id == "community:elixir")
            .unwrap();
        assert_eq!(community.metadata["members"], json!(["beam", "elixir", "otp"]));
    }

    #[test]
    fn global_mode_without_overlap_lists_largest_first() {
        let graph = GraphSnapshot::from_parts(
            Vec::new(),
            vec![
                ("a".into(), "b".into()),
                ("x".into(), "y".into()),
                ("y".into(), "z".into()),
                ("x".into(), "z".into()),
            ],
        );
        let items = global_items(&graph, &lexical::terms("unrelated"), &DetectOptions::default());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].metadata["members"], json!(["x", "y", "z"]));
    }

    #[tokio::test]
    async fn hybrid_mode_with_llm_synthesises_answer() {
        let llm = Arc::new(JudgeLlm::new(true));
        let strategy = GraphAware::new(adapters().with_llm(llm.clone()));
        let result = strategy
            .retrieve("Elixir BEAM", &RequestContext::new("Elixir BEAM"), &options(GraphMode::Hybrid))
            .await
            .unwrap();

        assert!(result.answer.is_some());
        assert_eq!(result.critique.map(|c| c.grounded), Some(true));
        let found = ids(&result.items);
        assert!(found.contains(&"entity:elixir"));
        assert!(found.contains(&"community:elixir"));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_request_skips_graph_and_llm() {
        let llm = Arc::new(JudgeLlm::new(true));
        let embedder = Arc::new(VowelEmbedder::default());
        let strategy = GraphAware::new(
            Adapters::new()
                .with_embedder(embedder.clone())
                .with_vector_store(Arc::new(corpus()))
                .with_graph_store(Arc::new(knowledge_graph()))
                .with_llm(llm.clone()),
        );
        let ctx = RequestContext::new("Elixir").fail(RagError::Timeout);

        let err = strategy
            .retrieve("Elixir", &ctx, &options(GraphMode::Hybrid))
            .await
            .unwrap_err();
        assert_eq!(err, RagError::Timeout);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_graph_store_fails_without_calls() {
        let embedder = Arc::new(VowelEmbedder::default());
        let store = Arc::new(corpus());
        let strategy = GraphAware::new(
            Adapters::new()
                .with_embedder(embedder.clone())
                .with_vector_store(store.clone()),
        );
        let err = strategy
            .retrieve("q", &RequestContext::new("q"), &options(GraphMode::Local))
            .await
            .unwrap_err();

        assert_eq!(err, RagError::AdapterUnavailable("graph_store".into()));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert!(store.searches.lock().unwrap().is_empty());
    }
}
