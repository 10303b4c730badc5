use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use stratum_core::{
    CodeMatch, Concept, ConceptId, ConceptStore, Layer, LayerKind, LayerPayload, LayerResult,
    MatchKind, OperationKind, Relation, Request, Result,
};
use tracing::debug;

const RELATED_CONFIDENCE: f64 = 0.6;
const NOTHING_FOUND_CONFIDENCE: f64 = 0.2;
const MAX_HOPS: u32 = 2;

/// Layer 5: the most expensive lens. Walks the relation graph around the
/// resolved concept to surface indirect references that no textual or
/// syntactic layer can see.
pub struct KnowledgePropagationLayer {
    store: Arc<dyn ConceptStore>,
}

impl KnowledgePropagationLayer {
    pub fn new(store: Arc<dyn ConceptStore>) -> Self {
        Self { store }
    }

    /// Iterative BFS out to `MAX_HOPS`, tracking the product of relation
    /// confidences along the strongest path to each node.
    async fn related_within_hops(
        &self,
        origin: ConceptId,
    ) -> Result<HashMap<ConceptId, f64>> {
        let mut best: HashMap<ConceptId, f64> = HashMap::new();
        let mut visited: HashSet<ConceptId> = HashSet::new();
        let mut queue: VecDeque<(ConceptId, u32, f64)> = VecDeque::new();
        visited.insert(origin);
        queue.push_back((origin, 0, 1.0));

        while let Some((current, hops, path_confidence)) = queue.pop_front() {
            if hops >= MAX_HOPS {
                continue;
            }
            for relation in self.store.relationships_of(current).await? {
                let next = other_end(&relation, current);
                let next_confidence = path_confidence * relation.confidence;
                let entry = best.entry(next).or_insert(0.0);
                if next_confidence > *entry {
                    *entry = next_confidence;
                }
                if visited.insert(next) {
                    queue.push_back((next, hops + 1, next_confidence));
                }
            }
        }
        best.remove(&origin);
        Ok(best)
    }

    fn to_match(concept: &Concept, path_confidence: f64) -> Option<CodeMatch> {
        let path = concept.module_path()?;
        let line = concept
            .metadata
            .get("line")
            .and_then(|l| l.parse::<u32>().ok())
            .unwrap_or(0);
        Some(CodeMatch {
            uri: path.to_string(),
            line,
            character: 0,
            excerpt: concept.name.clone(),
            kind: MatchKind::Fuzzy,
            confidence: RELATED_CONFIDENCE * path_confidence,
        })
    }
}

fn other_end(relation: &Relation, from: ConceptId) -> ConceptId {
    if relation.source == from {
        relation.target
    } else {
        relation.source
    }
}

#[async_trait]
impl Layer for KnowledgePropagationLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::KnowledgePropagation
    }

    async fn process(
        &self,
        request: &Request,
        _prior: Option<&LayerResult>,
    ) -> Result<LayerResult> {
        let started = Instant::now();

        let Some(origin) = self.store.find_concept(&request.identifier).await? else {
            return Ok(LayerResult::step(
                self.kind(),
                LayerPayload::Empty,
                NOTHING_FOUND_CONFIDENCE,
                started.elapsed(),
            ));
        };

        let related = self.related_within_hops(origin.id).await?;
        let concepts = self.store.all_concepts().await?;
        let mut matches: Vec<CodeMatch> = concepts
            .iter()
            .filter_map(|c| related.get(&c.id).and_then(|conf| Self::to_match(c, *conf)))
            .collect();
        matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        matches.truncate(request.limit);

        let confidence = if matches.is_empty() {
            NOTHING_FOUND_CONFIDENCE
        } else {
            RELATED_CONFIDENCE
        };
        debug!(
            identifier = %request.identifier,
            related = related.len(),
            located = matches.len(),
            "knowledge propagation completed"
        );

        let payload = if matches.is_empty() {
            LayerPayload::Empty
        } else {
            match request.operation {
                OperationKind::Definition => LayerPayload::Definitions { matches },
                OperationKind::Reference => LayerPayload::References { matches },
                OperationKind::Rename => LayerPayload::RenameCandidates { matches },
                OperationKind::DependencyAnalysis => LayerPayload::Empty,
            }
        };

        Ok(LayerResult::step(
            self.kind(),
            payload,
            confidence,
            started.elapsed(),
        ))
    }
}
