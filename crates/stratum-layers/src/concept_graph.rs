use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use stratum_core::{
    CodeMatch, Concept, ConceptStore, Layer, LayerKind, LayerPayload, LayerResult, MatchKind,
    OperationKind, Request, Result,
};
use tracing::debug;

/// Concept lookups are precise but second-hand; never report more certainty
/// than a direct AST hit would.
const CONCEPT_CONFIDENCE_CAP: f64 = 0.9;
const NOTHING_FOUND_CONFIDENCE: f64 = 0.2;

/// Layer 3: the persistent knowledge graph. Resolves the identifier to a
/// concept and turns stored relations into located hits and dependency facts.
pub struct ConceptGraphLayer {
    store: Arc<dyn ConceptStore>,
}

impl ConceptGraphLayer {
    pub fn new(store: Arc<dyn ConceptStore>) -> Self {
        Self { store }
    }

    /// A concept becomes a located match only when analysis recorded where it
    /// lives; an unlocated concept still contributes confidence to the chain.
    fn located_match(concept: &Concept, kind: MatchKind, confidence: f64) -> Option<CodeMatch> {
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
            kind,
            confidence,
        })
    }
}

#[async_trait]
impl Layer for ConceptGraphLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::ConceptGraph
    }

    async fn process(
        &self,
        request: &Request,
        _prior: Option<&LayerResult>,
    ) -> Result<LayerResult> {
        let started = Instant::now();

        let Some(concept) = self.store.find_concept(&request.identifier).await? else {
            debug!(identifier = %request.identifier, "no concept recorded");
            return Ok(LayerResult::step(
                self.kind(),
                LayerPayload::Empty,
                NOTHING_FOUND_CONFIDENCE,
                started.elapsed(),
            ));
        };

        let confidence = concept.confidence.min(CONCEPT_CONFIDENCE_CAP);
        let relations = self.store.relationships_of(concept.id).await?;
        debug!(
            identifier = %request.identifier,
            relations = relations.len(),
            confidence,
            "concept resolved"
        );

        let payload = match request.operation {
            OperationKind::DependencyAnalysis => LayerPayload::Dependencies { relations },
            OperationKind::Definition => {
                let matches = Self::located_match(&concept, MatchKind::Definition, confidence)
                    .into_iter()
                    .collect();
                LayerPayload::Definitions { matches }
            }
            OperationKind::Reference => {
                // Concepts on the far end of stored relations are likely
                // reference sites; surface the located ones.
                let mut matches = Vec::new();
                for relation in &relations {
                    let other = if relation.source == concept.id {
                        relation.target
                    } else {
                        relation.source
                    };
                    for candidate in self.store.all_concepts().await? {
                        if candidate.id == other {
                            if let Some(m) = Self::located_match(
                                &candidate,
                                MatchKind::Reference,
                                (confidence * relation.confidence).min(CONCEPT_CONFIDENCE_CAP),
                            ) {
                                matches.push(m);
                            }
                        }
                    }
                    if matches.len() >= request.limit {
                        break;
                    }
                }
                LayerPayload::References { matches }
            }
            OperationKind::Rename => {
                let matches = Self::located_match(&concept, MatchKind::Definition, confidence)
                    .into_iter()
                    .collect();
                LayerPayload::RenameCandidates { matches }
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
