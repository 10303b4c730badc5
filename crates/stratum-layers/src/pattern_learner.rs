use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use stratum_core::{
    CodeMatch, Layer, LayerKind, LayerPayload, LayerResult, MatchKind, NamePattern, OperationKind,
    Request, Result,
};
use tracing::debug;

const PATTERN_WEIGHT: f64 = 0.7;
const NOTHING_FOUND_CONFIDENCE: f64 = 0.2;
/// Patterns below this confidence are not considered active yet.
const ACTIVE_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone)]
struct LearnedPattern {
    occurrences: u32,
}

impl LearnedPattern {
    /// Laplace-style smoothing: one sighting is a hint, repetition is a rule.
    fn confidence(&self) -> f64 {
        self.occurrences as f64 / (self.occurrences as f64 + 2.0)
    }
}

/// Layer 4: learns naming patterns from the hits cheaper layers produce
/// (`CodeAnalyzer` ~ `CodeAnalyzerTest` teaches `{}Test`) and proposes
/// pattern-derived candidates on later requests. State accumulates for the
/// process lifetime.
pub struct PatternLearnerLayer {
    patterns: DashMap<String, LearnedPattern>,
}

impl PatternLearnerLayer {
    pub fn new() -> Self {
        Self {
            patterns: DashMap::new(),
        }
    }

    /// Patterns confident enough to act on, strongest first.
    pub fn active_patterns(&self) -> Vec<NamePattern> {
        let mut active: Vec<NamePattern> = self
            .patterns
            .iter()
            .map(|p| NamePattern::new(p.key().clone(), p.value().confidence()))
            .filter(|p| p.confidence >= ACTIVE_THRESHOLD)
            .collect();
        active.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        active
    }

    fn learn_from(&self, identifier: &str, prior: Option<&LayerResult>) {
        let Some(prior) = prior else { return };
        for m in prior.payload.matches() {
            for word in identifier_words(&m.excerpt) {
                if let Some(pattern) = NamePattern::infer(identifier, word) {
                    self.patterns
                        .entry(pattern.template)
                        .and_modify(|p| p.occurrences += 1)
                        .or_insert(LearnedPattern { occurrences: 1 });
                }
            }
        }
    }

    fn derive_candidates(
        &self,
        identifier: &str,
        prior: Option<&LayerResult>,
        limit: usize,
    ) -> Vec<CodeMatch> {
        let Some(prior) = prior else {
            return Vec::new();
        };
        let mut candidates = Vec::new();
        for pattern in self.active_patterns() {
            let Some(variant) = pattern.apply(identifier) else {
                continue;
            };
            for m in prior.payload.matches() {
                if identifier_words(&m.excerpt).any(|w| w == variant) {
                    candidates.push(CodeMatch {
                        uri: m.uri.clone(),
                        line: m.line,
                        character: m.character,
                        excerpt: m.excerpt.clone(),
                        kind: MatchKind::Fuzzy,
                        confidence: PATTERN_WEIGHT * pattern.confidence,
                    });
                    if candidates.len() >= limit {
                        return candidates;
                    }
                }
            }
        }
        candidates
    }
}

impl Default for PatternLearnerLayer {
    fn default() -> Self {
        Self::new()
    }
}

fn identifier_words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
}

#[async_trait]
impl Layer for PatternLearnerLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::PatternLearner
    }

    async fn process(
        &self,
        request: &Request,
        prior: Option<&LayerResult>,
    ) -> Result<LayerResult> {
        let started = Instant::now();

        self.learn_from(&request.identifier, prior);
        let matches = self.derive_candidates(&request.identifier, prior, request.limit);

        let confidence = matches
            .iter()
            .map(|m| m.confidence)
            .fold(NOTHING_FOUND_CONFIDENCE, f64::max);
        debug!(
            identifier = %request.identifier,
            known_patterns = self.patterns.len(),
            candidates = matches.len(),
            confidence,
            "pattern learner completed"
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
