use crate::rules::{apply_best_pattern, PropagationRule};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use stratum_core::{
    Concept, ConceptChange, ConceptId, ConceptStore, NamePattern, Relation, Result,
};
use tracing::{debug, info};

/// Concepts discovered below this raw confidence never become suggestions.
pub const CONFIDENCE_FLOOR: f64 = 0.2;
/// A suggestion this certain may be applied without human review.
pub const AUTO_APPLY_THRESHOLD: f64 = 0.9;
/// Accepted suggestions above this confidence feed the co-change history.
const CO_CHANGE_LEARN_THRESHOLD: f64 = 0.8;
/// Direct relations this strong fall back to proposing the identical new
/// value when no template or rule produced one.
const IDENTITY_FALLBACK_THRESHOLD: f64 = 0.8;
pub const MAX_SUGGESTIONS: usize = 20;

const DIRECT_WEIGHT: f64 = 1.0;
const CO_CHANGE_WEIGHT: f64 = 0.8;
const SAME_MODULE_WEIGHT: f64 = 0.6;
const PATTERN_WEIGHT: f64 = 0.7;

/// Co-change counts saturate here when normalized to [0, 0.9].
const CO_CHANGE_SATURATION: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationReason {
    DirectRelation,
    CoChangeHistory,
    SameModule,
    PatternMatch,
}

impl PropagationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropagationReason::DirectRelation => "direct-relation",
            PropagationReason::CoChangeHistory => "co-change-history",
            PropagationReason::SameModule => "same-module",
            PropagationReason::PatternMatch => "pattern-match",
        }
    }
}

/// One ranked change-propagation suggestion. Transient per request; nothing
/// is persisted unless the caller applies it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationSuggestion {
    pub target: Concept,
    pub proposed_value: String,
    pub confidence: f64,
    pub reason: PropagationReason,
    /// Ordered node ids from the changed concept to the target.
    pub path: Vec<ConceptId>,
    pub auto_apply: bool,
    pub evidence: Vec<String>,
}

/// Everything a propagation pass looks at, gathered up front.
pub struct PropagationContext {
    pub origin: Concept,
    /// Strongest path confidence to every concept within two hops.
    pub two_hop: HashMap<ConceptId, f64>,
    pub recent_changes: Vec<ConceptChange>,
    pub active_patterns: Vec<NamePattern>,
}

struct AffectedConcept {
    concept: Concept,
    reason: PropagationReason,
    confidence: f64,
    evidence: Vec<String>,
}

/// Walks the concept relationship graph to turn one accepted change into a
/// ranked set of follow-up suggestions. Shared process-wide; the co-change
/// history map is safe under concurrent requests.
pub struct PropagationEngine {
    store: Arc<dyn ConceptStore>,
    co_change: DashMap<(ConceptId, ConceptId), u32>,
    rules: Vec<PropagationRule>,
}

impl PropagationEngine {
    pub fn new(store: Arc<dyn ConceptStore>) -> Self {
        Self {
            store,
            co_change: DashMap::new(),
            rules: PropagationRule::DEFAULTS.to_vec(),
        }
    }

    pub fn record_co_change(&self, source: ConceptId, target: ConceptId) {
        *self.co_change.entry((source, target)).or_insert(0) += 1;
    }

    pub fn co_change_count(&self, source: ConceptId, target: ConceptId) -> u32 {
        self.co_change
            .get(&(source, target))
            .map(|c| *c)
            .unwrap_or(0)
    }

    /// Produce ranked suggestions for an accepted change. An identifier with
    /// no recorded concept yields an empty list; that is a fact about the
    /// graph, not an error.
    pub async fn propagate_change(
        &self,
        change: &ConceptChange,
        active_patterns: &[NamePattern],
    ) -> Result<Vec<PropagationSuggestion>> {
        let Some(context) = self.build_context(change, active_patterns).await? else {
            debug!(identifier = %change.identifier, "no concept for changed identifier");
            return Ok(Vec::new());
        };

        let affected = self.find_affected(&context).await?;
        let mut suggestions = Vec::new();
        for candidate in affected {
            let path = vec![context.origin.id, candidate.concept.id];
            let Some(proposed_value) =
                self.derive_value(&context, &candidate, &change.old_value, &change.new_value)
            else {
                continue;
            };
            let auto_apply = candidate.confidence >= AUTO_APPLY_THRESHOLD;
            suggestions.push(PropagationSuggestion {
                target: candidate.concept,
                proposed_value,
                confidence: candidate.confidence,
                reason: candidate.reason,
                path,
                auto_apply,
                evidence: candidate.evidence,
            });
        }

        suggestions.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.auto_apply.cmp(&a.auto_apply))
                .then_with(|| b.evidence.len().cmp(&a.evidence.len()))
        });
        suggestions.truncate(MAX_SUGGESTIONS);

        // Accepted history feeds the next propagation.
        for suggestion in &suggestions {
            if suggestion.auto_apply || suggestion.confidence > CO_CHANGE_LEARN_THRESHOLD {
                self.record_co_change(context.origin.id, suggestion.target.id);
            }
        }

        info!(
            identifier = %change.identifier,
            suggestions = suggestions.len(),
            "propagation completed"
        );
        Ok(suggestions)
    }

    async fn build_context(
        &self,
        change: &ConceptChange,
        active_patterns: &[NamePattern],
    ) -> Result<Option<PropagationContext>> {
        let Some(origin) = self.store.find_concept(&change.identifier).await? else {
            return Ok(None);
        };
        let two_hop = self.two_hop_confidences(origin.id).await?;
        let recent_changes = self
            .store
            .recent_changes(Utc::now() - ChronoDuration::hours(24))
            .await?;
        Ok(Some(PropagationContext {
            origin,
            two_hop,
            recent_changes,
            active_patterns: active_patterns.to_vec(),
        }))
    }

    /// Iterative BFS; strongest-path confidence per reachable node.
    async fn two_hop_confidences(&self, origin: ConceptId) -> Result<HashMap<ConceptId, f64>> {
        let mut best: HashMap<ConceptId, f64> = HashMap::new();
        let mut visited: HashSet<ConceptId> = HashSet::from([origin]);
        let mut queue: VecDeque<(ConceptId, u32, f64)> = VecDeque::from([(origin, 0, 1.0)]);

        while let Some((current, hops, path_confidence)) = queue.pop_front() {
            if hops >= 2 {
                continue;
            }
            for relation in self.store.relationships_of(current).await? {
                let next = other_end(&relation, current);
                let confidence = path_confidence * relation.confidence;
                let entry = best.entry(next).or_insert(0.0);
                if confidence > *entry {
                    *entry = confidence;
                }
                if visited.insert(next) {
                    queue.push_back((next, hops + 1, confidence));
                }
            }
        }
        best.remove(&origin);
        Ok(best)
    }

    /// Four independent sources, each with a reason-specific weight. A
    /// concept found by several sources keeps the first reason found.
    async fn find_affected(&self, context: &PropagationContext) -> Result<Vec<AffectedConcept>> {
        let concepts: HashMap<ConceptId, Concept> = self
            .store
            .all_concepts()
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let relations = self.store.relationships_of(context.origin.id).await?;

        let mut affected: Vec<AffectedConcept> = Vec::new();
        let mut seen: HashSet<ConceptId> = HashSet::from([context.origin.id]);
        let push = |affected: &mut Vec<AffectedConcept>,
                    seen: &mut HashSet<ConceptId>,
                    concept: &Concept,
                    reason: PropagationReason,
                    confidence: f64,
                    evidence: Vec<String>| {
            if confidence < CONFIDENCE_FLOOR || !seen.insert(concept.id) {
                return;
            }
            affected.push(AffectedConcept {
                concept: concept.clone(),
                reason,
                confidence: confidence.min(1.0),
                evidence,
            });
        };

        // 1. Direct graph relations.
        for relation in &relations {
            let other = other_end(relation, context.origin.id);
            if let Some(concept) = concepts.get(&other) {
                push(
                    &mut affected,
                    &mut seen,
                    concept,
                    PropagationReason::DirectRelation,
                    relation.confidence * DIRECT_WEIGHT,
                    vec![format!(
                        "direct relation '{}' with confidence {:.2}",
                        relation.kind, relation.confidence
                    )],
                );
            }
        }

        // 2. Historical co-change frequency, normalized to [0, 0.9].
        for entry in self.co_change.iter() {
            let (source, target) = *entry.key();
            if source != context.origin.id {
                continue;
            }
            let Some(concept) = concepts.get(&target) else {
                continue;
            };
            let frequency = (*entry.value() as f64 / CO_CHANGE_SATURATION).min(0.9);
            let mut evidence = vec![format!("co-changed {} times", entry.value())];
            let recent = context
                .recent_changes
                .iter()
                .filter(|c| c.identifier == concept.name)
                .count();
            if recent > 0 {
                evidence.push(format!("{} related changes in the last 24h", recent));
            }
            push(
                &mut affected,
                &mut seen,
                concept,
                PropagationReason::CoChangeHistory,
                frequency * CO_CHANGE_WEIGHT,
                evidence,
            );
        }

        // 3. Same-module membership, by path-prefix heuristic.
        if let Some(module) = parent_dir(context.origin.module_path()) {
            for concept in concepts.values() {
                if parent_dir(concept.module_path()) == Some(module) {
                    push(
                        &mut affected,
                        &mut seen,
                        concept,
                        PropagationReason::SameModule,
                        concept.confidence * SAME_MODULE_WEIGHT,
                        vec![format!("same module '{}'", module)],
                    );
                }
            }
        }

        // 4. Learned pattern templates.
        for pattern in &context.active_patterns {
            let Some(variant) = pattern.apply(&context.origin.name) else {
                continue;
            };
            for concept in concepts.values() {
                if concept.name == variant {
                    push(
                        &mut affected,
                        &mut seen,
                        concept,
                        PropagationReason::PatternMatch,
                        concept.confidence * PATTERN_WEIGHT * pattern.confidence,
                        vec![format!(
                            "matches pattern '{}' (confidence {:.2})",
                            pattern.template, pattern.confidence
                        )],
                    );
                }
            }
        }

        Ok(affected)
    }

    /// Suggested replacement value, in priority order: learned pattern
    /// template, then rule transform, then the identical new value for
    /// strong direct relations. No value, no suggestion.
    fn derive_value(
        &self,
        context: &PropagationContext,
        candidate: &AffectedConcept,
        old: &str,
        new: &str,
    ) -> Option<String> {
        if let Some(value) =
            apply_best_pattern(&context.active_patterns, &candidate.concept.name, old, new)
        {
            return Some(value);
        }
        for rule in &self.rules {
            if let Some(value) = rule.transform(&candidate.concept.name, old, new) {
                return Some(value);
            }
        }
        if candidate.reason == PropagationReason::DirectRelation
            && candidate.confidence > IDENTITY_FALLBACK_THRESHOLD
        {
            return Some(new.to_string());
        }
        None
    }
}

fn other_end(relation: &Relation, from: ConceptId) -> ConceptId {
    if relation.source == from {
        relation.target
    } else {
        relation.source
    }
}

fn parent_dir(path: Option<&str>) -> Option<&str> {
    path.and_then(|p| p.rsplit_once('/').map(|(dir, _)| dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{ConceptKind, RelationKind};
    use stratum_layers::testing::InMemoryConceptStore;

    fn located(name: &str, path: &str, confidence: f64) -> Concept {
        let mut c = Concept::new(name, ConceptKind::Struct, confidence);
        c.metadata.insert("path".into(), path.into());
        c
    }

    async fn engine_with(
        concepts: Vec<Concept>,
        relations: Vec<Relation>,
    ) -> (PropagationEngine, Arc<InMemoryConceptStore>) {
        let store = Arc::new(InMemoryConceptStore::default());
        for c in concepts {
            store.save_concept(c).await.unwrap();
        }
        for r in relations {
            store.save_relationship(r).await.unwrap();
        }
        (PropagationEngine::new(store.clone()), store)
    }

    #[tokio::test]
    async fn direct_relation_with_embedded_name_is_suggested() {
        let origin = located("Widget", "src/ui/widget.rs", 0.9);
        let factory = located("WidgetFactory", "src/factory/factory.rs", 0.9);
        let relation = Relation::new(origin.id, factory.id, RelationKind::Uses, 0.95);
        let (engine, _) = engine_with(vec![origin, factory], vec![relation]).await;

        let change = ConceptChange::rename("Widget", "Widget", "Gadget");
        let suggestions = engine.propagate_change(&change, &[]).await.unwrap();

        assert_eq!(suggestions.len(), 1);
        let s = &suggestions[0];
        assert_eq!(s.target.name, "WidgetFactory");
        assert_eq!(s.proposed_value, "GadgetFactory");
        assert_eq!(s.reason, PropagationReason::DirectRelation);
        assert_eq!(s.path.len(), 2);
        assert!((s.confidence - 0.95).abs() < 1e-9);
        assert!(s.auto_apply);
    }

    #[tokio::test]
    async fn low_confidence_concepts_never_surface() {
        let origin = located("Widget", "src/ui/widget.rs", 0.9);
        let weak = located("WidgetHelper", "src/util/helper.rs", 0.9);
        // 0.15 raw confidence after weighting sits under the floor.
        let relation = Relation::new(origin.id, weak.id, RelationKind::Uses, 0.15);
        let (engine, _) = engine_with(vec![origin, weak.clone()], vec![relation]).await;

        let change = ConceptChange::rename("Widget", "Widget", "Gadget");
        let suggestions = engine.propagate_change(&change, &[]).await.unwrap();
        assert!(suggestions.iter().all(|s| s.target.id != weak.id));
    }

    #[tokio::test]
    async fn unknown_identifier_yields_empty_list() {
        let (engine, _) = engine_with(vec![], vec![]).await;
        let change = ConceptChange::rename("Ghost", "Ghost", "Phantom");
        assert!(engine.propagate_change(&change, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_reason_wins_on_dedup() {
        // `WidgetFactory` is both directly related and in the same module;
        // the direct relation is found first and keeps the slot.
        let origin = located("Widget", "src/ui/widget.rs", 0.9);
        let factory = located("WidgetFactory", "src/ui/factory.rs", 0.9);
        let relation = Relation::new(origin.id, factory.id, RelationKind::Uses, 0.9);
        let (engine, _) = engine_with(vec![origin, factory], vec![relation]).await;

        let change = ConceptChange::rename("Widget", "Widget", "Gadget");
        let suggestions = engine.propagate_change(&change, &[]).await.unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].reason, PropagationReason::DirectRelation);
    }

    #[tokio::test]
    async fn pattern_template_beats_rule_transform() {
        let origin = located("Widget", "src/ui/widget.rs", 0.9);
        let test = located("WidgetTest", "src/ui/widget_test.rs", 0.9);
        let relation = Relation::new(origin.id, test.id, RelationKind::Uses, 0.9);
        let (engine, _) = engine_with(vec![origin, test], vec![relation]).await;

        let patterns = vec![NamePattern::new("{}Test", 0.8)];
        let change = ConceptChange::rename("Widget", "Widget", "Gadget");
        let suggestions = engine.propagate_change(&change, &patterns).await.unwrap();
        assert_eq!(suggestions[0].proposed_value, "GadgetTest");
    }

    #[tokio::test]
    async fn same_module_members_are_found() {
        let origin = located("Widget", "src/ui/widget.rs", 0.9);
        let neighbor = located("WidgetPainter", "src/ui/painter.rs", 0.9);
        let (engine, _) = engine_with(vec![origin, neighbor], vec![]).await;

        let change = ConceptChange::rename("Widget", "Widget", "Gadget");
        let suggestions = engine.propagate_change(&change, &[]).await.unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].reason, PropagationReason::SameModule);
        assert_eq!(suggestions[0].proposed_value, "GadgetPainter");
        // 0.9 concept confidence * 0.6 module weight.
        assert!((suggestions[0].confidence - 0.54).abs() < 1e-9);
        assert!(!suggestions[0].auto_apply);
    }

    #[tokio::test]
    async fn accepted_suggestions_feed_co_change_history() {
        let origin = located("Widget", "src/ui/widget.rs", 0.9);
        let factory = located("WidgetFactory", "src/factory/mod.rs", 0.9);
        let (origin_id, factory_id) = (origin.id, factory.id);
        let relation = Relation::new(origin_id, factory_id, RelationKind::Uses, 0.95);
        let (engine, _) = engine_with(vec![origin, factory], vec![relation]).await;

        let change = ConceptChange::rename("Widget", "Widget", "Gadget");
        engine.propagate_change(&change, &[]).await.unwrap();
        assert_eq!(engine.co_change_count(origin_id, factory_id), 1);
    }

    #[tokio::test]
    async fn co_change_history_resurfaces_previously_linked_concepts() {
        let origin = located("Widget", "src/ui/widget.rs", 0.9);
        let distant = located("WidgetSpec", "docs/spec.rs", 0.9);
        let (origin_id, distant_id) = (origin.id, distant.id);
        let (engine, _) = engine_with(vec![origin, distant], vec![]).await;

        // Heavily co-changed in the past, even though no relation exists.
        for _ in 0..10 {
            engine.record_co_change(origin_id, distant_id);
        }

        let change = ConceptChange::rename("Widget", "Widget", "Gadget");
        let suggestions = engine.propagate_change(&change, &[]).await.unwrap();
        let s = suggestions
            .iter()
            .find(|s| s.target.id == distant_id)
            .expect("co-changed concept should surface");
        assert_eq!(s.reason, PropagationReason::CoChangeHistory);
        // Saturated frequency 0.9 * weight 0.8.
        assert!((s.confidence - 0.72).abs() < 1e-9);
    }

    #[tokio::test]
    async fn ranking_orders_by_confidence_then_auto_apply() {
        let origin = located("Widget", "src/ui/widget.rs", 0.9);
        let strong = located("WidgetFactory", "src/factory/mod.rs", 0.9);
        let weak = located("WidgetPainter", "src/ui/painter.rs", 0.5);
        let relations = vec![Relation::new(
            origin.id,
            strong.id,
            RelationKind::Uses,
            0.95,
        )];
        let (engine, _) = engine_with(vec![origin, strong, weak], relations).await;

        let change = ConceptChange::rename("Widget", "Widget", "Gadget");
        let suggestions = engine.propagate_change(&change, &[]).await.unwrap();
        assert!(suggestions.len() >= 2);
        assert!(suggestions[0].confidence >= suggestions[1].confidence);
        assert_eq!(suggestions[0].target.name, "WidgetFactory");
    }
}
