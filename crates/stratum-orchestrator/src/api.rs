use crate::health::{HealthMonitor, HealthReport, DEFAULT_SAMPLE_INTERVAL};
use crate::orchestrator::LayerOrchestrator;
use crate::rename::{ApplyReport, FsFileStore, RenameExecutor, RenamePlan, RollbackPlan};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use stratum_core::{
    AstProvider, CodeMatch, Concept, ConceptChange, ConceptStore, FileStore, Layer,
    LayerPayload, MatchKind, OperationKind, Relation, Request, Result, SourceLocation,
    StratumConfig, TextSearchProvider,
};
use stratum_layers::{
    AstAnalysisLayer, ConceptGraphLayer, FastSearchLayer, KnowledgePropagationLayer,
    PatternLearnerLayer,
};
use stratum_propagation::{dependency_health, detect_cycles, PropagationEngine};
pub use stratum_propagation::{Cycle, CycleSeverity, DependencyHealth, PropagationSuggestion};
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionResponse {
    pub definitions: Vec<CodeMatch>,
    pub confidence: f64,
    pub layers_used: Vec<String>,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceResponse {
    pub references: Vec<CodeMatch>,
    pub confidence: f64,
    pub layers_used: Vec<String>,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub report: ApplyReport,
    /// Follow-up suggestions derived from the applied change. Empty when
    /// the apply failed or propagation could not run.
    pub suggestions: Vec<PropagationSuggestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyReport {
    pub direct: Vec<Relation>,
    pub transitive: Option<Vec<Relation>>,
    pub cycles: Option<Vec<Cycle>>,
    /// `None` when the target has no recorded concept.
    pub health: Option<DependencyHealth>,
}

/// The crate's front door: wires the five layers into the orchestrator and
/// exposes the analysis operations.
pub struct Stratum {
    orchestrator: LayerOrchestrator,
    store: Arc<dyn ConceptStore>,
    patterns: Arc<PatternLearnerLayer>,
    propagation: PropagationEngine,
    executor: RenameExecutor,
}

impl Stratum {
    pub fn new(
        config: StratumConfig,
        search: Arc<dyn TextSearchProvider>,
        ast: Arc<dyn AstProvider>,
        store: Arc<dyn ConceptStore>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        let patterns = Arc::new(PatternLearnerLayer::new());
        let layers: Vec<Arc<dyn Layer>> = vec![
            Arc::new(FastSearchLayer::new(search)),
            Arc::new(AstAnalysisLayer::new(ast)),
            Arc::new(ConceptGraphLayer::new(store.clone())),
            patterns.clone(),
            Arc::new(KnowledgePropagationLayer::new(store.clone())),
        ];
        let orchestrator = LayerOrchestrator::new(config, layers);
        Self {
            orchestrator,
            store: store.clone(),
            patterns,
            propagation: PropagationEngine::new(store),
            executor: RenameExecutor::new(files),
        }
    }

    /// Convenience constructor for workspace-file-backed usage.
    pub fn with_fs_files(
        config: StratumConfig,
        search: Arc<dyn TextSearchProvider>,
        ast: Arc<dyn AstProvider>,
        store: Arc<dyn ConceptStore>,
    ) -> Self {
        Self::new(config, search, ast, store, Arc::new(FsFileStore))
    }

    pub fn orchestrator(&self) -> &LayerOrchestrator {
        &self.orchestrator
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        self.orchestrator.health()
    }

    /// Start the cache sweeper and the periodic health sampler.
    pub fn spawn_maintenance(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        let config = self.orchestrator.config();
        if config.cache.enabled {
            handles.push(
                self.orchestrator
                    .cache()
                    .spawn_sweeper(config.cache.sweep_interval()),
            );
        }
        handles.push(self.orchestrator.health().spawn(DEFAULT_SAMPLE_INTERVAL));
        handles
    }

    pub async fn find_definition(
        &self,
        identifier: &str,
        location: Option<SourceLocation>,
    ) -> Result<DefinitionResponse> {
        let request = Request::with_options(
            OperationKind::Definition,
            identifier,
            location,
            None,
            Request::DEFAULT_LIMIT,
        )?;
        let result = self.orchestrator.execute(&request).await?;
        let mut definitions: Vec<CodeMatch> = result
            .payload
            .matches()
            .iter()
            .filter(|m| m.kind == MatchKind::Definition)
            .cloned()
            .collect();
        if definitions.is_empty() {
            // Nothing definition-shaped; surface the best guesses instead.
            definitions = result.payload.matches().to_vec();
        }
        definitions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        definitions.truncate(request.limit);
        Ok(DefinitionResponse {
            definitions,
            confidence: result.confidence,
            layers_used: result.layers_used,
            cache_hit: result.cache_hit,
        })
    }

    pub async fn find_references(
        &self,
        identifier: &str,
        location: Option<SourceLocation>,
        scope: Option<String>,
    ) -> Result<ReferenceResponse> {
        let request = Request::with_options(
            OperationKind::Reference,
            identifier,
            location,
            scope,
            Request::DEFAULT_LIMIT,
        )?;
        let result = self.orchestrator.execute(&request).await?;
        let mut references = result.payload.matches().to_vec();
        references.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        references.truncate(request.limit);
        Ok(ReferenceResponse {
            references,
            confidence: result.confidence,
            layers_used: result.layers_used,
            cache_hit: result.cache_hit,
        })
    }

    /// Preview a rename. No file is modified.
    pub async fn plan_rename(
        &self,
        old: &str,
        new: &str,
        scope: Option<String>,
    ) -> Result<RenamePlan> {
        if new.trim().is_empty() {
            return Err(stratum_core::StratumError::Validation(
                "replacement name must not be empty".into(),
            ));
        }
        let request = Request::with_options(
            OperationKind::Rename,
            old,
            None,
            scope,
            Request::DEFAULT_LIMIT,
        )?;
        let result = self.orchestrator.execute(&request).await?;
        Ok(RenamePlan::build(old, new, result.payload.matches()))
    }

    /// Execute a previewed plan. On a completed apply the change is recorded
    /// in the concept store and propagated; neither step can fail the rename.
    pub async fn apply_rename(&self, plan: &RenamePlan) -> Result<ApplyOutcome> {
        let report = self.executor.apply(plan).await?;
        let mut suggestions = Vec::new();
        if report.completed {
            let change = ConceptChange::rename(&plan.old, &plan.old, &plan.new);
            if let Err(err) = self.store.record_change(change.clone()).await {
                warn!(error = %err, "failed to record rename in concept store");
            }
            match self
                .propagation
                .propagate_change(&change, &self.patterns.active_patterns())
                .await
            {
                Ok(found) => suggestions = found,
                Err(err) => warn!(error = %err, "propagation failed after rename"),
            }
        }
        Ok(ApplyOutcome {
            report,
            suggestions,
        })
    }

    pub async fn rollback(&self, plan: &RollbackPlan) -> Result<()> {
        self.executor.rollback(plan).await
    }

    pub async fn analyze_dependencies(
        &self,
        target: &str,
        detect_cycles_flag: bool,
        include_transitive: bool,
    ) -> Result<DependencyReport> {
        let request = Request::new(OperationKind::DependencyAnalysis, target)?;
        let result = self.orchestrator.execute(&request).await?;
        let direct = match result.payload {
            LayerPayload::Dependencies { relations } => relations,
            _ => Vec::new(),
        };

        let Some(origin) = self.store.find_concept(target).await? else {
            return Ok(DependencyReport {
                direct,
                transitive: include_transitive.then(Vec::new),
                cycles: detect_cycles_flag.then(Vec::new),
                health: None,
            });
        };

        let concepts: HashMap<_, Concept> = self
            .store
            .all_concepts()
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let origin_relations = self.store.relationships_of(origin.id).await?;
        let health = Some(dependency_health(&origin, &origin_relations, &concepts));

        let transitive = if include_transitive {
            Some(self.transitive_relations(origin.id, &origin_relations).await?)
        } else {
            None
        };

        let cycles = if detect_cycles_flag {
            let mut adjacency: HashMap<_, Vec<_>> = HashMap::new();
            for concept in concepts.values() {
                for relation in self.store.relationships_of(concept.id).await? {
                    adjacency
                        .entry(relation.source)
                        .or_default()
                        .push(relation.target);
                }
            }
            for targets in adjacency.values_mut() {
                targets.sort_unstable();
                targets.dedup();
            }
            Some(detect_cycles(&adjacency, origin.id))
        } else {
            None
        };

        Ok(DependencyReport {
            direct,
            transitive,
            cycles,
            health,
        })
    }

    pub async fn get_health(&self) -> HealthReport {
        self.orchestrator.health().report().await
    }

    /// Relations one hop past the direct neighborhood.
    async fn transitive_relations(
        &self,
        origin: stratum_core::ConceptId,
        direct: &[Relation],
    ) -> Result<Vec<Relation>> {
        let mut seen_edges: HashSet<(stratum_core::ConceptId, stratum_core::ConceptId)> = direct
            .iter()
            .map(|r| (r.source, r.target))
            .collect();
        let mut out = Vec::new();
        let mut frontier: VecDeque<stratum_core::ConceptId> = direct
            .iter()
            .map(|r| if r.source == origin { r.target } else { r.source })
            .collect();
        let mut visited: HashSet<_> = HashSet::from([origin]);

        while let Some(node) = frontier.pop_front() {
            if !visited.insert(node) {
                continue;
            }
            for relation in self.store.relationships_of(node).await? {
                if seen_edges.insert((relation.source, relation.target)) {
                    out.push(relation);
                }
            }
        }
        Ok(out)
    }
}
