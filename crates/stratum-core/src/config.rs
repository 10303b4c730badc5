use crate::types::{LayerKind, OperationKind};
use crate::{Result, StratumError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Per-layer switches and budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub timeout_ms: u64,
}

impl LayerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Budgets are generous multiples of each layer's latency target so a healthy
/// layer never trips them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSettings {
    #[serde(default = "LayerSettings::default_fast_search")]
    pub fast_search: LayerConfig,
    #[serde(default = "LayerSettings::default_ast_analysis")]
    pub ast_analysis: LayerConfig,
    #[serde(default = "LayerSettings::default_concept_graph")]
    pub concept_graph: LayerConfig,
    #[serde(default = "LayerSettings::default_pattern_learner")]
    pub pattern_learner: LayerConfig,
    #[serde(default = "LayerSettings::default_knowledge_propagation")]
    pub knowledge_propagation: LayerConfig,
}

impl LayerSettings {
    fn default_fast_search() -> LayerConfig {
        LayerConfig {
            enabled: true,
            timeout_ms: 50,
        }
    }

    fn default_ast_analysis() -> LayerConfig {
        LayerConfig {
            enabled: true,
            timeout_ms: 500,
        }
    }

    fn default_concept_graph() -> LayerConfig {
        LayerConfig {
            enabled: true,
            timeout_ms: 100,
        }
    }

    fn default_pattern_learner() -> LayerConfig {
        LayerConfig {
            enabled: true,
            timeout_ms: 100,
        }
    }

    fn default_knowledge_propagation() -> LayerConfig {
        LayerConfig {
            enabled: true,
            timeout_ms: 200,
        }
    }

    pub fn for_layer(&self, kind: LayerKind) -> &LayerConfig {
        match kind {
            LayerKind::FastSearch => &self.fast_search,
            LayerKind::AstAnalysis => &self.ast_analysis,
            LayerKind::ConceptGraph => &self.concept_graph,
            LayerKind::PatternLearner => &self.pattern_learner,
            LayerKind::KnowledgePropagation => &self.knowledge_propagation,
        }
    }
}

impl Default for LayerSettings {
    fn default() -> Self {
        Self {
            fast_search: Self::default_fast_search(),
            ast_analysis: Self::default_ast_analysis(),
            concept_graph: Self::default_concept_graph(),
            pattern_learner: Self::default_pattern_learner(),
            knowledge_propagation: Self::default_knowledge_propagation(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "CacheSettings::default_max_size")]
    pub max_size: usize,
    #[serde(default = "CacheSettings::default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "CacheSettings::default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl CacheSettings {
    fn default_max_size() -> usize {
        1000
    }

    fn default_ttl_seconds() -> u64 {
        300
    }

    fn default_sweep_interval_seconds() -> u64 {
        60
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: Self::default_max_size(),
            ttl_seconds: Self::default_ttl_seconds(),
            sweep_interval_seconds: Self::default_sweep_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "BreakerSettings::default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "BreakerSettings::default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    #[serde(default = "BreakerSettings::default_half_open_success_threshold")]
    pub half_open_success_threshold: u32,
}

impl BreakerSettings {
    fn default_failure_threshold() -> u32 {
        5
    }

    fn default_reset_timeout_ms() -> u64 {
        60_000
    }

    fn default_half_open_success_threshold() -> u32 {
        3
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: Self::default_failure_threshold(),
            reset_timeout_ms: Self::default_reset_timeout_ms(),
            half_open_success_threshold: Self::default_half_open_success_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "RetrySettings::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "RetrySettings::default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "RetrySettings::default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "RetrySettings::default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl RetrySettings {
    fn default_max_attempts() -> u32 {
        3
    }

    fn default_base_delay_ms() -> u64 {
        100
    }

    fn default_max_delay_ms() -> u64 {
        5000
    }

    fn default_backoff_multiplier() -> f64 {
        2.0
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            base_delay_ms: Self::default_base_delay_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
            backoff_multiplier: Self::default_backoff_multiplier(),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationSettings {
    #[serde(default = "EscalationSettings::default_sufficiency_threshold")]
    pub sufficiency_threshold: f64,
}

impl EscalationSettings {
    fn default_sufficiency_threshold() -> f64 {
        0.9
    }
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            sufficiency_threshold: Self::default_sufficiency_threshold(),
        }
    }
}

/// What the orchestrator does when a layer call fails after retry and the
/// circuit breaker have both had their say.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationStrategy {
    /// Continue with the next layer; the partial chain is preserved.
    SkipLayer,
    /// Fall back to the last known-good cached value for this key.
    UseCachedResult,
    /// Return the chain built so far, marked not-sufficient.
    ReturnPartialResult,
    ReturnEmpty,
    /// Propagate the error to the caller.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationSettings {
    #[serde(default = "DegradationSettings::default_read")]
    pub definition: DegradationStrategy,
    #[serde(default = "DegradationSettings::default_read")]
    pub reference: DegradationStrategy,
    /// Losing a write silently is unacceptable.
    #[serde(default = "DegradationSettings::default_write")]
    pub rename: DegradationStrategy,
    #[serde(default = "DegradationSettings::default_read")]
    pub dependency_analysis: DegradationStrategy,
}

impl DegradationSettings {
    fn default_read() -> DegradationStrategy {
        DegradationStrategy::SkipLayer
    }

    fn default_write() -> DegradationStrategy {
        DegradationStrategy::Fail
    }

    pub fn for_operation(&self, op: OperationKind) -> DegradationStrategy {
        match op {
            OperationKind::Definition => self.definition,
            OperationKind::Reference => self.reference,
            OperationKind::Rename => self.rename,
            OperationKind::DependencyAnalysis => self.dependency_analysis,
        }
    }
}

impl Default for DegradationSettings {
    fn default() -> Self {
        Self {
            definition: Self::default_read(),
            reference: Self::default_read(),
            rename: Self::default_write(),
            dependency_analysis: Self::default_read(),
        }
    }
}

/// Top-level configuration. `Default` is fully usable without a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StratumConfig {
    #[serde(default)]
    pub layers: LayerSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub escalation: EscalationSettings,
    #[serde(default)]
    pub degradation: DegradationSettings,
}

impl StratumConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&raw)
            .map_err(|e| StratumError::Config(format!("{}: {}", path.as_ref().display(), e)))
    }

    /// Enabled layers in ascending cost order.
    pub fn enabled_layers(&self) -> Vec<LayerKind> {
        LayerKind::ALL
            .into_iter()
            .filter(|kind| self.layers.for_layer(*kind).enabled)
            .collect()
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = StratumConfig::default();
        assert_eq!(cfg.breaker.failure_threshold, 5);
        assert_eq!(cfg.breaker.half_open_success_threshold, 3);
        assert_eq!(cfg.breaker.reset_timeout_ms, 60_000);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.base_delay_ms, 100);
        assert_eq!(cfg.retry.max_delay_ms, 5000);
        assert!(cfg.retry.jitter);
        assert_eq!(cfg.cache.max_size, 1000);
        assert_eq!(cfg.cache.ttl_seconds, 300);
        assert_eq!(cfg.escalation.sufficiency_threshold, 0.9);
        assert_eq!(
            cfg.degradation.for_operation(OperationKind::Rename),
            DegradationStrategy::Fail
        );
        assert_eq!(
            cfg.degradation.for_operation(OperationKind::Definition),
            DegradationStrategy::SkipLayer
        );
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: StratumConfig = toml::from_str(
            r#"
            [escalation]
            sufficiency_threshold = 0.8

            [layers.ast_analysis]
            enabled = false
            timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(cfg.escalation.sufficiency_threshold, 0.8);
        assert!(!cfg.layers.ast_analysis.enabled);
        assert_eq!(cfg.layers.ast_analysis.timeout_ms, 250);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.retry.max_attempts, 3);
        let enabled = cfg.enabled_layers();
        assert!(!enabled.contains(&LayerKind::AstAnalysis));
        assert_eq!(enabled.len(), 4);
    }

    #[test]
    fn enabled_layers_preserve_escalation_order() {
        let cfg = StratumConfig::default();
        assert_eq!(cfg.enabled_layers(), LayerKind::ALL.to_vec());
    }
}
