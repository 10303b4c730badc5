use crate::health::HealthMonitor;
use std::sync::Arc;
use std::time::Instant;
use stratum_cache::{request_fingerprint, ResultCache};
use stratum_core::{
    DegradationStrategy, Layer, LayerResult, Request, Result, StratumConfig,
};
use stratum_resilience::{with_timeout, BreakerRegistry, RetryHandler};
use tracing::{debug, info, warn};

/// Runs the escalation loop: cheapest layer first, stopping as soon as the
/// chained confidence clears the sufficiency threshold. Per-layer calls are
/// gated by a circuit breaker, retried with backoff, and timeout-guarded.
pub struct LayerOrchestrator {
    config: StratumConfig,
    layers: Vec<Arc<dyn Layer>>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryHandler,
    cache: Arc<ResultCache>,
    health: Arc<HealthMonitor>,
}

impl LayerOrchestrator {
    /// `layers` must be sorted cheapest-first; disabled layers are filtered
    /// out here so the loop body never consults enablement.
    pub fn new(config: StratumConfig, layers: Vec<Arc<dyn Layer>>) -> Self {
        let layers: Vec<Arc<dyn Layer>> = layers
            .into_iter()
            .filter(|l| config.layers.for_layer(l.kind()).enabled)
            .collect();
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let retry = RetryHandler::new(config.retry.clone());
        let cache = Arc::new(ResultCache::new(config.cache.clone()));
        let health = Arc::new(HealthMonitor::new(layers.clone(), breakers.clone()));
        Self {
            config,
            layers,
            breakers,
            retry,
            cache,
            health,
        }
    }

    pub fn config(&self) -> &StratumConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Process one request through the layer chain.
    pub async fn execute(&self, request: &Request) -> Result<LayerResult> {
        let key = request_fingerprint(request);
        if self.config.cache.enabled {
            if let Some(hit) = self.cache.get(&key) {
                debug!(request = %request.id, key = %key, "cache hit");
                return Ok(hit.mark_cache_hit());
            }
        }

        let threshold = self.config.escalation.sufficiency_threshold;
        let mut chain = LayerResult::empty();
        let mut partial = false;

        for layer in &self.layers {
            let started = Instant::now();
            let outcome = self.call_layer(layer.as_ref(), request, &chain).await;
            let latency = started.elapsed();

            match outcome {
                Ok(step) => {
                    self.health.record_call(layer.name(), true, latency);
                    chain = LayerResult::extend(&chain, step);
                    debug!(
                        request = %request.id,
                        layer = layer.name(),
                        confidence = chain.confidence,
                        "layer completed"
                    );
                    if chain.confidence >= threshold {
                        chain = chain.mark_sufficient();
                        break;
                    }
                }
                Err(err) => {
                    self.health.record_call(layer.name(), false, latency);
                    let strategy = self.config.degradation.for_operation(request.operation);
                    warn!(
                        request = %request.id,
                        layer = layer.name(),
                        error = %err,
                        ?strategy,
                        "layer failed, degrading"
                    );
                    match strategy {
                        DegradationStrategy::SkipLayer => continue,
                        DegradationStrategy::UseCachedResult => {
                            if let Some(cached) = self.cache.get(&key) {
                                return Ok(cached.mark_cache_hit());
                            }
                            continue;
                        }
                        DegradationStrategy::ReturnPartialResult => {
                            partial = true;
                            break;
                        }
                        DegradationStrategy::ReturnEmpty => return Ok(LayerResult::empty()),
                        DegradationStrategy::Fail => return Err(err),
                    }
                }
            }
        }

        // Running out of layers is a terminal answer, not a partial one.
        if !partial && !chain.sufficient {
            chain = chain.mark_sufficient();
        }

        // Partial results are transient; caching them would pin the degraded
        // answer until the TTL lapses even after the layer recovers.
        if self.config.cache.enabled && chain.sufficient && !chain.layers_used.is_empty() {
            self.cache.insert(key, chain.clone(), None);
        }
        info!(
            request = %request.id,
            operation = %request.operation,
            confidence = chain.confidence,
            layers = chain.layers_used.len(),
            sufficient = chain.sufficient,
            "request completed"
        );
        Ok(chain)
    }

    /// Breaker gate, then the retry loop; every attempt is timeout-guarded.
    /// Only retryable outcomes feed the breaker's failure counter.
    async fn call_layer(
        &self,
        layer: &dyn Layer,
        request: &Request,
        chain: &LayerResult,
    ) -> Result<LayerResult> {
        let breaker = self.breakers.get_or_create(layer.name());
        breaker.try_acquire()?;

        let budget = self.config.layers.for_layer(layer.kind()).timeout();
        let prior = (!chain.layers_used.is_empty()).then_some(chain);
        let result = self
            .retry
            .execute(|| with_timeout(layer.name(), budget, layer.process(request, prior)))
            .await;

        match &result {
            Ok(_) => breaker.record_success(),
            Err(err) if err.is_retryable() => breaker.record_failure(),
            Err(_) => {}
        }
        result
    }
}
