use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use stratum_core::Layer;
use stratum_resilience::{BreakerRegistry, CircuitState};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-layer latency window size.
const LATENCY_WINDOW: usize = 128;
const BROADCAST_CAPACITY: usize = 16;

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    /// Every layer passed its self-check and no circuit is open.
    Healthy,
    /// At least one layer is down; escalation can route around it.
    Degraded,
    /// No layer is serviceable.
    Unhealthy,
}

impl std::fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverallHealth::Healthy => write!(f, "healthy"),
            OverallHealth::Degraded => write!(f, "degraded"),
            OverallHealth::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerHealth {
    pub layer: String,
    pub healthy: bool,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    pub latency_p95_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall: OverallHealth,
    pub layers: Vec<LayerHealth>,
    pub generated_at: DateTime<Utc>,
}

/// Samples layer self-checks and breaker states, keeps bounded latency
/// windows, and broadcasts a report whenever the aggregate status flips.
pub struct HealthMonitor {
    layers: Vec<Arc<dyn Layer>>,
    breakers: Arc<BreakerRegistry>,
    latencies: DashMap<String, VecDeque<u64>>,
    tx: broadcast::Sender<HealthReport>,
    last_overall: Mutex<Option<OverallHealth>>,
}

impl HealthMonitor {
    pub fn new(layers: Vec<Arc<dyn Layer>>, breakers: Arc<BreakerRegistry>) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            layers,
            breakers,
            latencies: DashMap::new(),
            tx,
            last_overall: Mutex::new(None),
        }
    }

    /// Fed by the orchestrator after every layer call, success or not.
    pub fn record_call(&self, layer: &str, success: bool, latency: Duration) {
        let mut window = self
            .latencies
            .entry(layer.to_string())
            .or_insert_with(|| VecDeque::with_capacity(LATENCY_WINDOW));
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(latency.as_millis() as u64);
        if !success {
            debug!(layer, latency_ms = latency.as_millis() as u64, "layer call failed");
        }
    }

    pub fn latency_p95(&self, layer: &str) -> u64 {
        let Some(window) = self.latencies.get(layer) else {
            return 0;
        };
        if window.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = window.iter().copied().collect();
        sorted.sort_unstable();
        let rank = (sorted.len() as f64 * 0.95).ceil() as usize;
        sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
    }

    /// Point-in-time report; also used to answer health queries on demand.
    pub async fn report(&self) -> HealthReport {
        let mut layers = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let snapshot = self.breakers.get_or_create(layer.name()).snapshot();
            let self_check = layer.is_healthy().await;
            layers.push(LayerHealth {
                layer: layer.name().to_string(),
                healthy: self_check && snapshot.state != CircuitState::Open,
                circuit_state: snapshot.state,
                failure_count: snapshot.failure_count,
                latency_p95_ms: self.latency_p95(layer.name()),
            });
        }

        let healthy = layers.iter().filter(|l| l.healthy).count();
        let overall = if healthy == layers.len() {
            OverallHealth::Healthy
        } else if healthy > 0 {
            OverallHealth::Degraded
        } else {
            OverallHealth::Unhealthy
        };

        HealthReport {
            overall,
            layers,
            generated_at: Utc::now(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthReport> {
        self.tx.subscribe()
    }

    /// Background sampler. Emits over the broadcast channel only when the
    /// aggregate status changes; steady state stays quiet.
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = monitor.report().await;
                let flipped = {
                    let mut last = monitor.last_overall.lock();
                    let changed = *last != Some(report.overall);
                    *last = Some(report.overall);
                    changed
                };
                if flipped {
                    match report.overall {
                        OverallHealth::Healthy => info!(overall = %report.overall, "health status changed"),
                        _ => warn!(overall = %report.overall, "health status changed"),
                    }
                    // Nobody listening is fine.
                    let _ = monitor.tx.send(report);
                }
            }
        })
    }
}
