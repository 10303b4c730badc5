use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StratumError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("layer '{layer}' exceeded its {budget:?} budget")]
    LayerTimeout { layer: String, budget: Duration },

    #[error("layer '{layer}' unavailable: {reason}")]
    LayerUnavailable { layer: String, reason: String },

    #[error("circuit open for layer '{layer}', retry allowed in {retry_after:?}")]
    CircuitOpen {
        layer: String,
        retry_after: Duration,
    },

    #[error("propagation error: {0}")]
    Propagation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StratumError {
    /// Whether a retry could plausibly change the outcome. Validation errors
    /// are caller bugs and an open circuit already fast-fails, so neither is
    /// retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StratumError::LayerTimeout { .. } | StratumError::LayerUnavailable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StratumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(StratumError::LayerTimeout {
            layer: "ast-analysis".into(),
            budget: Duration::from_millis(500),
        }
        .is_retryable());
        assert!(StratumError::LayerUnavailable {
            layer: "fast-search".into(),
            reason: "provider gone".into(),
        }
        .is_retryable());
        assert!(!StratumError::Validation("empty identifier".into()).is_retryable());
        assert!(!StratumError::CircuitOpen {
            layer: "concept-graph".into(),
            retry_after: Duration::from_secs(60),
        }
        .is_retryable());
        assert!(!StratumError::Propagation("no context".into()).is_retryable());
    }
}
