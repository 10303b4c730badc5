use std::future::Future;
use std::time::Duration;
use stratum_core::{Result, StratumError};

/// Race `fut` against `budget`. Exceeding the budget is reported as
/// `LayerTimeout`, a distinct error kind, so callers can tell "layer too
/// slow" apart from "layer refused".
pub async fn with_timeout<T, Fut>(layer: &str, budget: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(StratumError::LayerTimeout {
            layer: layer.to_string(),
            budget,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_future_times_out_with_layer_timeout() {
        let result: Result<()> = with_timeout("ast-analysis", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        match result.unwrap_err() {
            StratumError::LayerTimeout { layer, budget } => {
                assert_eq!(layer, "ast-analysis");
                assert_eq!(budget, Duration::from_millis(50));
            }
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn fast_future_passes_through() {
        let result = with_timeout("fast-search", Duration::from_millis(50), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn inner_error_is_not_masked() {
        let result: Result<()> = with_timeout("fast-search", Duration::from_millis(50), async {
            Err(StratumError::LayerUnavailable {
                layer: "fast-search".into(),
                reason: "provider gone".into(),
            })
        })
        .await;
        assert!(matches!(
            result.unwrap_err(),
            StratumError::LayerUnavailable { .. }
        ));
    }
}
