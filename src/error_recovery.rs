//! Circuit breaker for external dependencies (embedder, vector store).
//! Trips open after consecutive failures, probes half-open after a
//! cool-down, closes again after enough successes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_threshold: u32,
    timeout: Duration,
    state: Arc<RwLock<CircuitState>>,
    failure_count: Arc<AtomicU32>,
    success_count: Arc<AtomicU32>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_threshold: u32, timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_threshold,
            timeout,
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            failure_count: Arc::new(AtomicU32::new(0)),
            success_count: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Execute an async operation through the breaker.
    pub async fn call<F, T, E, Fut>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: From<anyhow::Error>,
    {
        let state = *self.state.read().await;
        if let CircuitState::Open { opened_at } = state {
            if opened_at.elapsed() >= self.timeout {
                *self.state.write().await = CircuitState::HalfOpen;
                self.success_count.store(0, Ordering::Relaxed);
                tracing::info!("circuit breaker transitioning to half-open");
            } else {
                return Err(E::from(anyhow!("circuit breaker open")));
            }
        }

        match f().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await;
                Err(err)
            }
        }
    }

    pub async fn current_state(&self) -> CircuitState {
        *self.state.read().await
    }

    async fn record_success(&self) {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
                if successes >= self.recovery_threshold {
                    *state = CircuitState::Closed;
                    self.failure_count.store(0, Ordering::Relaxed);
                    tracing::info!("circuit breaker recovered (closed)");
                }
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::Open { .. } => {}
        }
    }

    async fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.failure_threshold {
            let mut state = self.state.write().await;
            match *state {
                CircuitState::Closed | CircuitState::HalfOpen => {
                    *state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                    tracing::warn!("circuit breaker tripped (open)");
                }
                CircuitState::Open { .. } => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn failing(breaker: &CircuitBreaker) -> Result<(), anyhow::Error> {
        breaker
            .call(|| async { Err::<(), anyhow::Error>(anyhow!("boom")) })
            .await
    }

    async fn succeeding(breaker: &CircuitBreaker) -> Result<(), anyhow::Error> {
        breaker.call(|| async { Ok::<(), anyhow::Error>(()) }).await
    }

    #[tokio::test]
    async fn test_trips_after_threshold() {
        let breaker = CircuitBreaker::new(3, 1, Duration::from_secs(60));
        for _ in 0..3 {
            let _ = failing(&breaker).await;
        }
        assert!(matches!(
            breaker.current_state().await,
            CircuitState::Open { .. }
        ));
        // while open, calls fail fast
        let result = succeeding(&breaker).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_recovers_through_half_open() {
        let breaker = CircuitBreaker::new(1, 2, Duration::from_millis(10));
        let _ = failing(&breaker).await;
        assert!(matches!(
            breaker.current_state().await,
            CircuitState::Open { .. }
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        // first probe transitions to half-open and succeeds
        succeeding(&breaker).await.unwrap();
        assert_eq!(breaker.current_state().await, CircuitState::HalfOpen);
        succeeding(&breaker).await.unwrap();
        assert_eq!(breaker.current_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(2, 1, Duration::from_secs(60));
        let _ = failing(&breaker).await;
        succeeding(&breaker).await.unwrap();
        let _ = failing(&breaker).await;
        // never reached two consecutive failures
        assert_eq!(breaker.current_state().await, CircuitState::Closed);
    }
}
