//! Ticket-tracker adapter — a pluggable client interface with rate
//! limiting and a read-through cache. Sync is on-demand only; there is no
//! background polling.

pub mod cache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::{TicketEntity, TicketSource, TicketStatus};

pub use cache::TicketCache;

/// Search filters accepted by every tracker implementation.
#[derive(Debug, Clone, Default)]
pub struct TicketFilters {
    pub status: Option<TicketStatus>,
    pub labels: Vec<String>,
}

/// A tracker backend. Implementations must be rate-limited and cached —
/// both are provided by [`TicketGateway`], so a client only does I/O.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    fn source(&self) -> TicketSource;
    async fn search(&self, query: &str, filters: &TicketFilters) -> anyhow::Result<Vec<TicketEntity>>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<TicketEntity>>;
}

/// Token-bucket rate limiter: `capacity` requests per `window`.
pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: std::time::Instant,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: std::time::Instant::now(),
            }),
        }
    }

    /// Wait until a request slot is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed();
                let refill = elapsed.as_secs_f64() / self.window.as_secs_f64()
                    * self.capacity as f64;
                state.tokens = (state.tokens + refill).min(self.capacity as f64);
                state.last_refill = std::time::Instant::now();
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(
                        deficit / self.capacity as f64 * self.window.as_secs_f64(),
                    ))
                }
            };
            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }
}

/// Rate-limited, cached gateway in front of an optional tracker client.
pub struct TicketGateway {
    client: Option<Arc<dyn TrackerClient>>,
    cache: TicketCache,
    limiter: RateLimiter,
}

impl TicketGateway {
    pub fn new(client: Arc<dyn TrackerClient>) -> Self {
        Self {
            client: Some(client),
            cache: TicketCache::new(512, Duration::from_secs(300)),
            limiter: RateLimiter::new(30, Duration::from_secs(60)),
        }
    }

    /// A gateway with no backing tracker; every call reports so.
    pub fn unconfigured() -> Self {
        Self {
            client: None,
            cache: TicketCache::new(0, Duration::from_secs(0)),
            limiter: RateLimiter::new(1, Duration::from_secs(1)),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    pub async fn search(
        &self,
        query: &str,
        filters: &TicketFilters,
    ) -> anyhow::Result<Vec<TicketEntity>> {
        let Some(client) = &self.client else {
            anyhow::bail!("no ticket tracker configured");
        };

        let digest = Self::search_digest(client.source(), query, filters);
        if let Some(cached) = self.cache.get_search(&digest).await {
            return Ok(cached);
        }

        self.limiter.acquire().await;
        let tickets = client.search(query, filters).await?;
        self.cache.set_search(&digest, &tickets).await;
        for ticket in &tickets {
            self.cache.set_ticket(ticket).await;
        }
        Ok(tickets)
    }

    pub async fn get(&self, id: &str) -> anyhow::Result<Option<TicketEntity>> {
        let Some(client) = &self.client else {
            anyhow::bail!("no ticket tracker configured");
        };

        if let Some(cached) = self.cache.get_ticket(client.source(), id).await {
            return Ok(Some(cached));
        }

        self.limiter.acquire().await;
        let ticket = client.get(id).await?;
        if let Some(ticket) = &ticket {
            self.cache.set_ticket(ticket).await;
        }
        Ok(ticket)
    }

    #[allow(dead_code)]
    pub async fn cache_stats(&self) -> serde_json::Value {
        self.cache.stats().await
    }

    fn search_digest(source: TicketSource, query: &str, filters: &TicketFilters) -> String {
        let status = filters
            .status
            .map(|s| s.as_str().to_string())
            .unwrap_or_default();
        format!(
            "{}:{}:{}:{}",
            source.as_str(),
            query,
            status,
            filters.labels.join(",")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticTracker {
        calls: AtomicUsize,
        tickets: Vec<TicketEntity>,
    }

    impl StaticTracker {
        fn with_tickets(tickets: Vec<TicketEntity>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                tickets,
            }
        }
    }

    #[async_trait]
    impl TrackerClient for StaticTracker {
        fn source(&self) -> TicketSource {
            TicketSource::Github
        }
        async fn search(
            &self,
            query: &str,
            _filters: &TicketFilters,
        ) -> anyhow::Result<Vec<TicketEntity>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .tickets
                .iter()
                .filter(|t| t.title.contains(query))
                .cloned()
                .collect())
        }
        async fn get(&self, id: &str) -> anyhow::Result<Option<TicketEntity>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.tickets.iter().find(|t| t.id == id).cloned())
        }
    }

    fn ticket(id: &str, title: &str) -> TicketEntity {
        TicketEntity {
            id: id.into(),
            source: TicketSource::Github,
            title: title.into(),
            description: String::new(),
            status: TicketStatus::Open,
            labels: vec![],
            priority: crate::models::TicketPriority::None,
            acceptance_criteria: vec![],
            linked_prs: vec![],
            version: 1,
        }
    }

    #[tokio::test]
    async fn test_get_is_cached() {
        let tracker = Arc::new(StaticTracker::with_tickets(vec![ticket("T-1", "login bug")]));
        let gateway = TicketGateway::new(tracker.clone());

        let first = gateway.get("T-1").await.unwrap().unwrap();
        let second = gateway.get("T-1").await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
        // second hit came from cache
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_search_is_cached() {
        let tracker = Arc::new(StaticTracker::with_tickets(vec![
            ticket("T-1", "login bug"),
            ticket("T-2", "search latency"),
        ]));
        let gateway = TicketGateway::new(tracker.clone());

        let first = gateway.search("login", &TicketFilters::default()).await.unwrap();
        assert_eq!(first.len(), 1);
        let _ = gateway.search("login", &TicketFilters::default()).await.unwrap();
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_gateway_errors() {
        let gateway = TicketGateway::unconfigured();
        assert!(!gateway.is_configured());
        assert!(gateway.get("T-1").await.is_err());
        assert!(gateway.search("x", &TicketFilters::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_rate_limiter_allows_burst_up_to_capacity() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = std::time::Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
