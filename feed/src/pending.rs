//! In-flight history request tracking
//!
//! One entry per symbol. A request that stays unanswered past the timeout
//! is retried up to `max_retries` times, then abandoned; other symbols are
//! unaffected.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Outstanding history request for a symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub symbol: String,
    pub sent_at: Instant,
    /// Retries already made for this request
    pub retries: u32,
}

/// What to do with a timed-out request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expiry {
    /// Send the request again; `attempt` counts retries from 1
    Retry { symbol: String, attempt: u32 },
    /// Retries exhausted, request dropped
    Abandon { symbol: String },
}

/// Tracker of unanswered history requests
#[derive(Debug)]
pub struct PendingRequests {
    timeout: Duration,
    max_retries: u32,
    requests: HashMap<String, PendingRequest>,
}

impl PendingRequests {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
            requests: HashMap::new(),
        }
    }

    /// Record a request sent at `now`
    ///
    /// Re-sending while a request is outstanding restarts its timer but
    /// keeps its retry count.
    pub fn register(&mut self, symbol: &str, now: Instant) {
        self.requests
            .entry(symbol.to_string())
            .and_modify(|r| r.sent_at = now)
            .or_insert_with(|| PendingRequest {
                symbol: symbol.to_string(),
                sent_at: now,
                retries: 0,
            });
    }

    /// Mark the symbol's request answered; false if none was outstanding
    pub fn resolve(&mut self, symbol: &str) -> bool {
        self.requests.remove(symbol).is_some()
    }

    /// Collect requests older than the timeout
    ///
    /// Retried requests have their timer restarted at `now`.
    pub fn expired(&mut self, now: Instant) -> Vec<Expiry> {
        let mut expiries = Vec::new();
        let mut abandoned = Vec::new();

        for request in self.requests.values_mut() {
            if now.saturating_duration_since(request.sent_at) < self.timeout {
                continue;
            }
            if request.retries < self.max_retries {
                request.retries += 1;
                request.sent_at = now;
                expiries.push(Expiry::Retry {
                    symbol: request.symbol.clone(),
                    attempt: request.retries,
                });
            } else {
                abandoned.push(request.symbol.clone());
            }
        }

        for symbol in abandoned {
            self.requests.remove(&symbol);
            expiries.push(Expiry::Abandon { symbol });
        }
        expiries
    }

    pub fn get(&self, symbol: &str) -> Option<&PendingRequest> {
        self.requests.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PendingRequests {
        PendingRequests::new(Duration::from_secs(10), 3)
    }

    #[test]
    fn test_resolve_removes_request() {
        let mut pending = tracker();
        let now = Instant::now();

        pending.register("R_100", now);
        assert_eq!(pending.len(), 1);
        assert!(pending.resolve("R_100"));
        assert!(!pending.resolve("R_100"));
        assert!(pending.expired(now + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn test_retries_then_abandons() {
        let mut pending = tracker();
        let start = Instant::now();
        pending.register("R_100", start);

        assert!(pending.expired(start + Duration::from_secs(9)).is_empty());

        let mut now = start;
        for attempt in 1..=3 {
            now += Duration::from_secs(10);
            assert_eq!(
                pending.expired(now),
                vec![Expiry::Retry {
                    symbol: "R_100".to_string(),
                    attempt
                }]
            );
        }

        now += Duration::from_secs(10);
        assert_eq!(
            pending.expired(now),
            vec![Expiry::Abandon {
                symbol: "R_100".to_string()
            }]
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn test_symbols_expire_independently() {
        let mut pending = tracker();
        let start = Instant::now();
        pending.register("R_100", start);
        pending.register("R_50", start + Duration::from_secs(5));

        let expiries = pending.expired(start + Duration::from_secs(10));
        assert_eq!(expiries.len(), 1);
        assert!(matches!(&expiries[0], Expiry::Retry { symbol, .. } if symbol == "R_100"));
        assert_eq!(pending.get("R_50").unwrap().retries, 0);
    }

    #[test]
    fn test_reregister_keeps_retry_count() {
        let mut pending = tracker();
        let start = Instant::now();
        pending.register("R_100", start);
        pending.expired(start + Duration::from_secs(10));

        pending.register("R_100", start + Duration::from_secs(12));
        let request = pending.get("R_100").unwrap();
        assert_eq!(request.retries, 1);
        assert_eq!(request.sent_at, start + Duration::from_secs(12));
    }
}
