//! Round-robin load balancing strategy.

use std::sync::{Arc, Mutex, PoisonError};

use crate::load_balancer::{backend::Backend, registry::BackendRegistry, LoadBalancer};

/// Round-robin selector over a shared registry.
///
/// The cursor holds the last visited index (`None` before the first call).
/// It advances on every probe of a candidate, including failed full scans.
#[derive(Debug)]
pub struct RoundRobin {
    registry: Arc<BackendRegistry>,
    cursor: Mutex<Option<usize>>,
}

impl RoundRobin {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            cursor: Mutex::new(None),
        }
    }

    /// Rewind so the next selection starts at index 0.
    pub fn reset(&self) {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl LoadBalancer for RoundRobin {
    fn next_backend(&self) -> Option<Arc<Backend>> {
        // Held across the scan so concurrent callers get distinct successive indices.
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);

        self.registry.read(|backends| {
            let len = backends.len();
            for _ in 0..len {
                // The cursor may exceed len after a removal; modulo keeps it in range.
                let index = cursor.map_or(0, |c| (c + 1) % len);
                *cursor = Some(index);
                let backend = &backends[index];
                if backend.is_healthy() {
                    return Some(backend.clone());
                }
            }
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_registry(urls: &[&str]) -> Arc<BackendRegistry> {
        let registry = Arc::new(BackendRegistry::from_urls(urls.iter().copied()));
        for backend in registry.list() {
            backend.record_probe(true);
        }
        registry
    }

    fn next_url(lb: &RoundRobin) -> Option<String> {
        lb.next_backend().map(|b| b.url().to_string())
    }

    #[test]
    fn test_round_robin() {
        let registry = healthy_registry(&["http://a:1", "http://b:2"]);
        let lb = RoundRobin::new(registry);

        assert_eq!(next_url(&lb).as_deref(), Some("http://a:1"));
        assert_eq!(next_url(&lb).as_deref(), Some("http://b:2"));
        assert_eq!(next_url(&lb).as_deref(), Some("http://a:1"));
    }

    #[test]
    fn each_backend_once_per_cycle() {
        let urls = ["http://a:1", "http://b:2", "http://c:3", "http://d:4"];
        let lb = RoundRobin::new(healthy_registry(&urls));
        // Start mid-cycle.
        next_url(&lb);

        let cycle: Vec<_> = (0..urls.len()).filter_map(|_| next_url(&lb)).collect();
        assert_eq!(cycle, ["http://b:2", "http://c:3", "http://d:4", "http://a:1"]);
    }

    #[test]
    fn skips_unhealthy_backend() {
        let registry = healthy_registry(&["http://a:1", "http://b:2", "http://c:3"]);
        registry.get("http://b:2").unwrap().record_probe(false);
        let lb = RoundRobin::new(registry);

        for _ in 0..30 {
            assert_ne!(next_url(&lb).as_deref(), Some("http://b:2"));
        }
    }

    #[test]
    fn empty_registry_returns_none() {
        let lb = RoundRobin::new(Arc::new(BackendRegistry::new()));
        assert!(lb.next_backend().is_none());
    }

    #[test]
    fn all_unhealthy_returns_none_then_recovers() {
        let registry = healthy_registry(&["http://a:1", "http://b:2"]);
        for backend in registry.list() {
            backend.record_probe(false);
        }
        let lb = RoundRobin::new(registry.clone());

        assert!(lb.next_backend().is_none());
        assert!(lb.next_backend().is_none());

        registry.get("http://b:2").unwrap().record_probe(true);
        assert_eq!(next_url(&lb).as_deref(), Some("http://b:2"));
        assert_eq!(next_url(&lb).as_deref(), Some("http://b:2"));
    }

    #[test]
    fn survives_removal_behind_cursor() {
        let registry = healthy_registry(&["http://a:1", "http://b:2", "http://c:3"]);
        let lb = RoundRobin::new(registry.clone());
        for _ in 0..3 {
            lb.next_backend();
        }
        // Cursor now sits on the last index.
        registry.remove("http://c:3").unwrap();
        registry.remove("http://b:2").unwrap();

        assert_eq!(next_url(&lb).as_deref(), Some("http://a:1"));
        assert_eq!(next_url(&lb).as_deref(), Some("http://a:1"));
    }

    #[test]
    fn reset_restarts_at_first_backend() {
        let lb = RoundRobin::new(healthy_registry(&["http://a:1", "http://b:2"]));
        next_url(&lb);
        lb.reset();
        assert_eq!(next_url(&lb).as_deref(), Some("http://a:1"));
    }

    #[test]
    fn concurrent_callers_get_distinct_indices() {
        let urls: Vec<String> = (0..8).map(|i| format!("http://b{i}:80")).collect();
        let registry = Arc::new(BackendRegistry::from_urls(urls.clone()));
        for backend in registry.list() {
            backend.record_probe(true);
        }
        let lb = Arc::new(RoundRobin::new(registry));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lb = lb.clone();
                std::thread::spawn(move || {
                    (0..200)
                        .filter_map(|_| lb.next_backend().map(|b| b.url().to_string()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts = std::collections::HashMap::new();
        for handle in handles {
            for url in handle.join().unwrap() {
                *counts.entry(url).or_insert(0usize) += 1;
            }
        }
        // 800 selections over 8 backends, strictly rotated.
        assert_eq!(counts.len(), 8);
        assert!(counts.values().all(|&c| c == 100));
    }
}
