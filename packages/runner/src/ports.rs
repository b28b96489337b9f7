// ABOUTME: Host port pool for container executions
// ABOUTME: Atomic acquire/release over a configurable range with exclusive leases

use crate::error::{RunnerError, RunnerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::TcpListener;
use std::ops::RangeInclusive;
use std::sync::Mutex;
use uuid::Uuid;

/// A host port held by one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortLease {
    pub port: u16,
    pub execution_id: Uuid,
    pub acquired_at: DateTime<Utc>,
}

struct PoolState {
    leases: HashMap<u16, PortLease>,
    /// Next port to try, so recently released ports are not reused immediately.
    cursor: u16,
}

/// Process-lifetime pool of host ports.
///
/// Acquire and release run under a single mutex, so two concurrent launches
/// can never claim the same port. Leases are not persisted.
pub struct PortPool {
    range: RangeInclusive<u16>,
    probe_host: bool,
    state: Mutex<PoolState>,
}

impl PortPool {
    /// `probe_host` additionally skips ports some other process is bound to.
    pub fn new(range: RangeInclusive<u16>, probe_host: bool) -> Self {
        let cursor = *range.start();
        Self {
            range,
            probe_host,
            state: Mutex::new(PoolState {
                leases: HashMap::new(),
                cursor,
            }),
        }
    }

    pub fn range(&self) -> &RangeInclusive<u16> {
        &self.range
    }

    pub fn acquire(&self, execution_id: Uuid) -> RunnerResult<PortLease> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let start = *self.range.start();
        let end = *self.range.end();
        let size = (end - start) as usize + 1;

        let mut candidate = state.cursor.clamp(start, end);
        for _ in 0..size {
            let port = candidate;
            candidate = if candidate == end { start } else { candidate + 1 };

            if state.leases.contains_key(&port) {
                continue;
            }
            if self.probe_host && !is_port_available(port) {
                tracing::debug!("Port {} is bound by another process, skipping", port);
                continue;
            }

            let lease = PortLease {
                port,
                execution_id,
                acquired_at: Utc::now(),
            };
            state.leases.insert(port, lease.clone());
            state.cursor = candidate;
            tracing::debug!("Leased port {} to execution {}", port, execution_id);
            return Ok(lease);
        }

        Err(RunnerError::launch_failed(format!(
            "no free port in range {}-{} ({} leased)",
            start,
            end,
            state.leases.len()
        )))
    }

    /// Return a port to the pool. Releasing an unleased port is a no-op.
    pub fn release(&self, port: u16) -> Option<PortLease> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let lease = state.leases.remove(&port);
        if let Some(lease) = &lease {
            tracing::debug!(
                "Released port {} from execution {}",
                port,
                lease.execution_id
            );
        }
        lease
    }

    pub fn is_leased(&self, port: u16) -> bool {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.leases.contains_key(&port)
    }

    pub fn leases(&self) -> Vec<PortLease> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let mut leases: Vec<_> = state.leases.values().cloned().collect();
        leases.sort_by_key(|l| l.port);
        leases
    }

    pub fn leased_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.leases.len()
    }
}

/// Check whether a port can be bound on all interfaces.
fn is_port_available(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_leases_are_distinct() {
        let pool = PortPool::new(9000..=9004, false);
        let ports: HashSet<u16> = (0..5)
            .map(|_| pool.acquire(Uuid::new_v4()).unwrap().port)
            .collect();
        assert_eq!(ports.len(), 5);
        assert_eq!(pool.leased_count(), 5);
    }

    #[test]
    fn test_exhaustion_is_launch_failure() {
        let pool = PortPool::new(9000..=9001, false);
        pool.acquire(Uuid::new_v4()).unwrap();
        pool.acquire(Uuid::new_v4()).unwrap();
        let err = pool.acquire(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, RunnerError::LaunchFailed { .. }));
    }

    #[test]
    fn test_released_port_is_reusable() {
        let pool = PortPool::new(9000..=9000, false);
        let lease = pool.acquire(Uuid::new_v4()).unwrap();
        assert!(pool.acquire(Uuid::new_v4()).is_err());

        let released = pool.release(lease.port).unwrap();
        assert_eq!(released.execution_id, lease.execution_id);
        assert!(!pool.is_leased(lease.port));
        assert_eq!(pool.acquire(Uuid::new_v4()).unwrap().port, 9000);
    }

    #[test]
    fn test_release_unknown_port_is_noop() {
        let pool = PortPool::new(9000..=9001, false);
        assert!(pool.release(9000).is_none());
        assert!(pool.release(1).is_none());
    }

    #[test]
    fn test_cursor_rotates_through_range() {
        let pool = PortPool::new(9000..=9002, false);
        let first = pool.acquire(Uuid::new_v4()).unwrap();
        pool.release(first.port);
        let second = pool.acquire(Uuid::new_v4()).unwrap();
        assert_ne!(first.port, second.port);
    }

    #[test]
    fn test_concurrent_acquire_never_duplicates() {
        let pool = Arc::new(PortPool::new(9000..=9063, false));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    (0..8)
                        .map(|_| pool.acquire(Uuid::new_v4()).unwrap().port)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for port in handle.join().unwrap() {
                assert!(seen.insert(port), "port {} handed out twice", port);
            }
        }
        assert_eq!(seen.len(), 64);
    }

    #[test]
    fn test_probe_skips_bound_ports() {
        let listener = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let busy = listener.local_addr().unwrap().port();
        let pool = PortPool::new(busy..=busy, true);
        assert!(pool.acquire(Uuid::new_v4()).is_err());
    }
}
