//! WebSocket connection limits per client IP and in total.
//!
//! A limit of `0` means unlimited. Each accepted upgrade holds a
//! [`ConnectionPermit`] for as long as the socket lives; dropping the
//! permit gives the slot back.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared connection counters.
#[derive(Debug, Default)]
pub struct ConnectionLimits {
    max_per_ip: usize,
    max_total: usize,
    state: Mutex<LimitState>,
}

#[derive(Debug, Default)]
struct LimitState {
    total: usize,
    by_ip: HashMap<IpAddr, usize>,
}

impl ConnectionLimits {
    /// Creates limits allowing `max_per_ip` connections per address and
    /// `max_total` overall.
    #[must_use]
    pub fn new(max_per_ip: usize, max_total: usize) -> Self {
        Self {
            max_per_ip,
            max_total,
            state: Mutex::new(LimitState::default()),
        }
    }

    /// Claims a slot for `ip`, or returns `None` if either limit is reached.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>, ip: IpAddr) -> Option<ConnectionPermit> {
        let mut state = self.lock();
        let for_ip = state.by_ip.get(&ip).copied().unwrap_or(0);
        if self.max_total > 0 && state.total >= self.max_total {
            tracing::warn!(%ip, total = state.total, "total connection limit reached");
            return None;
        }
        if self.max_per_ip > 0 && for_ip >= self.max_per_ip {
            tracing::warn!(%ip, active = for_ip, "per-ip connection limit reached");
            return None;
        }
        state.total += 1;
        *state.by_ip.entry(ip).or_default() += 1;
        drop(state);

        Some(ConnectionPermit {
            limits: Arc::clone(self),
            ip,
        })
    }

    /// Connections currently holding a permit.
    #[must_use]
    pub fn active(&self) -> usize {
        self.lock().total
    }

    /// Connections currently holding a permit for `ip`.
    #[must_use]
    pub fn active_for(&self, ip: IpAddr) -> usize {
        self.lock().by_ip.get(&ip).copied().unwrap_or(0)
    }

    fn release(&self, ip: IpAddr) {
        let mut state = self.lock();
        state.total = state.total.saturating_sub(1);
        if let Some(count) = state.by_ip.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.by_ip.remove(&ip);
            }
        }
    }

    // Counters stay consistent even if a holder panicked.
    fn lock(&self) -> MutexGuard<'_, LimitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A claimed connection slot, released on drop.
#[derive(Debug)]
pub struct ConnectionPermit {
    limits: Arc<ConnectionLimits>,
    ip: IpAddr,
}

impl ConnectionPermit {
    /// Address the slot was claimed for.
    #[must_use]
    pub const fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.limits.release(self.ip);
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    const A: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const B: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[test]
    fn zero_means_unlimited() {
        let limits = Arc::new(ConnectionLimits::new(0, 0));
        let permits: Vec<_> = (0..50).filter_map(|_| limits.try_acquire(A)).collect();
        assert_eq!(permits.len(), 50);
        assert_eq!(limits.active(), 50);
    }

    #[test]
    fn per_ip_limit_is_independent_per_address() {
        let limits = Arc::new(ConnectionLimits::new(1, 0));
        let Some(_a) = limits.try_acquire(A) else {
            panic!("first connection from A should be admitted");
        };
        assert!(limits.try_acquire(A).is_none());
        assert!(limits.try_acquire(B).is_some());
    }

    #[test]
    fn total_limit_spans_addresses() {
        let limits = Arc::new(ConnectionLimits::new(0, 2));
        let first = limits.try_acquire(A);
        let second = limits.try_acquire(B);
        assert!(first.is_some() && second.is_some());
        assert!(limits.try_acquire(A).is_none());
    }

    #[test]
    fn dropping_permit_frees_slot() {
        let limits = Arc::new(ConnectionLimits::new(1, 1));
        let permit = limits.try_acquire(A);
        assert_eq!(limits.active_for(A), 1);
        drop(permit);
        assert_eq!(limits.active(), 0);
        assert_eq!(limits.active_for(A), 0);
        assert!(limits.try_acquire(A).is_some());
    }
}
