use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use wheel_core::OwnerId;

/// Per-owner "scan in progress" marker with a TTL.
///
/// A marker older than the TTL is treated as abandoned and can be taken over,
/// so a crashed run never locks an owner out for good.
#[derive(Clone)]
pub struct ScanGuard {
    running: Arc<DashMap<OwnerId, Instant>>,
    ttl: Duration,
}

/// Held for the length of a run; dropping it releases the owner.
pub struct ScanPermit {
    running: Arc<DashMap<OwnerId, Instant>>,
    owner: OwnerId,
    acquired_at: Instant,
}

impl ScanGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            running: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn try_acquire(&self, owner: &OwnerId) -> Option<ScanPermit> {
        let now = Instant::now();

        match self.running.entry(owner.clone()) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) < self.ttl {
                    return None;
                }
                tracing::warn!("Taking over stale scan marker for {}", owner);
                entry.insert(now);
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
            }
        }

        Some(ScanPermit {
            running: Arc::clone(&self.running),
            owner: owner.clone(),
            acquired_at: now,
        })
    }

    pub fn is_running(&self, owner: &OwnerId) -> bool {
        self.running
            .get(owner)
            .map(|started| started.elapsed() < self.ttl)
            .unwrap_or(false)
    }
}

impl Drop for ScanPermit {
    fn drop(&mut self) {
        // Only clear our own marker; a takeover after TTL owns the slot now
        self.running
            .remove_if(&self.owner, |_, started| *started == self.acquired_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_second_acquire_rejected_until_release() {
        let guard = ScanGuard::new(Duration::from_secs(900));
        let owner = OwnerId::new("u1");

        let permit = guard.try_acquire(&owner).unwrap();
        assert!(guard.is_running(&owner));
        assert!(guard.try_acquire(&owner).is_none());

        // Other owners are independent
        assert!(guard.try_acquire(&OwnerId::new("u2")).is_some());

        drop(permit);
        assert!(!guard.is_running(&owner));
        assert!(guard.try_acquire(&owner).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_marker_expires() {
        let guard = ScanGuard::new(Duration::from_secs(900));
        let owner = OwnerId::new("u1");

        let stale = guard.try_acquire(&owner).unwrap();
        tokio::time::advance(Duration::from_secs(901)).await;

        assert!(!guard.is_running(&owner));
        let fresh = guard.try_acquire(&owner).unwrap();

        // The abandoned permit must not clear the new run's marker
        drop(stale);
        assert!(guard.is_running(&owner));
        drop(fresh);
        assert!(!guard.is_running(&owner));
    }
}
