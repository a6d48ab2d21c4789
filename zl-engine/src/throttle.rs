use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting semaphore bounding simultaneous network downloads (default 3). Reconfiguring replaces
/// the semaphore behind an `ArcSwap` rather than mutating a shared counter, mirroring
/// `peoci::ocidist::Client`'s use of `ArcSwap` for its auth store: permits already checked out of
/// the old semaphore remain valid and simply drain, they are never revoked mid-flight.
pub struct Throttle {
    inner: ArcSwap<Semaphore>,
}

impl Throttle {
    pub fn new(permits: usize) -> Self {
        assert!(permits > 0, "throttle permits must be strictly positive");
        Self {
            inner: ArcSwap::from_pointee(Semaphore::new(permits)),
        }
    }

    pub fn reconfigure(&self, permits: usize) {
        assert!(permits > 0, "throttle permits must be strictly positive");
        self.inner.store(Arc::new(Semaphore::new(permits)));
    }

    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        let semaphore = self.inner.load_full();
        semaphore
            .acquire_owned()
            .await
            .expect("throttle semaphore is never closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serializes_at_configured_capacity() {
        let throttle = Throttle::new(1);
        let first = throttle.acquire().await;
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), throttle.acquire())
                .await
                .is_err()
        );
        drop(first);
        let _second =
            tokio::time::timeout(std::time::Duration::from_millis(20), throttle.acquire())
                .await
                .expect("permit released");
    }

    #[tokio::test]
    async fn reconfigure_grows_capacity() {
        let throttle = Throttle::new(1);
        let _first = throttle.acquire().await;
        throttle.reconfigure(2);
        let _second =
            tokio::time::timeout(std::time::Duration::from_millis(20), throttle.acquire())
                .await
                .expect("reconfigured throttle has a free permit");
    }
}
