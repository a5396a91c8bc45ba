use std::ops::Deref;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::BrowserSession;

/// Upper bound on concurrently leased sessions (and so on fan-out).
pub const MAX_POOL_SIZE: usize = 3;

/// Owns a fixed set of browser sessions and hands each one to a single task
/// at a time.
pub struct SessionPool {
    idle: Arc<Mutex<Vec<Arc<dyn BrowserSession>>>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl SessionPool {
    /// Build a pool from `sessions`. At most `MAX_POOL_SIZE` are kept.
    pub fn new(mut sessions: Vec<Arc<dyn BrowserSession>>) -> Result<Self> {
        if sessions.is_empty() {
            bail!("session pool needs at least one browser session");
        }
        sessions.truncate(MAX_POOL_SIZE);
        let size = sessions.len();
        Ok(Self {
            idle: Arc::new(Mutex::new(sessions)),
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Wait for an idle session. It goes back to the pool when the lease drops.
    pub async fn acquire(&self) -> Result<SessionLease> {
        let permit = self.permits.clone().acquire_owned().await?;
        let session = self
            .idle
            .lock()
            .expect("session pool lock poisoned")
            .pop();
        let Some(session) = session else {
            bail!("session pool permit granted with no idle session");
        };
        debug!(session = session.id(), "Session acquired");
        Ok(SessionLease {
            session: Some(session),
            idle: self.idle.clone(),
            _permit: permit,
        })
    }
}

/// Exclusive use of one pooled session.
pub struct SessionLease {
    session: Option<Arc<dyn BrowserSession>>,
    idle: Arc<Mutex<Vec<Arc<dyn BrowserSession>>>>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for SessionLease {
    type Target = dyn BrowserSession;

    fn deref(&self) -> &Self::Target {
        // Only taken in Drop.
        self.session.as_deref().expect("lease used after release")
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        // Return the session before the permit is released.
        if let Some(session) = self.session.take() {
            debug!(session = session.id(), "Session released");
            if let Ok(mut idle) = self.idle.lock() {
                idle.push(session);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::MockSession;

    fn sessions(n: usize) -> Vec<Arc<dyn BrowserSession>> {
        (0..n)
            .map(|i| Arc::new(MockSession::new(format!("s{i}"))) as Arc<dyn BrowserSession>)
            .collect()
    }

    #[test]
    fn size_is_capped() {
        let pool = SessionPool::new(sessions(5)).unwrap();
        assert_eq!(pool.size(), MAX_POOL_SIZE);
        assert!(SessionPool::new(Vec::new()).is_err());
    }

    #[tokio::test]
    async fn leases_are_exclusive_and_returned_on_drop() {
        let pool = SessionPool::new(sessions(2)).unwrap();
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(a.id(), b.id());

        let third = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(third.is_err(), "pool should be exhausted");

        let released = a.id().to_string();
        drop(a);
        let c = pool.acquire().await.unwrap();
        assert_eq!(c.id(), released);
    }
}
