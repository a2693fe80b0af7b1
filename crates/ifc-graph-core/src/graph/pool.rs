//! Bounded session pool.
//!
//! A worker holds at most one [`PooledSession`]; the semaphore caps how many
//! sessions are open against the store at once.

use super::{GraphSession, GraphStore};
use crate::error::{Error, Result};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Shared pool of store sessions
#[derive(Clone)]
pub struct SessionPool {
    store: Arc<dyn GraphStore>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl SessionPool {
    /// Create a pool with `size` concurrent sessions (at least one)
    pub fn new(store: Arc<dyn GraphStore>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            store,
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Maximum concurrent sessions
    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Wait for a free slot and open a session in it
    pub async fn acquire(&self) -> Result<PooledSession> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::internal("session pool closed"))?;
        let session = self.store.open_session().await?;
        Ok(PooledSession {
            session,
            _permit: permit,
        })
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("store", &self.store.name())
            .field("size", &self.size)
            .field("available", &self.available())
            .finish()
    }
}

/// A session checked out of a [`SessionPool`]; the slot frees on drop
pub struct PooledSession {
    session: Box<dyn GraphSession>,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    /// Borrow the session as a trait object
    pub fn session(&mut self) -> &mut dyn GraphSession {
        self.session.as_mut()
    }
}

impl Deref for PooledSession {
    type Target = dyn GraphSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}
