//! Admission control: one request per user at a time, at most M in flight.
//!
//! A message first takes its user's lock, then one permit from the shared
//! semaphore. Release happens in the opposite order. Lock entries are
//! created on first use and kept for the life of the process.

use parley_core::ids::UserId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

#[derive(Debug, thiserror::Error)]
#[error("Admission is closed")]
pub struct AdmissionClosed;

pub struct Admission {
    locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// Held while a message is being worked on.
///
/// Dropping it returns the permit first, then unlocks the user.
pub struct AdmissionGuard {
    permit: Option<OwnedSemaphorePermit>,
    lock: Option<OwnedMutexGuard<()>>,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        drop(self.permit.take());
        drop(self.lock.take());
    }
}

impl Admission {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            locks: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for the user's lock, then for a permit.
    pub async fn admit(&self, user: &UserId) -> Result<AdmissionGuard, AdmissionClosed> {
        let user_lock = self.user_lock(user);
        let lock = user_lock.lock_owned().await;
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AdmissionClosed)?;

        Ok(AdmissionGuard {
            permit: Some(permit),
            lock: Some(lock),
        })
    }

    /// Refuse all further admissions. Requests already admitted finish.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently handed out.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Users that have ever been admitted.
    pub fn tracked_users(&self) -> usize {
        self.locks().len()
    }

    fn user_lock(&self, user: &UserId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks()
            .entry(user.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<UserId, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
