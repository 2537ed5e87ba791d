//! In-memory lock provider for testing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::lock::{LockError, LockGuard, LockName, LockProvider};

/// Mock implementation of the LockProvider trait.
///
/// Locks live in a shared set; [`MockLockProvider::hold`] simulates another
/// run owning a lock.
#[derive(Debug, Default, Clone)]
pub struct MockLockProvider {
    held: Arc<Mutex<HashSet<String>>>,
    acquired: Arc<Mutex<Vec<String>>>,
}

struct Release {
    name: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Drop for Release {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.name);
        }
    }
}

impl MockLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a lock as held by someone else, until [`release`](Self::release).
    pub fn hold(&self, name: LockName) {
        if let Ok(mut held) = self.held.lock() {
            held.insert(name.to_string());
        }
    }

    pub fn release(&self, name: LockName) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&name.to_string());
        }
    }

    pub fn is_held(&self, name: LockName) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(&name.to_string()))
            .unwrap_or(false)
    }

    /// Names successfully acquired, in order.
    pub fn acquired(&self) -> Vec<String> {
        self.acquired.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl LockProvider for MockLockProvider {
    fn try_acquire(&self, name: LockName) -> Result<LockGuard, LockError> {
        let name = name.to_string();
        let mut held = self.held.lock().map_err(|_| LockError::Contended { name: name.clone() })?;
        if !held.insert(name.clone()) {
            return Err(LockError::Contended { name });
        }
        drop(held);

        if let Ok(mut acquired) = self.acquired.lock() {
            acquired.push(name.clone());
        }
        Ok(LockGuard::new(
            name.clone(),
            Release {
                name,
                held: Arc::clone(&self.held),
            },
        ))
    }
}
