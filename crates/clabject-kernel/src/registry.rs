//! Registry boundary: where fragments and instances are stored.
//!
//! The kernel never owns storage. Fragments and instances carry an
//! `Arc<dyn Registry>` capability and reach persistence only through it.
//! Every method is a suspension point; everything else in the kernel is
//! synchronous in-memory computation.
//!
//! Implementations must redirect lookups by a bare singleton-root id to the
//! canonical derived id (see [`canonical_instance_id`]).
//!
//! [`canonical_instance_id`]: crate::identity::canonical_instance_id

use crate::error::{ClabjectError, Result};
use crate::handle::TypeHandle;
use crate::identity::Identity;
use crate::instance::DeepInstance;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

#[async_trait]
pub trait Registry: Send + Sync {
    // ── Types ──

    /// A fresh handle over the stored fragment, never a shared one.
    async fn get_type(&self, name: &str, identity: &Identity) -> Result<Option<TypeHandle>>;
    async fn get_singleton_types(&self, name: &str) -> Result<Vec<TypeHandle>>;
    async fn set_type(&self, handle: &TypeHandle) -> Result<()>;
    async fn get_references(&self) -> Result<Vec<TypeHandle>>;
    async fn delete_type_no_cascade(&self, name: &str, identity: &Identity) -> Result<()>;

    // ── Instances ──

    async fn get(&self, instance_id: &str) -> Result<Option<DeepInstance>>;
    async fn get_all(&self, type_name: &str) -> Result<Vec<DeepInstance>>;
    async fn set_instance(&self, instance: &DeepInstance) -> Result<()>;
    async fn delete_instance(&self, instance_id: &str) -> Result<()>;

    /// Persist a derived instance tree. Implementations that can should
    /// apply the batch all-or-nothing; the default writes one by one.
    async fn set_instances(&self, instances: &[&DeepInstance]) -> Result<()> {
        for instance in instances {
            self.set_instance(instance).await?;
        }
        Ok(())
    }

    // ── Mutual exclusion ──

    /// Exclusive lease on `key` until the returned guard drops.
    async fn lease(&self, _key: &str) -> Result<KeyLease> {
        Ok(KeyLease::unguarded())
    }
}

/// Guard returned by [`Registry::lease`].
#[derive(Debug)]
pub struct KeyLease {
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLease {
    pub fn unguarded() -> Self {
        Self { guard: None }
    }

    pub fn is_guarded(&self) -> bool {
        self.guard.is_some()
    }
}

/// Per-key async mutexes for registry implementations.
///
/// Entries nobody holds are pruned on the next acquisition.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> Result<KeyLease> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|e| ClabjectError::Storage(format!("lock table poisoned: {e}")))?;
            locks.retain(|held, lock| held == key || Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        Ok(KeyLease {
            guard: Some(lock.lock_owned().await),
        })
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
