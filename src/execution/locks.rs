// SPDX-License-Identifier: MIT
//! Per-resource execution serialization.
//!
//! At most one execution may be in flight per distinct target resource; a
//! second request for the same resource is rejected with `ResourceBusy`, not
//! queued. Unrelated resources execute concurrently.

use crate::error::{EngineError, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct ResourceLocks {
    in_flight: Mutex<HashSet<String>>,
}

impl ResourceLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the resource, or fail fast if an execution already holds it.
    /// The claim is released when the returned guard drops.
    pub fn try_acquire(self: &Arc<Self>, resource: &str) -> Result<ResourceGuard> {
        let mut in_flight = self.in_flight.lock().expect("resource locks poisoned");
        if !in_flight.insert(resource.to_string()) {
            return Err(EngineError::ResourceBusy {
                resource: resource.to_string(),
            });
        }
        Ok(ResourceGuard {
            locks: Arc::clone(self),
            resource: resource.to_string(),
        })
    }
}

#[derive(Debug)]
pub struct ResourceGuard {
    locks: Arc<ResourceLocks>,
    resource: String,
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        let mut in_flight = self
            .locks
            .in_flight
            .lock()
            .expect("resource locks poisoned");
        in_flight.remove(&self.resource);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_not_queued() {
        let locks = ResourceLocks::new();
        let _guard = locks.try_acquire("svc/api").unwrap();
        let err = locks.try_acquire("svc/api").unwrap_err();
        assert!(matches!(err, EngineError::ResourceBusy { resource } if resource == "svc/api"));
    }

    #[test]
    fn unrelated_resources_do_not_conflict() {
        let locks = ResourceLocks::new();
        let _a = locks.try_acquire("svc/api").unwrap();
        let _b = locks.try_acquire("svc/worker").unwrap();
    }

    #[test]
    fn dropping_the_guard_releases_the_resource() {
        let locks = ResourceLocks::new();
        drop(locks.try_acquire("svc/api").unwrap());
        locks.try_acquire("svc/api").unwrap();
    }
}
