use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use fieldcache_core::ServiceId;

/// Tracks which services have a job in flight, so a caller never starts two at once.
#[derive(Debug, Clone, Default)]
pub struct ServiceLeases {
    active: Arc<Mutex<HashSet<ServiceId>>>,
}

/// Exclusive claim on a service id; released on drop.
#[derive(Debug)]
pub struct Lease {
    service_id: ServiceId,
    active: Arc<Mutex<HashSet<ServiceId>>>,
}

fn lock(set: &Mutex<HashSet<ServiceId>>) -> MutexGuard<'_, HashSet<ServiceId>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ServiceLeases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, service_id: &str) -> Option<Lease> {
        if !lock(&self.active).insert(service_id.to_string()) {
            return None;
        }
        Some(Lease {
            service_id: service_id.to_string(),
            active: self.active.clone(),
        })
    }

    pub fn is_active(&self, service_id: &str) -> bool {
        lock(&self.active).contains(service_id)
    }
}

impl Lease {
    pub fn service_id(&self) -> &str {
        &self.service_id
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.service_id);
    }
}
