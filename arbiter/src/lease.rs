// Responder lease management
//
// The responder role is shared: every client that enables it holds a lease,
// and the hardware stays in responder mode while at least one lease exists.

use crate::{ClientId, RequestKey};

/// A client's claim on the responder role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponderLease {
    pub client: ClientId,
    pub key: RequestKey,
}

/// Outcome of [`ResponderLeaseManager::acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// Count went from 0 to 1; the caller must enable the hardware
    FirstLease,
    /// The responder is already on; reuse its configuration
    AdditionalLease,
}

/// Outcome of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseResult {
    /// Count reached 0; the caller must disable the hardware
    LastLeaseRemoved,
    /// Other leases still hold the responder on
    LeasesRemain,
    /// Nothing matched, nothing changed
    NotHeld,
}

/// Leases dropped by [`ResponderLeaseManager::release_all_for_client`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkRelease {
    pub keys: Vec<RequestKey>,
    pub result: ReleaseResult,
}

/// Reference-counted responder leases, in acquisition order
#[derive(Debug, Default)]
pub struct ResponderLeaseManager {
    leases: Vec<ResponderLease>,
}

impl ResponderLeaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a lease.
    /// A duplicate (client, key) is a no-op that reports `AdditionalLease`.
    pub fn acquire(&mut self, client: ClientId, key: RequestKey) -> AcquireResult {
        if self.holds(&client, key) {
            return AcquireResult::AdditionalLease;
        }

        let first = self.leases.is_empty();
        self.leases.push(ResponderLease { client, key });

        if first {
            AcquireResult::FirstLease
        } else {
            AcquireResult::AdditionalLease
        }
    }

    /// Remove one lease
    pub fn release(&mut self, client: &ClientId, key: RequestKey) -> ReleaseResult {
        let before = self.leases.len();
        self.leases.retain(|l| !(l.client == *client && l.key == key));
        self.release_outcome(before)
    }

    /// Remove every lease held by `client`
    pub fn release_all_for_client(&mut self, client: &ClientId) -> BulkRelease {
        let before = self.leases.len();
        let mut keys = Vec::new();
        self.leases.retain(|l| {
            if l.client == *client {
                keys.push(l.key);
                false
            } else {
                true
            }
        });

        BulkRelease {
            keys,
            result: self.release_outcome(before),
        }
    }

    /// Drop every lease without signaling.
    /// Used when the driver went away and there is no hardware left to disable.
    pub fn clear(&mut self) -> Vec<ResponderLease> {
        std::mem::take(&mut self.leases)
    }

    pub fn has_any(&self) -> bool {
        !self.leases.is_empty()
    }

    pub fn holds(&self, client: &ClientId, key: RequestKey) -> bool {
        self.leases.iter().any(|l| l.client == *client && l.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResponderLease> {
        self.leases.iter()
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    fn release_outcome(&self, before: usize) -> ReleaseResult {
        if self.leases.len() == before {
            ReleaseResult::NotHeld
        } else if self.leases.is_empty() {
            ReleaseResult::LastLeaseRemoved
        } else {
            ReleaseResult::LeasesRemain
        }
    }
}
