// Per-client footprint tracking
//
// Mirrors what the queue, the in-flight slot and the lease manager hold for
// each client, so a disconnect can be cleaned up without scanning them.

use crate::{ClientId, RequestKey};
use std::collections::{BTreeSet, HashMap};

/// Which collection a tracked key lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FootprintKind {
    Queued,
    InFlight,
    Lease,
}

/// Everything a client currently owns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSession {
    queued: BTreeSet<RequestKey>,
    in_flight: Option<RequestKey>,
    leases: BTreeSet<RequestKey>,
}

impl ClientSession {
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_none() && self.leases.is_empty()
    }

    /// Requests queued or executing
    pub fn outstanding_requests(&self) -> usize {
        self.queued.len() + usize::from(self.in_flight.is_some())
    }

    pub fn owns_request(&self, key: RequestKey) -> bool {
        self.queued.contains(&key) || self.in_flight == Some(key)
    }
}

/// What has to be torn down when a client goes away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCleanup {
    pub client: ClientId,
    pub queued: Vec<RequestKey>,
    pub in_flight: Option<RequestKey>,
    pub leases: Vec<RequestKey>,
}

/// Registered clients and their outstanding keys
#[derive(Debug, Default)]
pub struct ClientSessionTable {
    sessions: HashMap<ClientId, ClientSession>,
}

impl ClientSessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client; registering twice is harmless
    pub fn register(&mut self, client: ClientId) {
        self.sessions.entry(client).or_default();
    }

    /// Forget a client and describe what it still owned
    pub fn unregister(&mut self, client: &ClientId) -> Option<ClientCleanup> {
        let session = self.sessions.remove(client)?;
        Some(ClientCleanup {
            client: *client,
            queued: session.queued.into_iter().collect(),
            in_flight: session.in_flight,
            leases: session.leases.into_iter().collect(),
        })
    }

    /// Record that `client` now owns `key`, registering the client if needed
    pub fn track(&mut self, client: ClientId, key: RequestKey, kind: FootprintKind) {
        let session = self.sessions.entry(client).or_default();
        match kind {
            FootprintKind::Queued => {
                session.queued.insert(key);
            }
            FootprintKind::InFlight => {
                session.in_flight = Some(key);
            }
            FootprintKind::Lease => {
                session.leases.insert(key);
            }
        }
    }

    /// Record that `key` was destroyed. Unknown clients or keys are ignored.
    pub fn untrack(&mut self, client: &ClientId, key: RequestKey, kind: FootprintKind) {
        let Some(session) = self.sessions.get_mut(client) else {
            return;
        };
        match kind {
            FootprintKind::Queued => {
                session.queued.remove(&key);
            }
            FootprintKind::InFlight => {
                if session.in_flight == Some(key) {
                    session.in_flight = None;
                }
            }
            FootprintKind::Lease => {
                session.leases.remove(&key);
            }
        }
    }

    pub fn footprint(&self, client: &ClientId) -> Option<&ClientSession> {
        self.sessions.get(client)
    }

    /// Registered clients in a stable order
    pub fn clients(&self) -> Vec<ClientId> {
        let mut clients: Vec<_> = self.sessions.keys().copied().collect();
        clients.sort();
        clients
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
