// Pending initiator requests, in arrival order

use crate::{ranging::RangingTarget, ClientId, RequestKey};
use std::collections::VecDeque;

/// A client's request to range against one or more targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangingRequest {
    pub client: ClientId,
    pub key: RequestKey,
    pub params: Vec<RangingTarget>,
}

impl RangingRequest {
    pub fn new(client: ClientId, key: RequestKey, params: Vec<RangingTarget>) -> Self {
        Self { client, key, params }
    }

    /// Whether this request belongs to `client` under `key`
    pub fn is(&self, client: &ClientId, key: RequestKey) -> bool {
        self.client == *client && self.key == key
    }
}

/// FIFO buffer of requests waiting for the radio.
///
/// Only the owning arbiter touches the queue. It never calls the driver or
/// sends notifications; removing an entry just hands it back to the caller.
#[derive(Debug, Default)]
pub struct RequestQueue {
    entries: VecDeque<RangingRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request to the tail.
    /// Params must already be validated as non-empty.
    pub fn enqueue(&mut self, request: RangingRequest) {
        debug_assert!(!request.params.is_empty(), "empty requests are rejected before enqueue");
        self.entries.push_back(request);
    }

    /// Remove and return the head
    pub fn dequeue_next(&mut self) -> Option<RangingRequest> {
        self.entries.pop_front()
    }

    /// Remove a still-queued request.
    /// Returns `None` if it was never queued or is already executing.
    pub fn cancel(&mut self, client: &ClientId, key: RequestKey) -> Option<RangingRequest> {
        let position = self.entries.iter().position(|r| r.is(client, key))?;
        self.entries.remove(position)
    }

    /// Remove every request owned by `client`, keeping their relative order
    pub fn remove_all_for_client(&mut self, client: &ClientId) -> Vec<RangingRequest> {
        let (removed, kept): (VecDeque<_>, VecDeque<_>) =
            std::mem::take(&mut self.entries)
                .into_iter()
                .partition(|r| r.client == *client);
        self.entries = kept;
        removed.into()
    }

    /// Drain everything, head first
    pub fn drain(&mut self) -> Vec<RangingRequest> {
        self.entries.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RangingRequest> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
