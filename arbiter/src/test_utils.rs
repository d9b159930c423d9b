use crate::{
    arbiter::{ArbiterSnapshot, ArbiterState, RangingArbiter},
    config::ArbiterConfig,
    driver::RangingDriver,
    message::{Envelope, Event, Notification},
    notify::NotifySink,
    ranging::{MacAddress, RangingResult, RangingTarget, ResponderConfig},
    service::{ArbiterHandle, Inbox},
    BurstId, ClientId, Error, RequestKey, Result,
};
use parking_lot::Mutex;
use std::{collections::HashSet, fmt, sync::Arc, time::Duration};

/// Target with a locally administered MAC ending in `n`
pub fn target(n: u8) -> RangingTarget {
    RangingTarget::new(MacAddress([0x02, 0x00, 0x00, 0x00, 0x00, n]))
}

/// Client with a fixed id, so ordering in snapshots is predictable
pub fn client(n: u128) -> ClientId {
    ClientId(uuid::Uuid::from_u128(n))
}

pub fn default_responder_config() -> ResponderConfig {
    ResponderConfig {
        mac_address: MacAddress([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee]),
        frequency_mhz: 5180,
        channel_width_mhz: 80,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    IssueRanging {
        burst: BurstId,
        targets: Vec<RangingTarget>,
    },
    CancelRanging {
        targets: Vec<RangingTarget>,
    },
    EnableResponder {
        duration: Duration,
    },
    DisableResponder,
}

/// Records every call; rejections can be scripted per call or per peer
#[derive(Debug)]
pub struct MockDriver {
    calls: Mutex<Vec<DriverCall>>,
    reject_issues: Mutex<usize>,
    rejected_peers: Mutex<HashSet<MacAddress>>,
    fail_enable: Mutex<bool>,
    responder_config: ResponderConfig,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reject_issues: Mutex::new(0),
            rejected_peers: Mutex::new(HashSet::new()),
            fail_enable: Mutex::new(false),
            responder_config: default_responder_config(),
        }
    }

    /// Reject the next `n` calls to `issue_ranging`
    pub fn reject_next_issues(&self, n: usize) {
        *self.reject_issues.lock() = n;
    }

    /// Reject every request that includes `peer`
    pub fn reject_peer(&self, peer: MacAddress) {
        self.rejected_peers.lock().insert(peer);
    }

    pub fn fail_next_enable(&self) {
        *self.fail_enable.lock() = true;
    }

    pub fn responder_config(&self) -> &ResponderConfig {
        &self.responder_config
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn issued_bursts(&self) -> Vec<BurstId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                DriverCall::IssueRanging { burst, .. } => Some(*burst),
                _ => None,
            })
            .collect()
    }

    pub fn last_burst(&self) -> Option<BurstId> {
        self.issued_bursts().last().copied()
    }

    pub fn issue_count(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::IssueRanging { .. }))
    }

    pub fn cancel_count(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::CancelRanging { .. }))
    }

    pub fn enable_count(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::EnableResponder { .. }))
    }

    pub fn disable_count(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::DisableResponder))
    }

    fn count(&self, predicate: impl Fn(&DriverCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RangingDriver for MockDriver {
    fn issue_ranging(&self, burst: BurstId, targets: &[RangingTarget]) -> Result<()> {
        self.calls.lock().push(DriverCall::IssueRanging {
            burst,
            targets: targets.to_vec(),
        });

        let mut remaining = self.reject_issues.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(Error::driver("issue_ranging", "scripted rejection"));
        }

        let rejected = self.rejected_peers.lock();
        if targets.iter().any(|t| rejected.contains(&t.peer)) {
            return Err(Error::driver("issue_ranging", "peer rejected"));
        }
        Ok(())
    }

    fn cancel_ranging(&self, targets: &[RangingTarget]) -> Result<()> {
        self.calls.lock().push(DriverCall::CancelRanging {
            targets: targets.to_vec(),
        });
        Ok(())
    }

    fn enable_responder(&self, duration: Duration) -> Result<ResponderConfig> {
        self.calls.lock().push(DriverCall::EnableResponder { duration });

        let mut fail = self.fail_enable.lock();
        if *fail {
            *fail = false;
            return Err(Error::driver("enable_responder", "scripted failure"));
        }
        Ok(self.responder_config.clone())
    }

    fn disable_responder(&self) -> Result<()> {
        self.calls.lock().push(DriverCall::DisableResponder);
        Ok(())
    }
}

type ReactFn = Box<dyn Fn(ClientId, &Notification) -> Option<Event> + Send + Sync>;

/// A client that answers a notification by posting another event
struct Reaction {
    handle: ArbiterHandle,
    react: ReactFn,
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction").finish_non_exhaustive()
    }
}

/// Keeps every notification in delivery order
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<(ClientId, Notification)>>,
    reaction: Mutex<Option<Reaction>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post whatever `react` returns, from inside `notify`, the way a client
    /// on another thread could answer before the arbiter's next turn
    pub fn react_with<F>(&self, handle: ArbiterHandle, react: F)
    where
        F: Fn(ClientId, &Notification) -> Option<Event> + Send + Sync + 'static,
    {
        *self.reaction.lock() = Some(Reaction {
            handle,
            react: Box::new(react),
        });
    }

    pub fn all(&self) -> Vec<(ClientId, Notification)> {
        self.delivered.lock().clone()
    }

    pub fn take(&self) -> Vec<(ClientId, Notification)> {
        std::mem::take(&mut *self.delivered.lock())
    }

    pub fn for_client(&self, client: &ClientId) -> Vec<Notification> {
        self.delivered
            .lock()
            .iter()
            .filter(|(c, _)| c == client)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn aborted_keys(&self, client: &ClientId) -> Vec<RequestKey> {
        self.for_client(client)
            .iter()
            .filter_map(|n| match n {
                Notification::Aborted { key } => Some(*key),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.delivered.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.delivered.lock().is_empty()
    }
}

impl NotifySink for RecordingSink {
    fn notify(&self, client: ClientId, notification: Notification) {
        let follow_up = self
            .reaction
            .lock()
            .as_ref()
            .and_then(|r| (r.react)(client, &notification).map(|event| (r.handle.clone(), event)));
        self.delivered.lock().push((client, notification));

        if let Some((handle, event)) = follow_up {
            let _ = handle.post(event);
        }
    }
}

/// Drives an arbiter synchronously against a [`MockDriver`].
///
/// Every helper posts one event and then drains the inbox, including any
/// issue-next the arbiter posted to itself, before returning.
#[derive(Debug)]
pub struct Harness {
    pub driver: Arc<MockDriver>,
    pub sink: Arc<RecordingSink>,
    arbiter: RangingArbiter,
    handle: ArbiterHandle,
    inbox: Inbox,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ArbiterConfig::default())
    }

    /// Harness whose driver is already loaded
    pub fn enabled() -> Self {
        let mut harness = Self::new();
        harness.load();
        harness
    }

    pub fn with_config(config: ArbiterConfig) -> Self {
        let (handle, inbox) = ArbiterHandle::channel();
        let driver = Arc::new(MockDriver::new());
        let sink = Arc::new(RecordingSink::new());
        let arbiter = RangingArbiter::new(config, driver.clone(), sink.clone(), handle.downgrade());

        Self {
            driver,
            sink,
            arbiter,
            handle,
            inbox,
        }
    }

    /// Handle for posting without draining, e.g. to queue up a race
    pub fn handle(&self) -> ArbiterHandle {
        self.handle.clone()
    }

    /// Have the recording sink answer notifications with follow-up events
    pub fn react_with<F>(&self, react: F)
    where
        F: Fn(ClientId, &Notification) -> Option<Event> + Send + Sync + 'static,
    {
        self.sink.react_with(self.handle.clone(), react);
    }

    pub fn post(&mut self, event: Event) {
        self.handle
            .post(event)
            .expect("harness owns the inbox");
        self.run_until_idle();
    }

    pub(crate) fn post_internal(&mut self, envelope: Envelope) {
        self.handle
            .send(envelope)
            .expect("harness owns the inbox");
        self.run_until_idle();
    }

    /// Handle everything in the inbox; returns how many envelopes ran
    pub fn run_until_idle(&mut self) -> usize {
        let mut handled = 0;
        while let Some(envelope) = self.inbox.try_recv() {
            self.arbiter.dispatch(envelope);
            handled += 1;
        }
        handled
    }

    pub fn load(&mut self) {
        self.post(Event::DriverLoaded);
    }

    pub fn unload(&mut self) {
        self.post(Event::DriverUnloaded);
    }

    pub fn start(&mut self, client: ClientId, key: RequestKey, params: Vec<RangingTarget>) {
        self.post(Event::StartRanging {
            client,
            key,
            params,
            permitted: true,
        });
    }

    pub fn stop(&mut self, client: ClientId, key: RequestKey) {
        self.post(Event::StopRanging { client, key });
    }

    pub fn enable(&mut self, client: ClientId, key: RequestKey) {
        self.post(Event::EnableResponder {
            client,
            key,
            permitted: true,
        });
    }

    pub fn disable(&mut self, client: ClientId, key: RequestKey) {
        self.post(Event::DisableResponder { client, key });
    }

    pub fn result(&mut self, burst: BurstId, results: Vec<RangingResult>) {
        self.post(Event::DriverResult { burst, results });
    }

    /// Complete the in-flight burst with a success for every target
    pub fn complete_in_flight(&mut self) -> Option<BurstId> {
        let (burst, targets) = self.driver.calls().into_iter().rev().find_map(|call| match call {
            DriverCall::IssueRanging { burst, targets } => Some((burst, targets)),
            _ => None,
        })?;
        let results = targets
            .iter()
            .map(|t| RangingResult::success(t.peer, 1_000, -50))
            .collect();
        self.result(burst, results);
        Some(burst)
    }

    pub fn fail_burst(&mut self, burst: BurstId, description: &str) {
        self.post(Event::DriverFailed {
            burst,
            description: description.to_string(),
        });
    }

    pub fn disconnect(&mut self, client: ClientId) {
        self.post(Event::ClientDisconnected { client });
    }

    pub fn state(&self) -> ArbiterState {
        self.arbiter.state()
    }

    pub fn snapshot(&self) -> ArbiterSnapshot {
        self.arbiter.snapshot()
    }

    pub fn arbiter(&self) -> &RangingArbiter {
        &self.arbiter
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
