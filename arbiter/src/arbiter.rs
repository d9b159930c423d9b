// Ranging arbiter - serializes one radio among many clients
//
// States: Disabled, and the Enabled children Idle / Ranging / Responding.
// Driver-unloaded and client-disconnected are handled the same way in every
// Enabled child, so dispatch routes them before looking at the state.

use crate::{
    config::ArbiterConfig,
    driver::RangingDriver,
    lease::{AcquireResult, ReleaseResult, ResponderLeaseManager},
    message::{Envelope, Event, FailureReason, Notification},
    notify::NotifySink,
    queue::{RangingRequest, RequestQueue},
    ranging::{self, RangingResult, RangingTarget, ResponderConfig},
    service::WeakArbiterHandle,
    session::{ClientSessionTable, FootprintKind},
    BurstId, ClientId, RequestKey,
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

/// Externally visible state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbiterState {
    Disabled,
    Idle,
    Ranging,
    Responding,
}

impl fmt::Display for ArbiterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArbiterState::Disabled => "disabled",
            ArbiterState::Idle => "idle",
            ArbiterState::Ranging => "ranging",
            ArbiterState::Responding => "responding",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestRef {
    pub client: ClientId,
    pub key: RequestKey,
}

/// Point-in-time view of the arbiter, for status output and tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbiterSnapshot {
    pub state: ArbiterState,
    pub in_flight: Option<RequestRef>,
    pub queued: Vec<RequestRef>,
    pub leases: Vec<RequestRef>,
    pub clients: Vec<ClientId>,
}

#[derive(Debug)]
struct InFlight {
    burst: BurstId,
    request: RangingRequest,
}

#[derive(Debug)]
enum State {
    Disabled,
    Idle,
    /// `in_flight` is empty only while an issue-next is pending in the inbox
    Ranging { in_flight: Option<InFlight> },
    Responding { config: ResponderConfig },
}

impl State {
    fn kind(&self) -> ArbiterState {
        match self {
            State::Disabled => ArbiterState::Disabled,
            State::Idle => ArbiterState::Idle,
            State::Ranging { .. } => ArbiterState::Ranging,
            State::Responding { .. } => ArbiterState::Responding,
        }
    }
}

/// The single mutator of queue, lease and session state.
///
/// Runs one inbox envelope at a time; the only way in is through an
/// [`ArbiterHandle`](crate::ArbiterHandle).
///
/// Any follow-up the arbiter posts to itself goes into the inbox before the
/// notification that could prompt a client to react.
#[derive(Debug)]
pub struct RangingArbiter {
    config: ArbiterConfig,
    state: State,
    queue: RequestQueue,
    leases: ResponderLeaseManager,
    sessions: ClientSessionTable,
    driver: Arc<dyn RangingDriver>,
    sink: Arc<dyn NotifySink>,
    inbox: WeakArbiterHandle,
    next_burst: u64,
}

impl RangingArbiter {
    pub(crate) fn new(
        config: ArbiterConfig,
        driver: Arc<dyn RangingDriver>,
        sink: Arc<dyn NotifySink>,
        inbox: WeakArbiterHandle,
    ) -> Self {
        Self {
            config,
            state: State::Disabled,
            queue: RequestQueue::new(),
            leases: ResponderLeaseManager::new(),
            sessions: ClientSessionTable::new(),
            driver,
            sink,
            inbox,
            next_burst: 1,
        }
    }

    pub fn state(&self) -> ArbiterState {
        self.state.kind()
    }

    pub fn snapshot(&self) -> ArbiterSnapshot {
        let to_ref = |r: &RangingRequest| RequestRef {
            client: r.client,
            key: r.key,
        };
        let in_flight = match &self.state {
            State::Ranging {
                in_flight: Some(flight),
            } => Some(to_ref(&flight.request)),
            _ => None,
        };

        ArbiterSnapshot {
            state: self.state(),
            in_flight,
            queued: self.queue.iter().map(to_ref).collect(),
            leases: self
                .leases
                .iter()
                .map(|l| RequestRef {
                    client: l.client,
                    key: l.key,
                })
                .collect(),
            clients: self.sessions.clients(),
        }
    }

    /// Footprint bookkeeping for one client, if registered
    pub fn session(&self, client: &ClientId) -> Option<&crate::session::ClientSession> {
        self.sessions.footprint(client)
    }

    pub(crate) fn dispatch(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Event(event) => self.handle_event(event),
            Envelope::IssueNext => self.on_issue_next(),
            Envelope::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            // The service loop stops before dispatching this
            Envelope::Shutdown => {}
        }
    }

    /// Handle one external event to completion
    pub fn handle_event(&mut self, event: Event) {
        debug!(event = event.name(), state = %self.state(), "handling event");

        match event {
            // Shared by every Enabled child
            Event::DriverUnloaded => self.on_driver_unloaded(),
            Event::ClientDisconnected { client } => self.on_client_disconnected(client),

            Event::DriverLoaded => self.on_driver_loaded(),
            Event::StartRanging {
                client,
                key,
                params,
                permitted,
            } => self.on_start_ranging(client, key, params, permitted),
            Event::StopRanging { client, key } => self.on_stop_ranging(client, key),
            Event::EnableResponder {
                client,
                key,
                permitted,
            } => self.on_enable_responder(client, key, permitted),
            Event::DisableResponder { client, key } => self.on_disable_responder(client, key),
            Event::DriverResult { burst, results } => self.on_driver_result(burst, results),
            Event::DriverFailed { burst, description } => self.on_driver_failed(burst, &description),
        }
    }

    fn on_driver_loaded(&mut self) {
        if let State::Disabled = self.state {
            self.transition(State::Idle);
        } else {
            debug!(state = %self.state(), "driver already loaded");
        }
    }

    fn on_driver_unloaded(&mut self) {
        let previous = std::mem::replace(&mut self.state, State::Disabled);
        let from = previous.kind();

        match previous {
            State::Disabled => return,
            State::Ranging {
                in_flight: Some(flight),
            } => self.abort_in_flight(flight),
            State::Responding { .. } => {
                // No hardware left to disable
                for lease in self.leases.clear() {
                    self.sessions.untrack(&lease.client, lease.key, FootprintKind::Lease);
                    self.notify(lease.client, Notification::Aborted { key: lease.key });
                }
            }
            State::Idle | State::Ranging { in_flight: None } => {}
        }

        for request in self.queue.drain() {
            self.sessions.untrack(&request.client, request.key, FootprintKind::Queued);
            self.notify(request.client, Notification::Aborted { key: request.key });
        }

        info!(%from, "driver unloaded, arbiter disabled");
    }

    fn on_start_ranging(
        &mut self,
        client: ClientId,
        key: RequestKey,
        params: Vec<RangingTarget>,
        permitted: bool,
    ) {
        if !permitted {
            self.fail(client, key, FailureReason::PermissionDenied, "ranging not permitted");
            return;
        }

        match self.state {
            State::Disabled => {
                self.fail(client, key, FailureReason::NotAvailable, "ranging is unavailable");
                return;
            }
            State::Responding { .. } => {
                self.fail(
                    client,
                    key,
                    FailureReason::InitiatorNotAllowedWhenResponderOn,
                    "responder is active",
                );
                return;
            }
            State::Idle | State::Ranging { .. } => {}
        }

        if params.is_empty() {
            self.fail(client, key, FailureReason::InvalidRequest, "no ranging targets");
            return;
        }
        if params.len() > self.config.max_targets_per_request {
            let description = format!(
                "{} targets exceeds limit of {}",
                params.len(),
                self.config.max_targets_per_request
            );
            self.fail(client, key, FailureReason::InvalidRequest, description);
            return;
        }

        let outstanding = self.sessions.footprint(&client);
        if outstanding.is_some_and(|s| s.owns_request(key)) {
            self.fail(client, key, FailureReason::InvalidRequest, "duplicate request key");
            return;
        }
        if outstanding.map_or(0, |s| s.outstanding_requests()) >= self.config.max_queued_per_client {
            self.fail(client, key, FailureReason::Unspecified, "too many outstanding requests");
            return;
        }

        self.sessions.track(client, key, FootprintKind::Queued);
        self.queue.enqueue(RangingRequest::new(client, key, params));
        debug!(%client, key, queued = self.queue.len(), "ranging request queued");

        if let State::Idle = self.state {
            self.transition(State::Ranging { in_flight: None });
            self.post_issue_next();
        }
    }

    fn on_stop_ranging(&mut self, client: ClientId, key: RequestKey) {
        match &mut self.state {
            State::Responding { .. } => {
                self.fail(
                    client,
                    key,
                    FailureReason::InitiatorNotAllowedWhenResponderOn,
                    "responder is active",
                );
            }
            State::Ranging { in_flight } => {
                if in_flight.as_ref().is_some_and(|f| f.request.is(&client, key)) {
                    if let Some(flight) = in_flight.take() {
                        info!(%client, key, burst = %flight.burst, "stopping in-flight ranging");
                        self.post_issue_next();
                        self.abort_in_flight(flight);
                    }
                } else if let Some(request) = self.queue.cancel(&client, key) {
                    debug!(%client, key, "queued ranging request cancelled");
                    self.sessions.untrack(&request.client, request.key, FootprintKind::Queued);
                    self.notify(client, Notification::Aborted { key });
                } else {
                    debug!(%client, key, "stop for unknown ranging request");
                }
            }
            State::Disabled | State::Idle => {
                debug!(%client, key, state = %self.state(), "nothing to stop");
            }
        }
    }

    fn on_issue_next(&mut self) {
        if !matches!(self.state, State::Ranging { in_flight: None }) {
            // Stale issue-next: something already took the radio, or it went away
            return;
        }

        let Some(request) = self.queue.dequeue_next() else {
            self.transition(State::Idle);
            return;
        };
        self.sessions.untrack(&request.client, request.key, FootprintKind::Queued);

        let burst = BurstId(self.next_burst);
        self.next_burst += 1;

        match self.driver.issue_ranging(burst, &request.params) {
            Ok(()) => {
                info!(client = %request.client, key = request.key, %burst, "ranging burst issued");
                self.sessions
                    .track(request.client, request.key, FootprintKind::InFlight);
                self.state = State::Ranging {
                    in_flight: Some(InFlight { burst, request }),
                };
            }
            Err(e) => {
                warn!(client = %request.client, key = request.key, error = %e, "driver rejected ranging request");
                self.post_issue_next();
                self.fail(
                    request.client,
                    request.key,
                    FailureReason::Unspecified,
                    e.to_string(),
                );
            }
        }
    }

    fn on_driver_result(&mut self, burst: BurstId, results: Vec<RangingResult>) {
        let Some(flight) = self.take_in_flight(burst) else {
            debug!(%burst, "dropping result for a burst that is no longer in flight");
            return;
        };

        let request = flight.request;
        let results = ranging::match_results(&request.params, results);
        info!(client = %request.client, key = request.key, %burst, "ranging completed");

        self.sessions
            .untrack(&request.client, request.key, FootprintKind::InFlight);
        self.post_issue_next();
        self.notify(
            request.client,
            Notification::Succeeded {
                key: request.key,
                results,
            },
        );
    }

    fn on_driver_failed(&mut self, burst: BurstId, description: &str) {
        let Some(flight) = self.take_in_flight(burst) else {
            debug!(%burst, "dropping failure for a burst that is no longer in flight");
            return;
        };

        let request = flight.request;
        warn!(client = %request.client, key = request.key, %burst, description, "ranging burst failed");

        // The radio may still be busy with it, e.g. after a watchdog timeout
        if let Err(e) = self.driver.cancel_ranging(&request.params) {
            warn!(%burst, error = %e, "driver failed to cancel failed burst");
        }
        self.sessions
            .untrack(&request.client, request.key, FootprintKind::InFlight);
        self.post_issue_next();
        self.fail(request.client, request.key, FailureReason::Unspecified, description);
    }

    fn on_enable_responder(&mut self, client: ClientId, key: RequestKey, permitted: bool) {
        if !permitted {
            self.fail(client, key, FailureReason::PermissionDenied, "responder not permitted");
            return;
        }

        match &self.state {
            State::Disabled => {
                self.fail(client, key, FailureReason::NotAvailable, "ranging is unavailable");
            }
            State::Ranging { .. } => {
                self.fail(client, key, FailureReason::NotAvailable, "ranging in progress");
            }
            State::Idle => match self.driver.enable_responder(self.config.responder_duration()) {
                Ok(config) => {
                    let acquired = self.leases.acquire(client, key);
                    debug_assert_eq!(acquired, AcquireResult::FirstLease);
                    self.sessions.track(client, key, FootprintKind::Lease);
                    info!(%client, key, mac = %config.mac_address, "responder enabled");

                    self.transition(State::Responding {
                        config: config.clone(),
                    });
                    self.notify(client, Notification::ResponderEnabled { key, config });
                }
                Err(e) => {
                    warn!(%client, key, error = %e, "driver failed to enable responder");
                    self.fail(client, key, FailureReason::Unspecified, e.to_string());
                }
            },
            State::Responding { config } => {
                let config = config.clone();
                self.leases.acquire(client, key);
                self.sessions.track(client, key, FootprintKind::Lease);
                debug!(%client, key, leases = self.leases.len(), "joined active responder");
                self.notify(client, Notification::ResponderEnabled { key, config });
            }
        }
    }

    fn on_disable_responder(&mut self, client: ClientId, key: RequestKey) {
        if !matches!(self.state, State::Responding { .. }) {
            debug!(%client, key, state = %self.state(), "no responder to disable");
            return;
        }

        match self.leases.release(&client, key) {
            ReleaseResult::NotHeld => {
                debug!(%client, key, "disable for a lease that is not held");
            }
            ReleaseResult::LeasesRemain => {
                self.sessions.untrack(&client, key, FootprintKind::Lease);
                debug!(%client, key, leases = self.leases.len(), "responder lease released");
                self.notify(client, Notification::ResponderDisableAcknowledged { key });
            }
            ReleaseResult::LastLeaseRemoved => {
                self.sessions.untrack(&client, key, FootprintKind::Lease);
                self.disable_responder_hardware();
                self.notify(client, Notification::ResponderDisableAcknowledged { key });
            }
        }
    }

    fn on_client_disconnected(&mut self, client: ClientId) {
        let Some(cleanup) = self.sessions.unregister(&client) else {
            debug!(%client, "disconnect from unregistered client");
            return;
        };

        let mut aborted_in_flight = None;
        if let State::Ranging { in_flight } = &mut self.state {
            if in_flight.as_ref().is_some_and(|f| f.request.client == client) {
                if let Some(flight) = in_flight.take() {
                    aborted_in_flight = Some(flight.request.key);
                    self.post_issue_next();
                    self.abort_in_flight(flight);
                }
            }
        }

        let queued = self.queue.remove_all_for_client(&client);
        for request in &queued {
            self.notify(client, Notification::Aborted { key: request.key });
        }

        let released = self.leases.release_all_for_client(&client);
        if released.result == ReleaseResult::LastLeaseRemoved {
            self.disable_responder_hardware();
        }

        if cleanup.queued.len() != queued.len()
            || cleanup.in_flight != aborted_in_flight
            || cleanup.leases.len() != released.keys.len()
        {
            warn!(%client, ?cleanup, "session footprint out of sync with arbiter state");
        }

        info!(
            %client,
            aborted = queued.len() + usize::from(aborted_in_flight.is_some()),
            leases = released.keys.len(),
            "client cleaned up"
        );
    }

    fn abort_in_flight(&mut self, flight: InFlight) {
        let request = flight.request;
        if let Err(e) = self.driver.cancel_ranging(&request.params) {
            // Any late result is dropped by burst id
            warn!(burst = %flight.burst, error = %e, "driver failed to cancel ranging");
        }
        self.sessions
            .untrack(&request.client, request.key, FootprintKind::InFlight);
        self.notify(request.client, Notification::Aborted { key: request.key });
    }

    fn disable_responder_hardware(&mut self) {
        if let Err(e) = self.driver.disable_responder() {
            warn!(error = %e, "driver failed to disable responder");
        }
        self.transition(State::Idle);
    }

    fn take_in_flight(&mut self, burst: BurstId) -> Option<InFlight> {
        match &mut self.state {
            State::Ranging { in_flight } if in_flight.as_ref().is_some_and(|f| f.burst == burst) => {
                in_flight.take()
            }
            _ => None,
        }
    }

    fn post_issue_next(&self) {
        let Some(inbox) = self.inbox.upgrade() else {
            debug!("every handle dropped, not issuing further bursts");
            return;
        };
        if let Err(e) = inbox.send(Envelope::IssueNext) {
            warn!(error = %e, "could not post issue-next");
        }
    }

    fn transition(&mut self, next: State) {
        let from = self.state();
        self.state = next;
        info!(%from, to = %self.state(), "arbiter state changed");
    }

    fn fail(
        &self,
        client: ClientId,
        key: RequestKey,
        reason: FailureReason,
        description: impl Into<String>,
    ) {
        let notification = Notification::failed(key, reason, description);
        debug!(%client, key, %reason, "request failed");
        self.notify(client, notification);
    }

    fn notify(&self, client: ClientId, notification: Notification) {
        self.sink.notify(client, notification);
    }
}
