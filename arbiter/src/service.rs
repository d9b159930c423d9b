use crate::{
    arbiter::{ArbiterSnapshot, RangingArbiter},
    config::ArbiterConfig,
    driver::{RangingDriver, WatchdogDriver},
    message::{Envelope, Event},
    notify::NotifySink,
    ranging::{RangingResult, RangingTarget},
    BurstId, ClientId, Error, RequestKey, Result,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Posting side of the arbiter's inbox.
///
/// Cheap to clone and usable from any thread. Every method only enqueues; the
/// event is handled later, in order, by the arbiter task.
#[derive(Debug, Clone)]
pub struct ArbiterHandle {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ArbiterHandle {
    pub(crate) fn channel() -> (Self, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, Inbox { rx })
    }

    pub(crate) fn send(&self, envelope: Envelope) -> Result<()> {
        self.tx.send(envelope).map_err(|_| Error::InboxClosed)
    }

    /// A handle that does not keep the arbiter running
    pub fn downgrade(&self) -> WeakArbiterHandle {
        WeakArbiterHandle {
            tx: self.tx.downgrade(),
        }
    }

    pub fn post(&self, event: Event) -> Result<()> {
        self.send(Envelope::Event(event))
    }

    pub fn driver_loaded(&self) -> Result<()> {
        self.post(Event::DriverLoaded)
    }

    pub fn driver_unloaded(&self) -> Result<()> {
        self.post(Event::DriverUnloaded)
    }

    pub fn start_ranging(
        &self,
        client: ClientId,
        key: RequestKey,
        params: Vec<RangingTarget>,
        permitted: bool,
    ) -> Result<()> {
        self.post(Event::StartRanging {
            client,
            key,
            params,
            permitted,
        })
    }

    pub fn stop_ranging(&self, client: ClientId, key: RequestKey) -> Result<()> {
        self.post(Event::StopRanging { client, key })
    }

    pub fn enable_responder(&self, client: ClientId, key: RequestKey, permitted: bool) -> Result<()> {
        self.post(Event::EnableResponder {
            client,
            key,
            permitted,
        })
    }

    pub fn disable_responder(&self, client: ClientId, key: RequestKey) -> Result<()> {
        self.post(Event::DisableResponder { client, key })
    }

    pub fn driver_result(&self, burst: BurstId, results: Vec<RangingResult>) -> Result<()> {
        self.post(Event::DriverResult { burst, results })
    }

    pub fn driver_failed(&self, burst: BurstId, description: impl Into<String>) -> Result<()> {
        self.post(Event::DriverFailed {
            burst,
            description: description.into(),
        })
    }

    pub fn client_disconnected(&self, client: ClientId) -> Result<()> {
        self.post(Event::ClientDisconnected { client })
    }

    /// State as of every event posted before this call
    pub async fn snapshot(&self) -> Result<ArbiterSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Envelope::Snapshot(reply))?;
        rx.await.map_err(|_| Error::InboxClosed)
    }

    /// Stop the arbiter after everything posted so far has been handled
    pub fn shutdown(&self) -> Result<()> {
        self.send(Envelope::Shutdown)
    }
}

/// Non-owning posting handle.
///
/// Held by the arbiter itself and by drivers it owns; once every
/// [`ArbiterHandle`] is gone the inbox closes and the arbiter task ends.
#[derive(Debug, Clone)]
pub struct WeakArbiterHandle {
    tx: mpsc::WeakUnboundedSender<Envelope>,
}

impl WeakArbiterHandle {
    pub fn upgrade(&self) -> Option<ArbiterHandle> {
        self.tx.upgrade().map(|tx| ArbiterHandle { tx })
    }
}

/// Receiving side of the inbox, owned by whoever runs the arbiter
#[derive(Debug)]
pub(crate) struct Inbox {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Inbox {
    pub(crate) async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    pub(crate) fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

/// Runs a [`RangingArbiter`] on its own tokio task.
///
/// Build the service first so the driver can be handed an [`ArbiterHandle`]
/// for posting results, then [`spawn`](Self::spawn) it.
#[derive(Debug)]
pub struct ArbiterService {
    config: ArbiterConfig,
    handle: ArbiterHandle,
    inbox: Inbox,
}

impl ArbiterService {
    pub fn new(config: ArbiterConfig) -> Self {
        let (handle, inbox) = ArbiterHandle::channel();
        Self {
            config,
            handle,
            inbox,
        }
    }

    pub fn handle(&self) -> ArbiterHandle {
        self.handle.clone()
    }

    pub fn spawn(self, driver: Arc<dyn RangingDriver>, sink: Arc<dyn NotifySink>) -> JoinHandle<()> {
        let Self {
            config,
            handle,
            mut inbox,
        } = self;

        let driver: Arc<dyn RangingDriver> = match config.ranging_timeout() {
            Some(timeout) => Arc::new(WatchdogDriver::new(driver, handle.downgrade(), timeout)),
            None => driver,
        };
        // Only callers' handles keep the inbox open
        let mut arbiter = RangingArbiter::new(config, driver, sink, handle.downgrade());
        drop(handle);

        tokio::spawn(async move {
            info!("ranging arbiter started");
            while let Some(envelope) = inbox.recv().await {
                if matches!(envelope, Envelope::Shutdown) {
                    debug!("shutdown requested");
                    break;
                }
                arbiter.dispatch(envelope);
            }
            info!(state = %arbiter.state(), "ranging arbiter stopped");
        })
    }
}
