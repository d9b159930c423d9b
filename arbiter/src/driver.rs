use crate::{
    ranging::{MacAddress, RangingResult, RangingTarget, ResponderConfig},
    service::{ArbiterHandle, WeakArbiterHandle},
    BurstId, Error, Result,
};
use rand::Rng;
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

/// The radio capability the arbiter serializes access to.
///
/// Calls are made from inside event handling and must not block. A burst that
/// `issue_ranging` accepts completes later, when the driver posts
/// `DriverResult` or `DriverFailed` for the same burst through an
/// [`ArbiterHandle`].
pub trait RangingDriver: Send + Sync + std::fmt::Debug {
    fn issue_ranging(&self, burst: BurstId, targets: &[RangingTarget]) -> Result<()>;

    fn cancel_ranging(&self, targets: &[RangingTarget]) -> Result<()>;

    /// A zero `duration` keeps the responder up until it is disabled
    fn enable_responder(&self, duration: Duration) -> Result<ResponderConfig>;

    fn disable_responder(&self) -> Result<()>;
}

impl<D: RangingDriver + ?Sized> RangingDriver for Arc<D> {
    fn issue_ranging(&self, burst: BurstId, targets: &[RangingTarget]) -> Result<()> {
        (**self).issue_ranging(burst, targets)
    }

    fn cancel_ranging(&self, targets: &[RangingTarget]) -> Result<()> {
        (**self).cancel_ranging(targets)
    }

    fn enable_responder(&self, duration: Duration) -> Result<ResponderConfig> {
        (**self).enable_responder(duration)
    }

    fn disable_responder(&self) -> Result<()> {
        (**self).disable_responder()
    }
}

/// Injects a synthetic `DriverFailed` when an accepted burst runs too long.
///
/// If the real result wins the race, the arbiter sees the timeout for a burst
/// that is no longer in flight and drops it.
#[derive(Debug)]
pub struct WatchdogDriver<D> {
    inner: D,
    handle: WeakArbiterHandle,
    timeout: Duration,
}

impl<D: RangingDriver> WatchdogDriver<D> {
    pub fn new(inner: D, handle: WeakArbiterHandle, timeout: Duration) -> Self {
        Self {
            inner,
            handle,
            timeout,
        }
    }

    fn arm(&self, burst: BurstId) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(%burst, "no tokio runtime, ranging watchdog not armed");
            return;
        };

        let handle = self.handle.clone();
        let timeout = self.timeout;
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            // The inbox is gone once the arbiter shut down
            let Some(handle) = handle.upgrade() else {
                return;
            };
            debug!(%burst, ?timeout, "ranging watchdog fired");
            let _ = handle.driver_failed(burst, format!("ranging timed out after {timeout:?}"));
        });
    }
}

impl<D: RangingDriver> RangingDriver for WatchdogDriver<D> {
    fn issue_ranging(&self, burst: BurstId, targets: &[RangingTarget]) -> Result<()> {
        self.inner.issue_ranging(burst, targets)?;
        self.arm(burst);
        Ok(())
    }

    fn cancel_ranging(&self, targets: &[RangingTarget]) -> Result<()> {
        self.inner.cancel_ranging(targets)
    }

    fn enable_responder(&self, duration: Duration) -> Result<ResponderConfig> {
        self.inner.enable_responder(duration)
    }

    fn disable_responder(&self) -> Result<()> {
        self.inner.disable_responder()
    }
}

/// Stand-in radio: reports plausible results after `delay`, or rejects
/// a fraction of bursts outright.
#[derive(Debug)]
pub struct SimulatedDriver {
    handle: WeakArbiterHandle,
    delay: Duration,
    reject_rate: f64,
    responder: ResponderConfig,
}

impl SimulatedDriver {
    /// A `reject_rate` outside `0.0..=1.0` is clamped; NaN means never reject
    pub fn new(handle: &ArbiterHandle, delay: Duration, reject_rate: f64) -> Self {
        let reject_rate = if reject_rate.is_nan() {
            0.0
        } else {
            reject_rate.clamp(0.0, 1.0)
        };
        Self {
            handle: handle.downgrade(),
            delay,
            reject_rate,
            responder: ResponderConfig {
                mac_address: MacAddress([0x02, 0x52, 0x54, 0x54, 0x00, 0x01]),
                frequency_mhz: crate::ranging::DEFAULT_FREQUENCY_MHZ,
                channel_width_mhz: 80,
            },
        }
    }
}

impl RangingDriver for SimulatedDriver {
    fn issue_ranging(&self, burst: BurstId, targets: &[RangingTarget]) -> Result<()> {
        let mut rng = rand::rng();
        if rng.random_bool(self.reject_rate) {
            return Err(Error::driver("issue_ranging", "simulated rejection"));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::driver("issue_ranging", e.to_string()))?;

        let results: Vec<RangingResult> = targets
            .iter()
            .map(|t| {
                RangingResult::success(
                    t.peer,
                    rng.random_range(500..20_000),
                    rng.random_range(-80..-30),
                )
            })
            .collect();

        let handle = self.handle.upgrade().ok_or(Error::InboxClosed)?;
        let delay = self.delay;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = handle.driver_result(burst, results);
        });
        Ok(())
    }

    fn cancel_ranging(&self, _targets: &[RangingTarget]) -> Result<()> {
        // The pending result is dropped by the arbiter when it arrives
        Ok(())
    }

    fn enable_responder(&self, _duration: Duration) -> Result<ResponderConfig> {
        Ok(self.responder.clone())
    }

    fn disable_responder(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Envelope, Event};

    #[tokio::test(start_paused = true)]
    async fn test_simulated_nan_rate_never_rejects() {
        let (handle, mut inbox) = ArbiterHandle::channel();
        let driver = SimulatedDriver::new(&handle, Duration::from_millis(5), f64::NAN);
        let targets = [RangingTarget::new(MacAddress([0x02, 0, 0, 0, 0, 1]))];

        for n in 0..16 {
            driver.issue_ranging(BurstId(n), &targets).unwrap();
        }
        for _ in 0..16 {
            match inbox.recv().await {
                Some(Envelope::Event(Event::DriverResult { results, .. })) => {
                    assert_eq!(results.len(), 1);
                }
                other => panic!("Expected DriverResult, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_simulated_rate_is_clamped() {
        let (handle, _inbox) = ArbiterHandle::channel();
        let driver = SimulatedDriver::new(&handle, Duration::ZERO, 7.0);
        assert_eq!(driver.reject_rate, 1.0);
        assert!(driver
            .issue_ranging(BurstId(1), &[RangingTarget::new(MacAddress([0; 6]))])
            .is_err());
    }
}
