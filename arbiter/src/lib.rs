#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod arbiter;
pub mod config;
pub mod driver;
pub mod error;
pub mod lease;
pub mod message;
pub mod notify;
pub mod queue;
pub mod ranging;
pub mod service;
pub mod session;

pub mod test_utils;

pub use arbiter::{ArbiterSnapshot, ArbiterState, RangingArbiter, RequestRef};
pub use config::ArbiterConfig;
pub use driver::{RangingDriver, SimulatedDriver, WatchdogDriver};
pub use error::{Error, Result};
pub use message::{Event, FailureReason, Notification};
pub use notify::{ChannelSink, NotifySink};
pub use ranging::{MacAddress, MeasurementStatus, RangingResult, RangingTarget, ResponderConfig};
pub use service::{ArbiterHandle, ArbiterService, WeakArbiterHandle};

/// Caller-assigned request key, unique per (client, operation).
pub type RequestKey = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ClientId(pub uuid::Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one `issue_ranging` call handed to the driver.
///
/// Results and failures are routed back by burst rather than by request key,
/// so a result for a burst that was already aborted never reaches the client
/// that reused the key afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct BurstId(pub u64);

impl std::fmt::Display for BurstId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
