use crate::{
    arbiter::ArbiterSnapshot,
    ranging::{RangingResult, RangingTarget, ResponderConfig},
    BurstId, ClientId, RequestKey,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;

/// Inbound events accepted by the arbiter's inbox
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // Lifecycle
    DriverLoaded,
    DriverUnloaded,

    // Initiator role
    StartRanging {
        client: ClientId,
        key: RequestKey,
        params: Vec<RangingTarget>,
        permitted: bool,
    },
    StopRanging {
        client: ClientId,
        key: RequestKey,
    },

    // Responder role
    EnableResponder {
        client: ClientId,
        key: RequestKey,
        permitted: bool,
    },
    DisableResponder {
        client: ClientId,
        key: RequestKey,
    },

    // Driver callbacks
    DriverResult {
        burst: BurstId,
        results: Vec<RangingResult>,
    },
    DriverFailed {
        burst: BurstId,
        description: String,
    },

    ClientDisconnected {
        client: ClientId,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::DriverLoaded => "driver_loaded",
            Event::DriverUnloaded => "driver_unloaded",
            Event::StartRanging { .. } => "start_ranging",
            Event::StopRanging { .. } => "stop_ranging",
            Event::EnableResponder { .. } => "enable_responder",
            Event::DisableResponder { .. } => "disable_responder",
            Event::DriverResult { .. } => "driver_result",
            Event::DriverFailed { .. } => "driver_failed",
            Event::ClientDisconnected { .. } => "client_disconnected",
        }
    }
}

/// Everything that travels through the inbox, including messages only the
/// arbiter and its service may post.
#[derive(Debug)]
pub(crate) enum Envelope {
    Event(Event),
    IssueNext,
    Snapshot(oneshot::Sender<ArbiterSnapshot>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidRequest,
    NotAvailable,
    Unspecified,
    InitiatorNotAllowedWhenResponderOn,
    PermissionDenied,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureReason::InvalidRequest => "invalid request",
            FailureReason::NotAvailable => "not available",
            FailureReason::Unspecified => "unspecified",
            FailureReason::InitiatorNotAllowedWhenResponderOn => {
                "initiator not allowed when responder on"
            }
            FailureReason::PermissionDenied => "permission denied",
        };
        f.write_str(name)
    }
}

/// Outbound notifications delivered through the notify sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Succeeded {
        key: RequestKey,
        results: Vec<RangingResult>,
    },
    Failed {
        key: RequestKey,
        reason: FailureReason,
        description: String,
    },
    Aborted {
        key: RequestKey,
    },
    ResponderEnabled {
        key: RequestKey,
        config: ResponderConfig,
    },
    ResponderDisableAcknowledged {
        key: RequestKey,
    },
}

impl Notification {
    pub fn failed(key: RequestKey, reason: FailureReason, description: impl Into<String>) -> Self {
        Notification::Failed {
            key,
            reason,
            description: description.into(),
        }
    }

    pub fn key(&self) -> RequestKey {
        match self {
            Notification::Succeeded { key, .. }
            | Notification::Failed { key, .. }
            | Notification::Aborted { key }
            | Notification::ResponderEnabled { key, .. }
            | Notification::ResponderDisableAcknowledged { key } => *key,
        }
    }

    /// Nothing further is delivered for this key after a terminal reply
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Notification::Succeeded { .. } | Notification::Failed { .. } | Notification::Aborted { .. }
        )
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Notification::Failed { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
