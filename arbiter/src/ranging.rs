// Ranging payloads passed between clients and the driver.
//
// The arbiter never interprets targets or measurements; it only matches
// results back to the targets that were requested.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default primary channel for targets built with [`RangingTarget::new`]
pub const DEFAULT_FREQUENCY_MHZ: u32 = 5180;

/// Default number of frames per burst
pub const DEFAULT_BURST_SIZE: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// One peer to range against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangingTarget {
    pub peer: MacAddress,
    pub frequency_mhz: u32,
    pub burst_size: u8,
}

impl RangingTarget {
    pub fn new(peer: MacAddress) -> Self {
        Self {
            peer,
            frequency_mhz: DEFAULT_FREQUENCY_MHZ,
            burst_size: DEFAULT_BURST_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangingResult {
    pub peer: MacAddress,
    pub status: MeasurementStatus,
    pub distance_mm: i32,
    pub distance_std_dev_mm: i32,
    pub rssi_dbm: i8,
    pub successful_measurements: u8,
    pub measured_at: DateTime<Utc>,
}

impl RangingResult {
    pub fn success(peer: MacAddress, distance_mm: i32, rssi_dbm: i8) -> Self {
        Self {
            peer,
            status: MeasurementStatus::Success,
            distance_mm,
            distance_std_dev_mm: 0,
            rssi_dbm,
            successful_measurements: 1,
            measured_at: Utc::now(),
        }
    }

    /// Placeholder for a requested peer the driver did not report on
    pub fn failure(peer: MacAddress) -> Self {
        Self {
            peer,
            status: MeasurementStatus::Failure,
            distance_mm: 0,
            distance_std_dev_mm: 0,
            rssi_dbm: 0,
            successful_measurements: 0,
            measured_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == MeasurementStatus::Success
    }
}

/// Configuration of an active responder, shared by every lease holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderConfig {
    pub mac_address: MacAddress,
    pub frequency_mhz: u32,
    pub channel_width_mhz: u16,
}

/// Align driver results with the requested targets.
///
/// The output has exactly one entry per target, in request order. A target
/// the driver did not report on gets a [`RangingResult::failure`]; results for
/// peers that were never requested are discarded.
pub fn match_results(targets: &[RangingTarget], results: Vec<RangingResult>) -> Vec<RangingResult> {
    let mut pool: Vec<Option<RangingResult>> = results.into_iter().map(Some).collect();

    targets
        .iter()
        .map(|target| {
            pool.iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|r| r.peer == target.peer))
                .and_then(Option::take)
                .unwrap_or_else(|| RangingResult::failure(target.peer))
        })
        .collect()
}
