//! Accept/reject gate for incoming fixes.

use crate::{TrackPoint, TrackerConfig, DEFAULT_ACCURACY_THRESHOLD_METERS};

/// Why a fix was not recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Reported accuracy is worse than the threshold.
    Inaccurate,
    /// NaN, infinite or out-of-range coordinates.
    InvalidCoordinates,
    /// Timestamp earlier than the last recorded point.
    OutOfOrder,
}

/// Stateless accuracy filter. Each fix is judged on its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointFilter {
    accuracy_threshold_meters: f32,
}

impl PointFilter {
    pub fn new(accuracy_threshold_meters: f32) -> Self {
        Self {
            accuracy_threshold_meters,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.accuracy_threshold_meters)
    }

    pub fn accuracy_threshold_meters(&self) -> f32 {
        self.accuracy_threshold_meters
    }

    /// True if the fix should be recorded.
    pub fn accept(&self, fix: &TrackPoint) -> bool {
        self.rejection(fix).is_none()
    }

    /// The reason a fix fails the gate, if it does.
    ///
    /// A fix exactly at the threshold passes. A NaN accuracy fails.
    pub fn rejection(&self, fix: &TrackPoint) -> Option<RejectReason> {
        if !fix.is_valid() {
            return Some(RejectReason::InvalidCoordinates);
        }
        if !(fix.accuracy <= self.accuracy_threshold_meters) {
            return Some(RejectReason::Inaccurate);
        }
        None
    }
}

impl Default for PointFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ACCURACY_THRESHOLD_METERS)
    }
}
