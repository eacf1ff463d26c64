//! # Hike Tracker
//!
//! Crash-safe GPS track recording and analysis for hiking.
//!
//! This library provides:
//! - A recording session state machine fed by a stream of location fixes
//! - Incremental distance, elevation and speed statistics
//! - Durable track storage with a single crash-recovery autosave slot
//! - Douglas-Peucker simplification and GPX export
//!
//! ## Features
//!
//! - **`persistence`** (default) - SQLite track store
//! - **`parallel`** - Decode stored tracks in parallel with rayon
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use hike_tracker::{FileTrackStore, SessionController, TrackPoint, TrackerConfig};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = FileTrackStore::open(dir.path()).unwrap();
//! let controller = SessionController::new(store, TrackerConfig::default()).unwrap();
//!
//! controller.start().unwrap();
//! controller.add_fix(TrackPoint::new(46.5580, 7.8350, 1200.0, 1_700_000_000_000, 5.0, 1.2));
//! controller.add_fix(TrackPoint::new(46.5585, 7.8356, 1210.0, 1_700_000_003_000, 5.0, 1.3));
//!
//! let state = controller.current_state();
//! println!("{} points", state.stats.map(|s| s.point_count).unwrap_or(0));
//!
//! if let Ok(Some(track)) = controller.stop() {
//!     println!("{:.0} m, +{:.0} m", track.total_distance, track.elevation_gain);
//! }
//! ```

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackerError};

// Geographic utilities (distance, bearing, bounds)
pub mod geo_utils;

// Algorithm toolbox - simplification plus re-exported geometry
pub mod algorithms;
pub use algorithms::{simplify, simplify_default};

// Accuracy gate for incoming fixes
pub mod filter;
pub use filter::{PointFilter, RejectReason};

// Structurally shared track snapshots
pub mod snapshot;
pub use snapshot::{PointLog, TrackSnapshot};

// Recording state machine
pub mod session;
pub use session::{
    Clock, ManualClock, PointOutcome, SystemClock, TrackingPhase, TrackingSession, TrackingState,
};

// GPX export
pub mod gpx;
pub use gpx::to_gpx;

// Durable track storage
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteTrackStore;
pub use persistence::{FileTrackStore, TrackStore};

// Latest-value state broadcasting
pub mod subscription;
pub use subscription::{StateBroadcaster, Subscription, SubscriptionHandle};

// Session orchestration
pub mod controller;
pub use controller::SessionController;

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("HikeTrackerRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Constants
// ============================================================================

/// Persist the in-progress track after this many accepted points.
pub const AUTO_SAVE_INTERVAL: u32 = 10;

/// Fixes reporting a worse accuracy than this are dropped.
pub const DEFAULT_ACCURACY_THRESHOLD_METERS: f32 = 30.0;

/// Douglas-Peucker tolerance in degrees (~1.1 m at the equator).
pub const DEFAULT_SIMPLIFY_TOLERANCE: f64 = 1e-5;

// ============================================================================
// Core Types
// ============================================================================

/// A single recorded GPS fix.
///
/// # Example
/// ```
/// use hike_tracker::TrackPoint;
/// let point = TrackPoint::new(46.5580, 7.8350, 1200.0, 1_700_000_000_000, 4.0, 1.1);
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above sea level
    pub altitude: f64,
    /// Epoch milliseconds
    pub timestamp: i64,
    /// Reported horizontal accuracy in meters
    pub accuracy: f32,
    /// Ground speed in m/s
    pub speed: f32,
}

impl TrackPoint {
    /// Create a new track point.
    pub fn new(
        latitude: f64,
        longitude: f64,
        altitude: f64,
        timestamp: i64,
        accuracy: f32,
        speed: f32,
    ) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            timestamp,
            accuracy,
            speed,
        }
    }

    /// Check if the point has valid coordinates and finite readings.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.altitude.is_finite()
            && self.speed.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box for a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from track points.
    pub fn from_points(points: &[TrackPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }
}

/// A recorded hike, finished or in progress.
///
/// Statistics are accumulated point by point as the track grows and are
/// never recomputed from the point list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Track {
    pub id: i64,
    pub name: String,
    /// Points in chronological order
    pub points: Vec<TrackPoint>,
    /// Epoch milliseconds
    pub start_time: i64,
    /// Epoch milliseconds, absent while the track is still recording
    pub end_time: Option<i64>,
    /// Meters
    pub total_distance: f32,
    /// Meters climbed, raw GPS altitude deltas
    pub elevation_gain: f32,
    /// Meters descended, raw GPS altitude deltas
    pub elevation_loss: f32,
    pub max_altitude: f64,
    pub min_altitude: f64,
}

impl Track {
    /// Create an empty track named after its start time.
    pub fn new(id: i64, start_time: i64) -> Self {
        Self::with_name(id, default_track_name(start_time), start_time)
    }

    /// Create an empty track with an explicit name.
    pub fn with_name(id: i64, name: impl Into<String>, start_time: i64) -> Self {
        Self {
            id,
            name: name.into(),
            points: Vec::new(),
            start_time,
            end_time: None,
            total_distance: 0.0,
            elevation_gain: 0.0,
            elevation_loss: 0.0,
            max_altitude: f64::MIN,
            min_altitude: f64::MAX,
        }
    }

    /// A track is active until it has been stopped.
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// Elapsed milliseconds, measured to `now` while the track is active.
    pub fn duration(&self, now: i64) -> i64 {
        (self.end_time.unwrap_or(now) - self.start_time).max(0)
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// (min, max) altitude, or `None` before the first point.
    pub fn altitude_range(&self) -> Option<(f64, f64)> {
        if self.points.is_empty() {
            None
        } else {
            Some((self.min_altitude, self.max_altitude))
        }
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(&self.points)
    }

    /// Append a point, folding it into the running statistics. Used when
    /// building a track outside a session, such as from imported fixes.
    pub fn record_point(&mut self, point: TrackPoint) {
        let last = self.points.last().copied();
        self.fold_point(last.as_ref(), &point);
        self.points.push(point);
    }

    /// Update the running totals for `point` following `last`. Leaves the
    /// point list alone.
    pub(crate) fn fold_point(&mut self, last: Option<&TrackPoint>, point: &TrackPoint) {
        if let Some(last) = last {
            self.total_distance += geo_utils::distance(last, point) as f32;

            let elevation_diff = point.altitude - last.altitude;
            if elevation_diff > 0.0 {
                self.elevation_gain += elevation_diff as f32;
            } else {
                self.elevation_loss += (-elevation_diff) as f32;
            }
        }

        self.max_altitude = self.max_altitude.max(point.altitude);
        self.min_altitude = self.min_altitude.min(point.altitude);
    }
}

/// Point-in-time statistics for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct TrackStats {
    /// Meters
    pub distance: f32,
    /// Milliseconds
    pub duration: i64,
    /// m/s over the whole duration
    pub avg_speed: f32,
    /// m/s reported by the latest fix
    pub current_speed: f32,
    pub current_altitude: f64,
    pub elevation_gain: f32,
    pub elevation_loss: f32,
    pub point_count: u32,
}

impl TrackStats {
    /// Compute statistics for `track` as of `now`.
    pub fn compute(track: &Track, last_fix: Option<&TrackPoint>, now: i64) -> Self {
        Self::from_totals(track, track.points.len(), track.points.last(), last_fix, now)
    }

    /// Statistics from a track's totals when its points are stored elsewhere.
    pub(crate) fn from_totals(
        track: &Track,
        point_count: usize,
        last_point: Option<&TrackPoint>,
        last_fix: Option<&TrackPoint>,
        now: i64,
    ) -> Self {
        let duration = track.duration(now);
        let avg_speed = if duration > 0 {
            track.total_distance / (duration as f32 / 1000.0)
        } else {
            0.0
        };

        let current_altitude = last_fix.or(last_point).map(|p| p.altitude).unwrap_or(0.0);

        Self {
            distance: track.total_distance,
            duration,
            avg_speed,
            current_speed: last_fix.map(|fix| fix.speed).unwrap_or(0.0),
            current_altitude,
            elevation_gain: track.elevation_gain,
            elevation_loss: track.elevation_loss,
            point_count: point_count as u32,
        }
    }
}

/// Configuration for recording and analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(default)]
pub struct TrackerConfig {
    /// Fixes with a worse reported accuracy are discarded.
    /// Default: 30.0 meters
    pub accuracy_threshold_meters: f32,

    /// Autosave the in-progress track every N accepted points.
    /// Default: 10
    pub autosave_interval: u32,

    /// Tolerance for Douglas-Peucker simplification (in degrees).
    /// Default: 0.00001 (~1.1 meters)
    pub simplify_tolerance: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            accuracy_threshold_meters: DEFAULT_ACCURACY_THRESHOLD_METERS,
            autosave_interval: AUTO_SAVE_INTERVAL,
            simplify_tolerance: DEFAULT_SIMPLIFY_TOLERANCE,
        }
    }
}

impl TrackerConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| TrackerError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.accuracy_threshold_meters.is_finite() && self.accuracy_threshold_meters > 0.0) {
            return Err(TrackerError::Config {
                message: format!(
                    "accuracy_threshold_meters must be positive, got {}",
                    self.accuracy_threshold_meters
                ),
            });
        }
        if self.autosave_interval == 0 {
            return Err(TrackerError::Config {
                message: "autosave_interval must be at least 1".to_string(),
            });
        }
        if !(self.simplify_tolerance.is_finite() && self.simplify_tolerance >= 0.0) {
            return Err(TrackerError::Config {
                message: format!(
                    "simplify_tolerance must be non-negative, got {}",
                    self.simplify_tolerance
                ),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Formatting
// ============================================================================

/// `Track 2024-06-01 09:30` in local time.
pub fn default_track_name(start_time: i64) -> String {
    match Local.timestamp_millis_opt(start_time).single() {
        Some(dt) => format!("Track {}", dt.format("%Y-%m-%d %H:%M")),
        None => format!("Track {}", start_time),
    }
}

/// `HH:MM:SS` from milliseconds.
pub fn format_duration(duration_ms: i64) -> String {
    let seconds = duration_ms.max(0) / 1000;
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

/// Kilometers with two decimals from 1 km up, whole meters below.
pub fn format_distance(meters: f32) -> String {
    if meters >= 1000.0 {
        format!("{:.2} km", meters / 1000.0)
    } else {
        format!("{:.0} m", meters)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lng: f64, alt: f64, ts: i64) -> TrackPoint {
        TrackPoint::new(lat, lng, alt, ts, 5.0, 1.0)
    }

    #[test]
    fn test_track_point_validation() {
        assert!(point(46.5, 7.8, 1000.0, 0).is_valid());
        assert!(!point(91.0, 0.0, 0.0, 0).is_valid());
        assert!(!point(0.0, 181.0, 0.0, 0).is_valid());
        assert!(!point(f64::NAN, 0.0, 0.0, 0).is_valid());
        assert!(!point(0.0, 0.0, f64::INFINITY, 0).is_valid());
    }

    #[test]
    fn test_record_point_accumulates() {
        let mut track = Track::with_name(1, "test", 0);
        track.record_point(point(0.0, 0.0, 100.0, 0));
        track.record_point(point(0.0, 0.001, 110.0, 1000));
        track.record_point(point(0.0, 0.002, 95.0, 2000));

        assert_eq!(track.point_count(), 3);
        assert!((track.total_distance - 222.39).abs() < 0.05);
        assert!((track.elevation_gain - 10.0).abs() < 1e-4);
        assert!((track.elevation_loss - 15.0).abs() < 1e-4);
        assert_eq!(track.altitude_range(), Some((95.0, 110.0)));
    }

    #[test]
    fn test_empty_track_has_no_altitude_range() {
        let track = Track::with_name(1, "empty", 0);
        assert!(track.altitude_range().is_none());
        assert!(track.bounds().is_none());
        assert!(track.is_active());
    }

    #[test]
    fn test_duration_uses_end_time_once_finished() {
        let mut track = Track::with_name(1, "t", 1_000);
        assert_eq!(track.duration(61_000), 60_000);
        track.end_time = Some(31_000);
        assert_eq!(track.duration(61_000), 30_000);
    }

    #[test]
    fn test_stats_compute() {
        let mut track = Track::with_name(1, "t", 0);
        track.record_point(point(0.0, 0.0, 100.0, 0));
        track.record_point(point(0.0, 0.001, 110.0, 10_000));
        let last = *track.points.last().unwrap();

        let stats = TrackStats::compute(&track, Some(&last), 100_000);
        assert_eq!(stats.point_count, 2);
        assert_eq!(stats.duration, 100_000);
        assert!((stats.avg_speed - track.total_distance / 100.0).abs() < 1e-4);
        assert_eq!(stats.current_speed, 1.0);
        assert_eq!(stats.current_altitude, 110.0);

        let stats = TrackStats::compute(&track, None, 0);
        assert_eq!(stats.avg_speed, 0.0);
        assert_eq!(stats.current_speed, 0.0);
        assert_eq!(stats.current_altitude, 110.0);
    }

    #[test]
    fn test_bounds() {
        let points = vec![point(46.0, 7.0, 0.0, 0), point(47.0, 8.0, 0.0, 1)];
        let bounds = Bounds::from_points(&points).unwrap();
        assert_eq!(bounds.min_lat, 46.0);
        assert_eq!(bounds.max_lng, 8.0);
        assert_eq!(bounds.max_lat, 47.0);
        assert_eq!(bounds.min_lng, 7.0);
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_duration(3_723_000), "01:02:03");
        assert_eq!(format_duration(-5), "00:00:00");
        assert_eq!(format_distance(999.4), "999 m");
        assert_eq!(format_distance(12_345.0), "12.35 km");
        assert!(default_track_name(1_700_000_000_000).starts_with("Track 2023-11-"));
    }

    #[test]
    fn test_config_defaults_and_parsing() {
        let config = TrackerConfig::default();
        assert_eq!(config.accuracy_threshold_meters, 30.0);
        assert_eq!(config.autosave_interval, AUTO_SAVE_INTERVAL);

        let config = TrackerConfig::from_json_str(r#"{"autosave_interval": 5}"#).unwrap();
        assert_eq!(config.autosave_interval, 5);
        assert_eq!(config.accuracy_threshold_meters, 30.0);

        assert!(TrackerConfig::from_json_str(r#"{"autosave_interval": 0}"#).is_err());
        assert!(TrackerConfig::from_json_str(r#"{"accuracy_threshold_meters": -1}"#).is_err());
        assert!(TrackerConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_track_serde_field_names() {
        let track = Track::with_name(7, "Eiger", 1);
        let json = serde_json::to_value(&track).unwrap();
        for field in [
            "id",
            "name",
            "points",
            "start_time",
            "end_time",
            "total_distance",
            "elevation_gain",
            "elevation_loss",
            "max_altitude",
            "min_altitude",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
    }
}
