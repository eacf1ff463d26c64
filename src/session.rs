//! # Tracking Session
//!
//! State machine owning one in-progress track and its running statistics.
//!
//! ```text
//! Idle --start--> Active <--pause/resume--> Paused
//!                    \                        /
//!                     `--------stop----------'--> Finalized
//! ```
//!
//! The session is a plain single-owner value; callers that share it between
//! threads wrap it in a mutex (see [`crate::SessionController`]). The track is
//! held as a [`TrackSnapshot`] whose frozen chunks are shared copy-on-write,
//! so a snapshot handed out by [`TrackingSession::snapshot`] never observes
//! later points and costs at most one partial chunk to take.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{OptionExt, Result, TrackerError};
use crate::filter::{PointFilter, RejectReason};
use crate::snapshot::TrackSnapshot;
use crate::{Track, TrackPoint, TrackStats};

// ============================================================================
// Clock
// ============================================================================

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to. Used for replaying recorded fixes
/// and in tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now)),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Types
// ============================================================================

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum TrackingPhase {
    Idle,
    Active,
    Paused,
    Finalized,
}

impl fmt::Display for TrackingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackingPhase::Idle => "idle",
            TrackingPhase::Active => "active",
            TrackingPhase::Paused => "paused",
            TrackingPhase::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Derived, read-only view of a session at one moment.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingState {
    pub phase: TrackingPhase,
    /// Immutable snapshot of the in-progress track
    pub current_track: Option<TrackSnapshot>,
    /// Last accepted fix
    pub last_fix: Option<TrackPoint>,
    pub stats: Option<TrackStats>,
}

impl TrackingState {
    pub fn idle() -> Self {
        Self {
            phase: TrackingPhase::Idle,
            current_track: None,
            last_fix: None,
            stats: None,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.phase == TrackingPhase::Active
    }

    pub fn is_paused(&self) -> bool {
        self.phase == TrackingPhase::Paused
    }

    pub fn has_track(&self) -> bool {
        self.current_track.is_some()
    }
}

impl Default for TrackingState {
    fn default() -> Self {
        Self::idle()
    }
}

/// What happened to a fix handed to [`TrackingSession::add_point`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointOutcome {
    /// Recorded; the track now holds `point_count` points.
    Appended { point_count: usize },
    /// Failed the filter; nothing changed.
    Rejected(RejectReason),
    /// The session was not recording; nothing changed.
    Ignored(TrackingPhase),
}

impl PointOutcome {
    pub fn is_appended(&self) -> bool {
        matches!(self, PointOutcome::Appended { .. })
    }
}

static LAST_TRACK_ID: AtomicI64 = AtomicI64::new(0);

/// Track ids are start times in epoch ms, bumped so that every id issued by
/// this process is strictly greater than the previous one and than any id
/// passed to [`reserve_track_ids_through`].
fn next_track_id(now: i64) -> i64 {
    let mut last = LAST_TRACK_ID.load(Ordering::SeqCst);
    loop {
        let candidate = now.max(last + 1);
        match LAST_TRACK_ID.compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

/// Never issue `id` or anything below it. Called with the highest id already
/// in storage, so a device clock running behind cannot reuse a saved id.
pub(crate) fn reserve_track_ids_through(id: i64) {
    LAST_TRACK_ID.fetch_max(id, Ordering::SeqCst);
}

// ============================================================================
// Tracking Session
// ============================================================================

/// Recording state machine for a single track.
pub struct TrackingSession {
    phase: TrackingPhase,
    track: Option<TrackSnapshot>,
    last_fix: Option<TrackPoint>,
    filter: PointFilter,
    clock: Arc<dyn Clock>,
}

impl TrackingSession {
    /// Create an idle session using the system clock.
    pub fn new(filter: PointFilter) -> Self {
        Self::with_clock(filter, Arc::new(SystemClock))
    }

    /// Create an idle session with a custom clock.
    pub fn with_clock(filter: PointFilter, clock: Arc<dyn Clock>) -> Self {
        Self {
            phase: TrackingPhase::Idle,
            track: None,
            last_fix: None,
            filter,
            clock,
        }
    }

    pub fn phase(&self) -> TrackingPhase {
        self.phase
    }

    pub fn filter(&self) -> &PointFilter {
        &self.filter
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Begin a new track named after its start time. Idle only.
    pub fn start(&mut self) -> Result<i64> {
        self.start_track(None)
    }

    /// Begin a new track with a custom name. Idle only.
    pub fn start_named(&mut self, name: impl Into<String>) -> Result<i64> {
        self.start_track(Some(name.into()))
    }

    fn start_track(&mut self, name: Option<String>) -> Result<i64> {
        if self.phase != TrackingPhase::Idle {
            return Err(TrackerError::invalid_transition("start", self.phase));
        }

        let now = self.clock.now_millis();
        let id = next_track_id(now);
        let track = match name {
            Some(name) => Track::with_name(id, name, now),
            None => Track::new(id, now),
        };

        info!("[TrackingSession] Started track {} ({})", id, track.name);
        self.track = Some(TrackSnapshot::from(track));
        self.last_fix = None;
        self.phase = TrackingPhase::Active;
        Ok(id)
    }

    /// Feed one fix. Only recorded while Active and accepted by the filter.
    pub fn add_point(&mut self, fix: TrackPoint) -> PointOutcome {
        if self.phase != TrackingPhase::Active {
            debug!("[TrackingSession] Dropping fix while {}", self.phase);
            return PointOutcome::Ignored(self.phase);
        }

        let Some(track) = self.track.as_mut() else {
            return PointOutcome::Ignored(self.phase);
        };

        if let Some(reason) = self.filter.rejection(&fix) {
            debug!(
                "[TrackingSession] Rejected fix ({:?}, accuracy {:.1} m)",
                reason, fix.accuracy
            );
            return PointOutcome::Rejected(reason);
        }

        if let Some(last) = track.points().last() {
            if fix.timestamp < last.timestamp {
                debug!(
                    "[TrackingSession] Rejected fix at {} older than last point at {}",
                    fix.timestamp, last.timestamp
                );
                return PointOutcome::Rejected(RejectReason::OutOfOrder);
            }
        }

        track.record_point(fix);
        self.last_fix = Some(fix);

        PointOutcome::Appended {
            point_count: track.point_count(),
        }
    }

    /// Stop accepting points, keeping the track. Active only.
    pub fn pause(&mut self) -> Result<()> {
        if self.phase != TrackingPhase::Active {
            return Err(TrackerError::invalid_transition("pause", self.phase));
        }
        self.phase = TrackingPhase::Paused;
        info!("[TrackingSession] Paused");
        Ok(())
    }

    /// Accept points again. Paused only.
    pub fn resume(&mut self) -> Result<()> {
        if self.phase != TrackingPhase::Paused {
            return Err(TrackerError::invalid_transition("resume", self.phase));
        }
        self.phase = TrackingPhase::Active;
        info!("[TrackingSession] Resumed");
        Ok(())
    }

    /// Finalize the track and hand it over. Active or Paused only.
    ///
    /// The session is terminal afterwards; a second call fails without
    /// touching anything.
    pub fn stop(&mut self) -> Result<Track> {
        if !matches!(self.phase, TrackingPhase::Active | TrackingPhase::Paused) {
            return Err(TrackerError::invalid_transition("stop", self.phase));
        }

        let mut live = self.track.take().ok_or_transition("stop", self.phase)?;
        live.set_end_time(self.clock.now_millis().max(live.start_time()));
        let track = live.to_track();
        self.phase = TrackingPhase::Finalized;

        info!(
            "[TrackingSession] Stopped track {}: {} points, {:.0} m",
            track.id,
            track.points.len(),
            track.total_distance
        );
        Ok(track)
    }

    /// Adopt an unfinished track recovered after a crash. Idle only; the
    /// session comes back Paused so recording resumes on request.
    pub fn restore(&mut self, track: Track) -> Result<()> {
        if self.phase != TrackingPhase::Idle {
            return Err(TrackerError::invalid_transition("restore", self.phase));
        }
        if !track.is_active() {
            return Err(TrackerError::invalid_transition(
                "restore a finished track into",
                self.phase,
            ));
        }

        info!(
            "[TrackingSession] Restored track {} with {} points",
            track.id,
            track.points.len()
        );
        self.last_fix = track.points.last().copied();
        self.track = Some(TrackSnapshot::from(track));
        self.phase = TrackingPhase::Paused;
        Ok(())
    }

    // ========================================================================
    // Read access
    // ========================================================================

    /// Freshly computed state. Cheap: the track's frozen chunks are shared,
    /// not copied.
    pub fn snapshot(&self) -> TrackingState {
        let now = self.clock.now_millis();
        TrackingState {
            phase: self.phase,
            current_track: self.track.clone(),
            last_fix: self.last_fix,
            stats: self.track.as_ref().map(|t| t.stats(self.last_fix.as_ref(), now)),
        }
    }

    /// Shared view of the current track.
    pub fn track_snapshot(&self) -> Option<TrackSnapshot> {
        self.track.clone()
    }

    /// Copy of the recorded points.
    pub fn points_snapshot(&self) -> Vec<TrackPoint> {
        self.track
            .as_ref()
            .map(|t| t.points().to_vec())
            .unwrap_or_default()
    }

    pub fn point_count(&self) -> usize {
        self.track.as_ref().map(|t| t.point_count()).unwrap_or(0)
    }
}

impl fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingSession")
            .field("phase", &self.phase)
            .field("point_count", &self.point_count())
            .field("filter", &self.filter)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
