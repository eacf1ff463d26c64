//! # Session Controller
//!
//! Long-lived owner of one [`TrackingSession`] and a [`TrackStore`]:
//!
//! - serializes every mutation behind one mutex
//! - queues an autosave every `autosave_interval` accepted points
//! - saves the finished track on stop and clears the autosave slot
//! - restores an unfinished autosaved track on construction
//! - publishes a fresh [`TrackingState`] after every state change
//!
//! Autosave IO runs on a dedicated worker thread so a slow disk never stalls
//! fix ingestion. The worker receives [`TrackSnapshot`]s taken under the
//! session lock at the moment the Nth point was accepted, and lays the points
//! out for writing on its own thread.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use crate::algorithms::simplify;
use crate::error::{Result, TrackerError};
use crate::filter::PointFilter;
use crate::gpx;
use crate::lock_or_recover;
use crate::persistence::TrackStore;
use crate::session::{
    reserve_track_ids_through, Clock, PointOutcome, SystemClock, TrackingPhase, TrackingSession,
    TrackingState,
};
use crate::snapshot::TrackSnapshot;
use crate::subscription::{StateBroadcaster, Subscription, SubscriptionHandle};
use crate::{Track, TrackPoint, TrackerConfig};

// ============================================================================
// Autosave worker
// ============================================================================

enum AutosaveJob {
    Save(TrackSnapshot),
    /// Acknowledge once every earlier job has been handled.
    Flush(Sender<()>),
}

fn spawn_autosave_worker<S>(store: Arc<S>) -> Result<(Sender<AutosaveJob>, JoinHandle<()>)>
where
    S: TrackStore + 'static,
{
    let (tx, rx) = mpsc::channel::<AutosaveJob>();
    let handle = thread::Builder::new()
        .name("hike-autosave".to_string())
        .spawn(move || {
            for job in rx {
                match job {
                    AutosaveJob::Save(snapshot) => {
                        if let Err(e) = store.autosave(&snapshot.to_track()) {
                            warn!(
                                "[SessionController] Autosave of track {} failed: {}",
                                snapshot.id(),
                                e
                            );
                        }
                    }
                    AutosaveJob::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            debug!("[SessionController] Autosave worker stopped");
        })?;
    Ok((tx, handle))
}

// ============================================================================
// Controller
// ============================================================================

struct ControllerInner {
    session: TrackingSession,
    /// Points accepted since the last start or restore
    accepted_points: u32,
    autosave_tx: Option<Sender<AutosaveJob>>,
}

/// Thread-safe recording service over a [`TrackStore`].
///
/// # Example
/// ```rust
/// use hike_tracker::{SessionController, SqliteTrackStore, TrackPoint, TrackerConfig};
///
/// let store = SqliteTrackStore::in_memory().unwrap();
/// let controller = SessionController::new(store, TrackerConfig::default()).unwrap();
///
/// let id = controller.start().unwrap();
/// controller.add_fix(TrackPoint::new(46.558, 7.835, 1200.0, 1_700_000_000_000, 4.0, 1.2));
/// let track = controller.stop().unwrap().unwrap();
/// assert_eq!(track.id, id);
/// ```
pub struct SessionController<S: TrackStore + 'static> {
    store: Arc<S>,
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<ControllerInner>,
    broadcaster: Arc<StateBroadcaster>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: TrackStore + 'static> SessionController<S> {
    /// Create a controller, recovering any unfinished track from the
    /// autosave slot.
    pub fn new(store: S, config: TrackerConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a controller with a custom clock.
    pub fn with_clock(store: S, config: TrackerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(store);

        let mut session =
            TrackingSession::with_clock(PointFilter::from_config(&config), Arc::clone(&clock));
        Self::recover(store.as_ref(), &mut session);
        Self::reserve_stored_ids(store.as_ref(), &session);

        let (tx, worker) = spawn_autosave_worker(Arc::clone(&store))?;
        let initial = session.snapshot();
        info!(
            "[SessionController] Ready ({}, autosave every {} points)",
            initial.phase, config.autosave_interval
        );

        Ok(Self {
            store,
            config,
            clock,
            inner: Mutex::new(ControllerInner {
                session,
                accepted_points: 0,
                autosave_tx: Some(tx),
            }),
            broadcaster: Arc::new(StateBroadcaster::new(initial)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Inspect the autosave slot. An unfinished track resumes Paused; a
    /// finished one is a stop whose save failed, so it is saved now.
    fn recover(store: &S, session: &mut TrackingSession) {
        let track = match store.load_autosave() {
            Ok(Some(track)) => track,
            Ok(None) => return,
            Err(e) => {
                warn!("[SessionController] Could not read autosave slot: {}", e);
                return;
            }
        };

        if track.is_active() {
            let id = track.id;
            match session.restore(track) {
                Ok(()) => info!("[SessionController] Recovered unfinished track {}", id),
                Err(e) => warn!("[SessionController] Could not restore track {}: {}", id, e),
            }
            return;
        }

        match store.save(&track) {
            Ok(()) => {
                info!(
                    "[SessionController] Saved finished track {} left in autosave slot",
                    track.id
                );
                if let Err(e) = store.clear_autosave() {
                    warn!("[SessionController] Could not clear autosave slot: {}", e);
                }
            }
            Err(e) => warn!(
                "[SessionController] Finished track {} still unsaved: {}",
                track.id, e
            ),
        }
    }

    /// Keep new track ids above every id already in use, whatever the
    /// device clock says.
    fn reserve_stored_ids(store: &S, session: &TrackingSession) {
        let stored = match store.max_track_id() {
            Ok(id) => id,
            Err(e) => {
                warn!("[SessionController] Could not read saved track ids: {}", e);
                None
            }
        };
        let restored = session.track_snapshot().map(|t| t.id());
        if let Some(highest) = stored.max(restored) {
            reserve_track_ids_through(highest);
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Begin a new track. Also valid after a finished session, which is
    /// replaced by a fresh one.
    pub fn start(&self) -> Result<i64> {
        self.start_track(None)
    }

    /// Begin a new track with a custom name.
    pub fn start_named(&self, name: impl Into<String>) -> Result<i64> {
        self.start_track(Some(name.into()))
    }

    fn start_track(&self, name: Option<String>) -> Result<i64> {
        let mut inner = lock_or_recover(&self.inner);
        if inner.session.phase() == TrackingPhase::Finalized {
            inner.session = TrackingSession::with_clock(
                PointFilter::from_config(&self.config),
                Arc::clone(&self.clock),
            );
        }

        let id = match name {
            Some(name) => inner.session.start_named(name)?,
            None => inner.session.start()?,
        };
        inner.accepted_points = 0;
        self.broadcaster.publish(inner.session.snapshot());
        Ok(id)
    }

    /// Feed one fix from the location provider.
    pub fn add_fix(&self, fix: TrackPoint) -> PointOutcome {
        let mut inner = lock_or_recover(&self.inner);
        let outcome = inner.session.add_point(fix);

        if outcome.is_appended() {
            inner.accepted_points += 1;
            if inner.accepted_points % self.config.autosave_interval == 0 {
                if let Some(track) = inner.session.track_snapshot() {
                    self.queue_autosave(&inner, track);
                }
            }
            self.broadcaster.publish(inner.session.snapshot());
        }

        outcome
    }

    pub fn pause(&self) -> Result<()> {
        let mut inner = lock_or_recover(&self.inner);
        inner.session.pause()?;
        self.broadcaster.publish(inner.session.snapshot());
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        let mut inner = lock_or_recover(&self.inner);
        inner.session.resume()?;
        self.broadcaster.publish(inner.session.snapshot());
        Ok(())
    }

    /// Finish the track, save it and clear the autosave slot.
    ///
    /// Returns `Ok(None)` when nothing is being recorded. If the save fails
    /// the finished track is parked in the autosave slot, to be saved on the
    /// next start-up, and is also handed back inside
    /// [`TrackerError::SaveFailed`].
    pub fn stop(&self) -> Result<Option<Track>> {
        let mut inner = lock_or_recover(&self.inner);
        if !matches!(
            inner.session.phase(),
            TrackingPhase::Active | TrackingPhase::Paused
        ) {
            debug!(
                "[SessionController] stop ignored while {}",
                inner.session.phase()
            );
            return Ok(None);
        }

        let track = inner.session.stop()?;
        inner.accepted_points = 0;

        // Queued autosaves must land before the slot is cleared
        Self::wait_for_worker(inner.autosave_tx.as_ref());

        let result = match self.store.save(&track) {
            Ok(()) => {
                if let Err(e) = self.store.clear_autosave() {
                    warn!("[SessionController] Could not clear autosave slot: {}", e);
                }
                Ok(Some(track))
            }
            Err(e) => {
                error!("[SessionController] Saving track {} failed: {}", track.id, e);
                if let Err(e) = self.store.autosave(&track) {
                    error!(
                        "[SessionController] Parking track {} in autosave slot failed: {}",
                        track.id, e
                    );
                }
                Err(TrackerError::SaveFailed {
                    track: Box::new(track),
                    message: e.to_string(),
                })
            }
        };

        self.broadcaster.publish(inner.session.snapshot());
        result
    }

    fn queue_autosave(&self, inner: &ControllerInner, snapshot: TrackSnapshot) {
        debug!(
            "[SessionController] Queueing autosave of track {} at {} points",
            snapshot.id(),
            snapshot.point_count()
        );
        let snapshot = match &inner.autosave_tx {
            Some(tx) => match tx.send(AutosaveJob::Save(snapshot)) {
                Ok(()) => return,
                Err(mpsc::SendError(AutosaveJob::Save(snapshot))) => snapshot,
                Err(_) => return,
            },
            None => snapshot,
        };

        // Worker is gone (after shutdown): write inline
        if let Err(e) = self.store.autosave(&snapshot.to_track()) {
            warn!(
                "[SessionController] Autosave of track {} failed: {}",
                snapshot.id(),
                e
            );
        }
    }

    fn wait_for_worker(tx: Option<&Sender<AutosaveJob>>) {
        let Some(tx) = tx else {
            return;
        };
        let (ack_tx, ack_rx) = mpsc::channel();
        if tx.send(AutosaveJob::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Block until every autosave queued so far has been written.
    pub fn flush(&self) {
        let tx = lock_or_recover(&self.inner).autosave_tx.clone();
        Self::wait_for_worker(tx.as_ref());
    }

    /// Autosave an in-progress track and stop the worker. Idempotent; also
    /// run on drop.
    pub fn shutdown(&self) {
        let tx = {
            let mut inner = lock_or_recover(&self.inner);
            if matches!(
                inner.session.phase(),
                TrackingPhase::Active | TrackingPhase::Paused
            ) {
                if let Some(track) = inner.session.track_snapshot() {
                    self.queue_autosave(&inner, track);
                }
            }
            inner.autosave_tx.take()
        };
        // Dropping the sender lets the worker drain and exit
        drop(tx);

        if let Some(worker) = lock_or_recover(&self.worker).take() {
            if worker.join().is_err() {
                error!("[SessionController] Autosave worker panicked");
            }
            info!("[SessionController] Shut down");
        }
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn phase(&self) -> TrackingPhase {
        self.broadcaster.latest().phase
    }

    /// Latest state with statistics computed as of now. Does not take the
    /// session lock.
    pub fn current_state(&self) -> TrackingState {
        let mut state = self.broadcaster.latest();
        if let Some(track) = &state.current_track {
            state.stats = Some(track.stats(state.last_fix.as_ref(), self.clock.now_millis()));
        }
        state
    }

    /// Replays the current state, then every change in order.
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    /// Like [`subscribe`](Self::subscribe), with `handler` run on its own
    /// thread.
    pub fn subscribe_with<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: FnMut(TrackingState) + Send + 'static,
    {
        self.broadcaster.subscribe_with(handler)
    }

    /// Copy of the points recorded so far.
    pub fn points_snapshot(&self) -> Vec<TrackPoint> {
        self.broadcaster
            .latest()
            .current_track
            .map(|t| t.points().to_vec())
            .unwrap_or_default()
    }

    /// Current track simplified for display. Runs on a snapshot, off the
    /// session lock.
    pub fn simplified_points(&self, tolerance: f64) -> Vec<TrackPoint> {
        match self.broadcaster.latest().current_track {
            Some(track) => simplify(&track.points().to_vec(), tolerance),
            None => Vec::new(),
        }
    }

    /// GPX of the current track, if one is being recorded.
    pub fn export_gpx(&self) -> Option<String> {
        self.broadcaster
            .latest()
            .current_track
            .map(|t| gpx::to_gpx(&t.to_track()))
    }

    // ========================================================================
    // Saved tracks
    // ========================================================================

    pub fn saved_tracks(&self) -> Result<Vec<Track>> {
        self.store.load_all()
    }

    pub fn load_track(&self, id: i64) -> Result<Option<Track>> {
        self.store.load(id)
    }

    pub fn delete_track(&self, id: i64) -> Result<bool> {
        self.store.delete(id)
    }

    /// GPX of a saved track.
    pub fn export_track_gpx(&self, id: i64) -> Result<Option<String>> {
        Ok(self.store.load(id)?.map(|t| self.store.export(&t)))
    }
}

impl<S: TrackStore + 'static> Drop for SessionController<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================
