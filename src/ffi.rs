//! FFI bindings for mobile platforms (iOS/Android).
//!
//! The host app keeps no Rust state of its own: one global controller backed
//! by a [`FileTrackStore`] lives behind [`TRACKER`], and every exported
//! function is a thin, never-panicking wrapper around it. Failures are
//! logged and reported as `false`, `None` or an empty value.

use std::path::Path;
use std::sync::{Arc, Mutex};

use log::{error, info, warn};
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::{
    format_distance, format_duration, init_logging, lock_or_recover, FileTrackStore,
    SessionController, Track, TrackPoint, TrackStats, TrackerConfig, TrackerError,
    TrackingPhase,
};

/// Optional config file looked up in the storage directory.
const CONFIG_FILE: &str = "tracker_config.json";

type FileController = SessionController<FileTrackStore>;

/// Global controller instance.
pub static TRACKER: Lazy<Mutex<Option<Arc<FileController>>>> = Lazy::new(|| Mutex::new(None));

/// Run `f` against the global controller, if initialized. The global lock is
/// released before `f` runs; the controller serializes its own mutations.
pub fn with_tracker<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&FileController) -> R,
{
    let controller = lock_or_recover(&TRACKER).clone()?;
    Some(f(&controller))
}

/// Row of the saved-tracks listing.
#[derive(Debug, Clone, Serialize)]
struct TrackSummary {
    id: i64,
    name: String,
    start_time: i64,
    end_time: Option<i64>,
    point_count: usize,
    total_distance: f32,
    elevation_gain: f32,
    elevation_loss: f32,
    distance_text: String,
    duration_text: String,
}

impl From<&Track> for TrackSummary {
    fn from(track: &Track) -> Self {
        let duration = track.duration(track.end_time.unwrap_or(track.start_time));
        Self {
            id: track.id,
            name: track.name.clone(),
            start_time: track.start_time,
            end_time: track.end_time,
            point_count: track.points.len(),
            total_distance: track.total_distance,
            elevation_gain: track.elevation_gain,
            elevation_loss: track.elevation_loss,
            distance_text: format_distance(track.total_distance),
            duration_text: format_duration(duration),
        }
    }
}

fn install(storage_dir: &str, config: TrackerConfig) -> bool {
    // Retire the previous controller first so its final autosave lands
    // before the new one reads the slot.
    let previous = lock_or_recover(&TRACKER).take();
    if let Some(previous) = previous {
        previous.shutdown();
    }

    let controller =
        FileTrackStore::open(storage_dir).and_then(|store| SessionController::new(store, config));

    match controller {
        Ok(controller) => {
            info!(
                "[HikeTracker] Initialized at {} ({})",
                storage_dir,
                controller.phase()
            );
            *lock_or_recover(&TRACKER) = Some(Arc::new(controller));
            true
        }
        Err(e) => {
            error!("[HikeTracker] Failed to initialize: {}", e);
            false
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Initialize the tracker with a storage directory. Reads
/// `tracker_config.json` from that directory when present.
/// Call once at app startup; calling again re-initializes.
#[uniffi::export]
pub fn tracker_init(storage_dir: String) -> bool {
    init_logging();
    let config_path = Path::new(&storage_dir).join(CONFIG_FILE);
    let config = if config_path.is_file() {
        match TrackerConfig::from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!("[HikeTracker] Ignoring {}: {}", config_path.display(), e);
                TrackerConfig::default()
            }
        }
    } else {
        TrackerConfig::default()
    };
    install(&storage_dir, config)
}

/// Initialize the tracker with an explicit configuration.
#[uniffi::export]
pub fn tracker_init_with_config(storage_dir: String, config: TrackerConfig) -> bool {
    init_logging();
    install(&storage_dir, config)
}

#[uniffi::export]
pub fn tracker_is_initialized() -> bool {
    lock_or_recover(&TRACKER).is_some()
}

/// Autosave any in-progress track and release the controller.
#[uniffi::export]
pub fn tracker_shutdown() {
    let previous = lock_or_recover(&TRACKER).take();
    if let Some(controller) = previous {
        controller.shutdown();
    }
}

// ============================================================================
// Recording
// ============================================================================

/// Start recording. Returns the new track id.
#[uniffi::export]
pub fn tracker_start() -> Option<i64> {
    with_tracker(|c| match c.start() {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("[HikeTracker] start: {}", e);
            None
        }
    })
    .flatten()
}

#[uniffi::export]
pub fn tracker_pause() -> bool {
    with_tracker(|c| c.pause().map_err(|e| warn!("[HikeTracker] pause: {}", e)).is_ok())
        .unwrap_or(false)
}

#[uniffi::export]
pub fn tracker_resume() -> bool {
    with_tracker(|c| c.resume().map_err(|e| warn!("[HikeTracker] resume: {}", e)).is_ok())
        .unwrap_or(false)
}

/// Stop recording and return the finished track.
///
/// A track that could not be saved is still returned; it stays in the
/// autosave slot and is saved on the next initialization.
#[uniffi::export]
pub fn tracker_stop() -> Option<Track> {
    with_tracker(|c| match c.stop() {
        Ok(track) => track,
        Err(TrackerError::SaveFailed { track, message }) => {
            error!("[HikeTracker] Track {} not saved: {}", track.id, message);
            Some(*track)
        }
        Err(e) => {
            warn!("[HikeTracker] stop: {}", e);
            None
        }
    })
    .flatten()
}

/// Feed one location fix. Returns true if it was recorded.
#[uniffi::export]
pub fn tracker_add_fix(fix: TrackPoint) -> bool {
    with_tracker(|c| c.add_fix(fix).is_appended()).unwrap_or(false)
}

// ============================================================================
// Observation
// ============================================================================

#[uniffi::export]
pub fn tracker_get_phase() -> TrackingPhase {
    with_tracker(|c| c.phase()).unwrap_or(TrackingPhase::Idle)
}

#[uniffi::export]
pub fn tracker_get_stats() -> Option<TrackStats> {
    with_tracker(|c| c.current_state().stats).flatten()
}

/// Current track as a flat `[lat, lng, lat, lng, ...]` buffer.
#[uniffi::export]
pub fn tracker_get_points_flat() -> Vec<f64> {
    with_tracker(|c| flatten_points(&c.points_snapshot())).unwrap_or_default()
}

/// Current track simplified with the configured tolerance, flattened like
/// [`tracker_get_points_flat`].
#[uniffi::export]
pub fn tracker_get_simplified_points_flat() -> Vec<f64> {
    with_tracker(|c| flatten_points(&c.simplified_points(c.config().simplify_tolerance)))
        .unwrap_or_default()
}

fn flatten_points(points: &[TrackPoint]) -> Vec<f64> {
    points
        .iter()
        .flat_map(|p| [p.latitude, p.longitude])
        .collect()
}

/// GPX of the track being recorded, or an empty string.
#[uniffi::export]
pub fn tracker_export_gpx() -> String {
    with_tracker(|c| c.export_gpx()).flatten().unwrap_or_default()
}

// ============================================================================
// Saved tracks
// ============================================================================

/// Saved tracks as a JSON array of summaries, newest first.
#[uniffi::export]
pub fn tracker_list_tracks_json() -> String {
    with_tracker(|c| match c.saved_tracks() {
        Ok(tracks) => {
            let summaries: Vec<TrackSummary> = tracks.iter().map(TrackSummary::from).collect();
            serde_json::to_string(&summaries).unwrap_or_else(|_| "[]".to_string())
        }
        Err(e) => {
            warn!("[HikeTracker] list tracks: {}", e);
            "[]".to_string()
        }
    })
    .unwrap_or_else(|| "[]".to_string())
}

#[uniffi::export]
pub fn tracker_get_track(id: i64) -> Option<Track> {
    with_tracker(|c| c.load_track(id).ok().flatten()).flatten()
}

/// GPX of a saved track, or an empty string.
#[uniffi::export]
pub fn tracker_export_track_gpx(id: i64) -> String {
    with_tracker(|c| c.export_track_gpx(id).ok().flatten())
        .flatten()
        .unwrap_or_default()
}

#[uniffi::export]
pub fn tracker_delete_track(id: i64) -> bool {
    with_tracker(|c| match c.delete_track(id) {
        Ok(deleted) => deleted,
        Err(e) => {
            warn!("[HikeTracker] delete track {}: {}", id, e);
            false
        }
    })
    .unwrap_or(false)
}
