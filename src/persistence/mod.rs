//! # Track Persistence
//!
//! Durable storage for finished tracks plus a single autosave slot used to
//! recover an in-progress track after a crash.
//!
//! Two backends implement [`TrackStore`]:
//!
//! - [`FileTrackStore`]: one pretty-printed JSON file per track under
//!   `tracks/`, the autosave slot in `autosave_track.json`.
//! - [`SqliteTrackStore`] (feature `persistence`): one SQLite database with a
//!   `tracks` table and a single-row `autosave` table, MessagePack blobs.
//!
//! ## Failure model
//!
//! IO failures come back as [`TrackerError`](crate::TrackerError) values.
//! Records that exist but cannot be decoded are treated as absent: `load`
//! yields `None` and `load_all` leaves them out, with a warning in the log.

use crate::error::Result;
use crate::gpx;
use crate::Track;

mod file;
pub use file::FileTrackStore;

#[cfg(feature = "persistence")]
mod sqlite;
#[cfg(feature = "persistence")]
pub use sqlite::SqliteTrackStore;

/// Storage backend for tracks.
///
/// Implementations are shared between the controller and its autosave worker
/// thread, so every method takes `&self`.
pub trait TrackStore: Send + Sync {
    /// Write a track, replacing any record with the same id.
    fn save(&self, track: &Track) -> Result<()>;

    /// Read one track. Missing and corrupt records both give `Ok(None)`.
    fn load(&self, id: i64) -> Result<Option<Track>>;

    /// All readable tracks, newest start time first.
    fn load_all(&self) -> Result<Vec<Track>>;

    /// Remove a track. Returns whether a record existed.
    fn delete(&self, id: i64) -> Result<bool>;

    /// Overwrite the autosave slot.
    fn autosave(&self, track: &Track) -> Result<()>;

    /// Read the autosave slot. Empty and corrupt slots both give `Ok(None)`.
    fn load_autosave(&self) -> Result<Option<Track>>;

    /// Empty the autosave slot. Clearing an empty slot succeeds.
    fn clear_autosave(&self) -> Result<()>;

    /// Highest saved track id, if any. New tracks must be issued above it
    /// so a save never replaces an existing record.
    fn max_track_id(&self) -> Result<Option<i64>> {
        Ok(self.load_all()?.iter().map(|t| t.id).max())
    }

    /// Render a track as GPX.
    fn export(&self, track: &Track) -> String {
        gpx::to_gpx(track)
    }
}

/// Order tracks newest first, ties broken by id so listings are stable.
pub(crate) fn sort_newest_first(tracks: &mut [Track]) {
    tracks.sort_by(|a, b| {
        b.start_time
            .cmp(&a.start_time)
            .then_with(|| b.id.cmp(&a.id))
    });
}

// ============================================================================
// Backend contract tests
// ============================================================================

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every backend must share.

    use super::TrackStore;
    use crate::{Track, TrackPoint};

    pub fn sample_track(id: i64, start_time: i64, points: usize) -> Track {
        let mut track = Track::with_name(id, format!("Track {id}"), start_time);
        for i in 0..points {
            let i_f = i as f64;
            track.record_point(TrackPoint::new(
                46.55 + i_f * 1e-4,
                7.83 + (i_f * 0.2).sin() * 1e-4,
                1200.0 + (i_f * 0.5).sin() * 8.0,
                start_time + i as i64 * 2_000,
                4.5,
                1.3,
            ));
        }
        track.end_time = Some(start_time + points as i64 * 2_000 + 1);
        track
    }

    pub fn round_trip(store: &impl TrackStore) {
        let track = sample_track(101, 1_700_000_000_000, 40);
        store.save(&track).unwrap();
        assert_eq!(store.load(101).unwrap(), Some(track));

        // Empty track keeps its altitude sentinels
        let empty = Track::with_name(102, "empty", 1_700_000_100_000);
        store.save(&empty).unwrap();
        assert_eq!(store.load(102).unwrap(), Some(empty));
    }

    pub fn save_overwrites(store: &impl TrackStore) {
        let mut track = sample_track(7, 1_000, 3);
        store.save(&track).unwrap();
        track.name = "Renamed".to_string();
        store.save(&track).unwrap();
        assert_eq!(store.load(7).unwrap().unwrap().name, "Renamed");
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    pub fn missing_is_none(store: &impl TrackStore) {
        assert_eq!(store.load(999).unwrap(), None);
        assert!(!store.delete(999).unwrap());
    }

    pub fn load_all_sorted(store: &impl TrackStore) {
        store.save(&sample_track(1, 1_000, 2)).unwrap();
        store.save(&sample_track(2, 3_000, 2)).unwrap();
        store.save(&sample_track(3, 2_000, 2)).unwrap();
        let ids: Vec<i64> = store.load_all().unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    pub fn delete(store: &impl TrackStore) {
        store.save(&sample_track(5, 1_000, 2)).unwrap();
        assert!(store.delete(5).unwrap());
        assert_eq!(store.load(5).unwrap(), None);
        assert!(!store.delete(5).unwrap());
    }

    pub fn autosave_slot(store: &impl TrackStore) {
        assert_eq!(store.load_autosave().unwrap(), None);
        store.clear_autosave().unwrap();

        let mut track = sample_track(11, 5_000, 10);
        track.end_time = None;
        store.autosave(&track).unwrap();
        assert_eq!(store.load_autosave().unwrap(), Some(track.clone()));

        // Single slot, fully overwritten
        let other = sample_track(12, 6_000, 20);
        store.autosave(&other).unwrap();
        assert_eq!(store.load_autosave().unwrap(), Some(other));

        store.clear_autosave().unwrap();
        assert_eq!(store.load_autosave().unwrap(), None);
        // The autosave slot is not a saved track
        assert!(store.load_all().unwrap().is_empty());
    }

    pub fn max_track_id(store: &impl TrackStore) {
        assert_eq!(store.max_track_id().unwrap(), None);
        store.save(&sample_track(1_700_000_000_000, 1_000, 2)).unwrap();
        store.save(&sample_track(9, 2_000, 2)).unwrap();
        // The autosave slot does not count
        store.autosave(&sample_track(1_800_000_000_000, 3_000, 2)).unwrap();
        assert_eq!(store.max_track_id().unwrap(), Some(1_700_000_000_000));
    }

    pub fn export_is_gpx(store: &impl TrackStore) {
        let gpx = store.export(&sample_track(1, 1_704_110_400_000, 3));
        assert!(gpx.starts_with("<?xml"));
        assert_eq!(gpx.matches("<trkpt ").count(), 3);
    }
}
