//! JSON file backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/
//!   autosave_track.json
//!   tracks/
//!     track_1717228800000.json
//!     track_1717315200000.json
//! ```
//!
//! Every write goes to a sibling `.tmp` file, is synced to disk, and is then
//! renamed over the target; the directory is synced after the rename. A crash
//! or power cut mid-write leaves either the previous record or the new one.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::{sort_newest_first, TrackStore};
use crate::error::{Result, TrackerError};
use crate::Track;

const TRACKS_DIR: &str = "tracks";
const AUTOSAVE_FILE: &str = "autosave_track.json";
const TRACK_PREFIX: &str = "track_";
const TRACK_SUFFIX: &str = ".json";

/// Track store backed by one JSON file per track.
#[derive(Debug, Clone)]
pub struct FileTrackStore {
    root: PathBuf,
    tracks_dir: PathBuf,
}

impl FileTrackStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let tracks_dir = root.join(TRACKS_DIR);
        fs::create_dir_all(&tracks_dir)?;
        info!("[TrackStore] Opened file store at {}", root.display());
        Ok(Self { root, tracks_dir })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record for track `id`.
    pub fn track_path(&self, id: i64) -> PathBuf {
        self.tracks_dir
            .join(format!("{}{}{}", TRACK_PREFIX, id, TRACK_SUFFIX))
    }

    /// Path of the autosave slot.
    pub fn autosave_path(&self) -> PathBuf {
        self.root.join(AUTOSAVE_FILE)
    }

    fn write_record(&self, path: &Path, track: &Track) -> Result<()> {
        let json = serde_json::to_vec_pretty(track)?;
        let tmp = path.with_extension("json.tmp");

        let written = Self::write_synced(&tmp, &json).and_then(|()| fs::rename(&tmp, path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        if let Some(dir) = path.parent() {
            sync_dir(dir)?;
        }
        Ok(())
    }

    /// Write `bytes` to a fresh file and wait until they are on disk.
    fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(bytes)?;
        file.sync_all()
    }

    /// Read and decode one record. Missing → `Ok(None)`, undecodable → logged
    /// and `Ok(None)`, unreadable → `Err`.
    fn read_record(path: &Path) -> Result<Option<Track>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<Track>(&bytes) {
            Ok(track) => Ok(Some(track)),
            Err(e) => {
                let err = TrackerError::corrupt(path.display().to_string(), e);
                warn!("[TrackStore] Skipping record: {}", err);
                Ok(None)
            }
        }
    }

    fn track_files(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.tracks_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with(TRACK_PREFIX) && name.ends_with(TRACK_SUFFIX) {
                paths.push(entry.path());
            }
        }
        Ok(paths)
    }

    /// Read one file for a listing. Unreadable files are skipped like corrupt
    /// ones so one bad file cannot hide the rest.
    fn read_listed(path: &Path) -> Option<Track> {
        match Self::read_record(path) {
            Ok(track) => track,
            Err(e) => {
                warn!("[TrackStore] Could not read {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Make a rename inside `dir` durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Directory handles cannot be synced here; the rename is left to the OS.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

impl TrackStore for FileTrackStore {
    fn save(&self, track: &Track) -> Result<()> {
        self.write_record(&self.track_path(track.id), track)?;
        info!(
            "[TrackStore] Saved track {} ({} points)",
            track.id,
            track.points.len()
        );
        Ok(())
    }

    fn load(&self, id: i64) -> Result<Option<Track>> {
        Self::read_record(&self.track_path(id))
    }

    fn load_all(&self) -> Result<Vec<Track>> {
        let paths = self.track_files()?;

        #[cfg(feature = "parallel")]
        let mut tracks: Vec<Track> = paths
            .par_iter()
            .filter_map(|path| Self::read_listed(path))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let mut tracks: Vec<Track> = paths
            .iter()
            .filter_map(|path| Self::read_listed(path))
            .collect();

        sort_newest_first(&mut tracks);
        debug!(
            "[TrackStore] Loaded {} of {} track files",
            tracks.len(),
            paths.len()
        );
        Ok(tracks)
    }

    fn delete(&self, id: i64) -> Result<bool> {
        match fs::remove_file(self.track_path(id)) {
            Ok(()) => {
                info!("[TrackStore] Deleted track {}", id);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn autosave(&self, track: &Track) -> Result<()> {
        self.write_record(&self.autosave_path(), track)?;
        debug!(
            "[TrackStore] Autosaved track {} ({} points)",
            track.id,
            track.points.len()
        );
        Ok(())
    }

    fn load_autosave(&self) -> Result<Option<Track>> {
        Self::read_record(&self.autosave_path())
    }

    /// Read from file names alone, so unreadable records still count.
    fn max_track_id(&self) -> Result<Option<i64>> {
        let ids = self.track_files()?.into_iter().filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            name.strip_prefix(TRACK_PREFIX)?
                .strip_suffix(TRACK_SUFFIX)?
                .parse::<i64>()
                .ok()
        });
        Ok(ids.max())
    }

    fn clear_autosave(&self) -> Result<()> {
        match fs::remove_file(self.autosave_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
