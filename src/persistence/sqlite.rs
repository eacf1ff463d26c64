//! SQLite backend.
//!
//! Tracks are stored as MessagePack blobs with a few summary columns beside
//! them for listing without decoding. The autosave slot is a table that can
//! hold at most one row.

use std::sync::Mutex;

use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension};

use super::{sort_newest_first, TrackStore};
use crate::error::{Result, TrackerError};
use crate::{lock_or_recover, Track};

/// Track store backed by a single SQLite database.
pub struct SqliteTrackStore {
    db: Mutex<Connection>,
    db_path: String,
}

impl SqliteTrackStore {
    /// Open (creating if needed) the database at `db_path`.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        info!("[TrackStore] Opened SQLite store at {}", db_path);
        Ok(Self {
            db: Mutex::new(db),
            db_path: db_path.to_string(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- Finished tracks, one row per track
            CREATE TABLE IF NOT EXISTS tracks (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                point_count INTEGER NOT NULL,
                total_distance REAL NOT NULL,
                data BLOB NOT NULL
            );

            -- Crash recovery slot
            CREATE TABLE IF NOT EXISTS autosave (
                slot INTEGER PRIMARY KEY CHECK (slot = 0),
                track_id INTEGER NOT NULL,
                saved_at INTEGER NOT NULL,
                data BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tracks_start ON tracks(start_time);
        "#,
        )?;
        Ok(())
    }

    /// Number of stored tracks, without decoding them.
    pub fn track_count(&self) -> Result<u32> {
        let db = lock_or_recover(&self.db);
        let count: u32 = db.query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn encode(track: &Track) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(track).map_err(|e| TrackerError::Serialization {
        message: e.to_string(),
    })
}

fn decode(record: String, blob: &[u8]) -> Option<Track> {
    match rmp_serde::from_slice::<Track>(blob) {
        Ok(track) => Some(track),
        Err(e) => {
            warn!("[TrackStore] Skipping record: {}", TrackerError::corrupt(record, e));
            None
        }
    }
}

impl TrackStore for SqliteTrackStore {
    fn save(&self, track: &Track) -> Result<()> {
        let blob = encode(track)?;
        let db = lock_or_recover(&self.db);
        db.execute(
            "INSERT OR REPLACE INTO tracks
             (id, name, start_time, end_time, point_count, total_distance, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                track.id,
                track.name,
                track.start_time,
                track.end_time,
                track.points.len() as i64,
                track.total_distance as f64,
                blob,
            ],
        )?;
        info!(
            "[TrackStore] Saved track {} ({} points)",
            track.id,
            track.points.len()
        );
        Ok(())
    }

    fn load(&self, id: i64) -> Result<Option<Track>> {
        let db = lock_or_recover(&self.db);
        let blob: Option<Vec<u8>> = db
            .query_row("SELECT data FROM tracks WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(blob.and_then(|b| decode(format!("tracks/{}", id), &b)))
    }

    fn load_all(&self) -> Result<Vec<Track>> {
        let rows: Vec<(i64, Vec<u8>)> = {
            let db = lock_or_recover(&self.db);
            let mut stmt = db.prepare("SELECT id, data FROM tracks")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let total = rows.len();
        let mut tracks: Vec<Track> = rows
            .into_iter()
            .filter_map(|(id, blob)| decode(format!("tracks/{}", id), &blob))
            .collect();
        sort_newest_first(&mut tracks);
        debug!("[TrackStore] Loaded {} of {} track rows", tracks.len(), total);
        Ok(tracks)
    }

    fn delete(&self, id: i64) -> Result<bool> {
        let db = lock_or_recover(&self.db);
        let removed = db.execute("DELETE FROM tracks WHERE id = ?1", params![id])?;
        if removed > 0 {
            info!("[TrackStore] Deleted track {}", id);
        }
        Ok(removed > 0)
    }

    fn autosave(&self, track: &Track) -> Result<()> {
        let blob = encode(track)?;
        let saved_at = chrono::Utc::now().timestamp_millis();
        let db = lock_or_recover(&self.db);
        db.execute(
            "INSERT OR REPLACE INTO autosave (slot, track_id, saved_at, data)
             VALUES (0, ?1, ?2, ?3)",
            params![track.id, saved_at, blob],
        )?;
        debug!(
            "[TrackStore] Autosaved track {} ({} points)",
            track.id,
            track.points.len()
        );
        Ok(())
    }

    fn load_autosave(&self) -> Result<Option<Track>> {
        let db = lock_or_recover(&self.db);
        let blob: Option<Vec<u8>> = db
            .query_row("SELECT data FROM autosave WHERE slot = 0", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(blob.and_then(|b| decode("autosave".to_string(), &b)))
    }

    fn max_track_id(&self) -> Result<Option<i64>> {
        let db = lock_or_recover(&self.db);
        let id = db.query_row("SELECT MAX(id) FROM tracks", [], |row| {
            row.get::<_, Option<i64>>(0)
        })?;
        Ok(id)
    }

    fn clear_autosave(&self) -> Result<()> {
        let db = lock_or_recover(&self.db);
        db.execute("DELETE FROM autosave", [])?;
        Ok(())
    }
}
