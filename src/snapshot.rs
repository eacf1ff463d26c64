//! # Track Snapshots
//!
//! Structurally shared views of an in-progress track.
//!
//! The session appends to a [`PointLog`] while observers hold earlier
//! snapshots of it. Full chunks are frozen and shared by every clone, so a
//! snapshot copies at most one partial chunk however long the hike gets.
//!
//! ```text
//! chunks: [c0][c1][c2] ... shared, immutable
//! tail:   [p p p p]        copied on write while a snapshot holds it
//! ```

use std::fmt;
use std::sync::Arc;

use crate::{Track, TrackPoint, TrackStats};

/// Points per frozen chunk.
pub const CHUNK_LEN: usize = 32;

// ============================================================================
// Point log
// ============================================================================

/// Append-only point sequence whose clones share every full chunk.
#[derive(Clone, Default)]
pub struct PointLog {
    chunks: Arc<Vec<Arc<[TrackPoint]>>>,
    tail: Arc<Vec<TrackPoint>>,
}

impl PointLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len() * CHUNK_LEN + self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first(&self) -> Option<&TrackPoint> {
        self.get(0)
    }

    pub fn last(&self) -> Option<&TrackPoint> {
        self.tail
            .last()
            .or_else(|| self.chunks.last().and_then(|chunk| chunk.last()))
    }

    pub fn get(&self, index: usize) -> Option<&TrackPoint> {
        let chunk = index / CHUNK_LEN;
        match self.chunks.get(chunk) {
            Some(points) => points.get(index % CHUNK_LEN),
            None if chunk == self.chunks.len() => self.tail.get(index % CHUNK_LEN),
            None => None,
        }
    }

    /// Points in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &TrackPoint> + '_ {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.iter())
            .chain(self.tail.iter())
    }

    /// Contiguous copy of every point.
    pub fn to_vec(&self) -> Vec<TrackPoint> {
        let mut points = Vec::with_capacity(self.len());
        for chunk in self.chunks.iter() {
            points.extend_from_slice(chunk);
        }
        points.extend_from_slice(&self.tail);
        points
    }

    /// Append one point. Only the partial tail is copied when a snapshot
    /// still shares it.
    pub(crate) fn push(&mut self, point: TrackPoint) {
        let tail = Arc::make_mut(&mut self.tail);
        tail.push(point);
        if tail.len() == CHUNK_LEN {
            let full: Arc<[TrackPoint]> = Arc::from(std::mem::take(tail));
            Arc::make_mut(&mut self.chunks).push(full);
        }
    }

    /// Addresses of the frozen chunks, for checking what clones share.
    #[cfg(test)]
    pub(crate) fn chunk_addrs(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .map(|chunk| chunk.as_ptr() as usize)
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn tail_len(&self) -> usize {
        self.tail.len()
    }
}

impl From<Vec<TrackPoint>> for PointLog {
    fn from(points: Vec<TrackPoint>) -> Self {
        let mut log = PointLog::new();
        for point in points {
            log.push(point);
        }
        log
    }
}

impl PartialEq for PointLog {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl fmt::Debug for PointLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

// ============================================================================
// Track snapshot
// ============================================================================

/// Immutable view of a track at one moment.
///
/// Cloning shares the header and every frozen chunk. Use
/// [`to_track`](Self::to_track) for an owned, contiguous [`Track`].
#[derive(Clone, PartialEq)]
pub struct TrackSnapshot {
    /// Metadata and running totals; its own `points` stay empty.
    header: Arc<Track>,
    points: PointLog,
}

impl TrackSnapshot {
    pub fn id(&self) -> i64 {
        self.header.id
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn start_time(&self) -> i64 {
        self.header.start_time
    }

    pub fn end_time(&self) -> Option<i64> {
        self.header.end_time
    }

    pub fn is_active(&self) -> bool {
        self.header.is_active()
    }

    pub fn total_distance(&self) -> f32 {
        self.header.total_distance
    }

    pub fn elevation_gain(&self) -> f32 {
        self.header.elevation_gain
    }

    pub fn elevation_loss(&self) -> f32 {
        self.header.elevation_loss
    }

    /// (min, max) altitude, or `None` before the first point.
    pub fn altitude_range(&self) -> Option<(f64, f64)> {
        if self.points.is_empty() {
            None
        } else {
            Some((self.header.min_altitude, self.header.max_altitude))
        }
    }

    pub fn duration(&self, now: i64) -> i64 {
        self.header.duration(now)
    }

    pub fn points(&self) -> &PointLog {
        &self.points
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Statistics as of `now`.
    pub fn stats(&self, last_fix: Option<&TrackPoint>, now: i64) -> TrackStats {
        TrackStats::from_totals(&self.header, self.points.len(), self.points.last(), last_fix, now)
    }

    /// Owned copy with the points laid out contiguously.
    pub fn to_track(&self) -> Track {
        let mut track = (*self.header).clone();
        track.points = self.points.to_vec();
        track
    }

    /// Append a point, folding it into the running totals.
    pub(crate) fn record_point(&mut self, point: TrackPoint) {
        let last = self.points.last().copied();
        Arc::make_mut(&mut self.header).fold_point(last.as_ref(), &point);
        self.points.push(point);
    }

    pub(crate) fn set_end_time(&mut self, end_time: i64) {
        Arc::make_mut(&mut self.header).end_time = Some(end_time);
    }
}

impl From<Track> for TrackSnapshot {
    fn from(mut track: Track) -> Self {
        let points = PointLog::from(std::mem::take(&mut track.points));
        Self {
            header: Arc::new(track),
            points,
        }
    }
}

impl fmt::Debug for TrackSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackSnapshot")
            .field("id", &self.header.id)
            .field("name", &self.header.name)
            .field("end_time", &self.header.end_time)
            .field("point_count", &self.points.len())
            .field("total_distance", &self.header.total_distance)
            .finish()
    }
}
