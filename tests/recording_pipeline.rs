//! End-to-end recording tests against the on-disk stores.
//!
//! Fix stream -> controller -> autosave -> crash -> recovery -> stop -> saved
//! track, for both backends.

use std::sync::Arc;
use std::time::Duration;

use hike_tracker::{
    geo_utils, FileTrackStore, ManualClock, SessionController, TrackPoint, TrackStore,
    TrackerConfig, TrackingPhase,
};
#[cfg(feature = "persistence")]
use hike_tracker::SqliteTrackStore;

const T0: i64 = 1_717_228_800_000;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A switchback climb: north-east with lateral wiggle, altitude oscillating
/// on a rising trend, one fix every two seconds.
fn hike(n: usize) -> Vec<TrackPoint> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            TrackPoint::new(
                46.5580 + t * 3e-5,
                7.8350 + t * 1e-5 + (t * 0.25).sin() * 4e-5,
                1200.0 + t * 0.8 + (t * 0.9).sin() * 2.5,
                T0 + i as i64 * 2_000,
                4.0 + (i % 7) as f32,
                1.1 + (t * 0.1).cos() as f32 * 0.2,
            )
        })
        .collect()
}

fn controller<S: TrackStore + 'static>(store: S, clock: &ManualClock) -> SessionController<S> {
    SessionController::with_clock(store, TrackerConfig::default(), Arc::new(clock.clone()))
        .unwrap()
}

fn record_crash_recover_finish<S, F>(open: F)
where
    S: TrackStore + 'static,
    F: Fn() -> S,
{
    init_logging();
    let clock = ManualClock::new(T0);
    let points = hike(57);

    // First run: 35 points, then the process dies without stopping
    let first = controller(open(), &clock);
    let id = first.start().unwrap();
    for p in &points[..35] {
        assert!(first.add_fix(*p).is_appended());
    }
    first.flush();
    std::mem::forget(first);

    // Last autosave was at 30 points
    let second = controller(open(), &clock);
    let state = second.current_state();
    assert_eq!(state.phase, TrackingPhase::Paused);
    let recovered = state.current_track.unwrap();
    assert_eq!(recovered.id(), id);
    assert_eq!(recovered.point_count(), 30);
    assert_eq!(recovered.points().to_vec(), points[..30]);

    second.resume().unwrap();
    for p in &points[30..] {
        assert!(second.add_fix(*p).is_appended());
    }
    clock.set(T0 + 3_600_000);
    let track = second.stop().unwrap().unwrap();

    assert_eq!(track.id, id);
    assert_eq!(track.points, points);
    assert_eq!(track.end_time, Some(T0 + 3_600_000));

    let expected: f64 = geo_utils::polyline_length(&points);
    assert!((track.total_distance as f64 - expected).abs() < expected * 1e-5);
    let net = (track.elevation_gain - track.elevation_loss) as f64;
    let rise = points.last().unwrap().altitude - points[0].altitude;
    assert!((net - rise).abs() < 1e-2);

    // Durable and the slot is empty
    drop(second);
    let store = open();
    assert_eq!(store.load(id).unwrap(), Some(track));
    assert_eq!(store.load_autosave().unwrap(), None);

    // A fresh controller starts idle
    let third = controller(open(), &clock);
    assert_eq!(third.phase(), TrackingPhase::Idle);
    assert_eq!(third.saved_tracks().unwrap().len(), 1);
}

#[test]
fn test_file_store_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    record_crash_recover_finish(|| FileTrackStore::open(&root).unwrap());
}

#[cfg(feature = "persistence")]
#[test]
fn test_sqlite_store_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tracks.db");
    let path = path.to_str().unwrap().to_string();
    record_crash_recover_finish(|| SqliteTrackStore::new(&path).unwrap());
}

#[test]
fn test_graceful_shutdown_resumes_paused() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(T0);

    let first = controller(FileTrackStore::open(dir.path()).unwrap(), &clock);
    first.start().unwrap();
    for p in hike(7) {
        first.add_fix(p);
    }
    // Below the autosave interval, but shutdown writes the slot
    drop(first);

    let second = controller(FileTrackStore::open(dir.path()).unwrap(), &clock);
    assert_eq!(second.phase(), TrackingPhase::Paused);
    assert_eq!(second.points_snapshot().len(), 7);
}

#[test]
fn test_subscriber_sees_every_accepted_point() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(T0);
    let c = controller(FileTrackStore::open(dir.path()).unwrap(), &clock);

    let (tx, rx) = std::sync::mpsc::channel();
    let handle = c.subscribe_with(move |state| {
        let _ = tx.send(state.stats.map(|s| s.point_count).unwrap_or(0));
    });

    c.start().unwrap();
    let mut noisy = hike(1)[0];
    noisy.accuracy = 75.0;
    for (i, p) in hike(15).into_iter().enumerate() {
        c.add_fix(p);
        if i == 5 {
            c.add_fix(noisy);
        }
    }

    let counts: Vec<u32> = (0..17)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    // Idle replay, start, then one notification per accepted point
    let expected: Vec<u32> = [0, 0].into_iter().chain(1..=15).collect();
    assert_eq!(counts, expected);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    handle.cancel();
}

#[test]
fn test_config_file_controls_filter_and_cadence() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("tracker_config.json");
    std::fs::write(
        &config_path,
        r#"{ "accuracy_threshold_meters": 8.0, "autosave_interval": 3 }"#,
    )
    .unwrap();
    let config = TrackerConfig::from_file(&config_path).unwrap();

    let store = FileTrackStore::open(dir.path()).unwrap();
    let c = SessionController::new(store, config).unwrap();
    c.start().unwrap();

    // hike() accuracies cycle 4..=10 m; 9 and 10 fail an 8 m threshold
    let accepted = hike(14).into_iter().filter(|p| c.add_fix(*p).is_appended()).count();
    assert_eq!(accepted, 10);

    c.flush();
    let slot = c.store().load_autosave().unwrap().unwrap();
    assert_eq!(slot.points.len(), 9);
}
