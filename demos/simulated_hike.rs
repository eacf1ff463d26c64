//! Replays a synthetic hike through the recorder and prints what a watch face
//! would show.
//!
//! Run with: `cargo run --example simulated_hike`
//! Set `RUST_LOG=debug` to see the recorder's log lines.

use std::sync::Arc;

use hike_tracker::geo_utils::{bearing, cardinal_direction, direction_arrow};
use hike_tracker::{
    format_distance, format_duration, Clock, FileTrackStore, ManualClock, PointOutcome,
    SessionController, TrackPoint, TrackerConfig,
};

const START: i64 = 1_717_228_800_000;
const FIX_INTERVAL_MS: i64 = 2_000;

/// Out-and-back ridge walk with an occasional poor fix.
fn synthetic_fixes(n: usize) -> Vec<TrackPoint> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            let outbound = (t / n as f64 * std::f64::consts::PI).sin();
            let accuracy = if i % 23 == 11 { 45.0 } else { 6.0 };
            TrackPoint::new(
                46.5580 + outbound * 0.012 + (t * 0.2).sin() * 5e-5,
                7.8350 + t * 4e-5,
                1200.0 + outbound * 350.0 + (t * 0.7).sin() * 1.5,
                START + i as i64 * FIX_INTERVAL_MS,
                accuracy,
                1.2,
            )
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let dir = tempfile::tempdir()?;
    let clock = ManualClock::new(START);
    let store = FileTrackStore::open(dir.path())?;
    let controller =
        SessionController::with_clock(store, TrackerConfig::default(), Arc::new(clock.clone()))?;

    let updates = controller.subscribe();
    controller.start_named("Ridge walk")?;

    let fixes = synthetic_fixes(600);
    let mut rejected = 0;
    // Shifts fixes after the lunch break
    let mut offset = 0;
    for (i, fix) in fixes.iter().enumerate() {
        let fix = TrackPoint {
            timestamp: fix.timestamp + offset,
            ..*fix
        };
        clock.set(fix.timestamp);
        if let PointOutcome::Rejected(_) = controller.add_fix(fix) {
            rejected += 1;
        }

        if i == 300 {
            controller.pause()?;
            offset += 10 * 60_000;
            clock.advance(offset);
            controller.resume()?;
        }

        if i % 150 == 149 {
            if let Some(stats) = controller.current_state().stats {
                let points = controller.points_snapshot();
                let heading = match points.as_slice() {
                    [.., a, b] => bearing(a, b),
                    _ => 0.0,
                };
                println!(
                    "{}  {:>9}  +{:.0} m / -{:.0} m  {} {}",
                    format_duration(stats.duration),
                    format_distance(stats.distance),
                    stats.elevation_gain,
                    stats.elevation_loss,
                    direction_arrow(heading),
                    cardinal_direction(heading),
                );
            }
        }
    }

    let Some(track) = controller.stop()? else {
        return Ok(());
    };
    let simplified = hike_tracker::simplify(&track.points, controller.config().simplify_tolerance);

    println!();
    println!("{}", track.name);
    println!(
        "  {} points recorded, {} rejected, {} after simplification",
        track.points.len(),
        rejected,
        simplified.len()
    );
    println!(
        "  {} in {}",
        format_distance(track.total_distance),
        format_duration(track.duration(clock.now_millis()))
    );
    if let Some((low, high)) = track.altitude_range() {
        println!("  altitude {:.0}-{:.0} m", low, high);
    }
    println!(
        "  {} state updates published",
        std::iter::from_fn(|| updates.try_recv()).count()
    );

    let gpx_path = std::env::temp_dir().join(format!("track_{}.gpx", track.id));
    std::fs::write(&gpx_path, hike_tracker::to_gpx(&track))?;
    println!("  GPX written to {}", gpx_path.display());

    Ok(())
}
