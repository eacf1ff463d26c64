//! GPX 1.1 export.
//!
//! One `<trk>` with one `<trkseg>`, one `<trkpt>` per recorded point in
//! order. Coordinates and elevation are written with full precision, times as
//! UTC to the second.

use chrono::DateTime;

use crate::Track;

/// Creator attribute written into the `<gpx>` root.
pub const GPX_CREATOR: &str = "HikingTracker";

/// Serialize a track to a GPX document. Pure, no IO.
pub fn to_gpx(track: &Track) -> String {
    // ~150 bytes per trkpt
    let mut gpx = String::with_capacity(160 + track.points.len() * 150);

    gpx.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    gpx.push_str(&format!("<gpx version=\"1.1\" creator=\"{}\">\n", GPX_CREATOR));
    gpx.push_str("  <trk>\n");
    gpx.push_str(&format!("    <name>{}</name>\n", escape_xml(&track.name)));
    gpx.push_str("    <trkseg>\n");

    for point in &track.points {
        gpx.push_str(&format!(
            "      <trkpt lat=\"{}\" lon=\"{}\">\n",
            decimal(point.latitude),
            decimal(point.longitude)
        ));
        gpx.push_str(&format!("        <ele>{}</ele>\n", decimal(point.altitude)));
        gpx.push_str(&format!(
            "        <time>{}</time>\n",
            format_utc(point.timestamp)
        ));
        gpx.push_str("      </trkpt>\n");
    }

    gpx.push_str("    </trkseg>\n");
    gpx.push_str("  </trk>\n");
    gpx.push_str("</gpx>");

    gpx
}

/// Plain `xsd:decimal` text: shortest round-trip digits, never an exponent,
/// always a fraction part (`100.0`, `0.00001`).
fn decimal(value: f64) -> String {
    let text = value.to_string();
    if text.contains('.') || !value.is_finite() {
        text
    } else {
        text + ".0"
    }
}

/// `2024-01-01T12:00:00Z` from epoch milliseconds.
fn format_utc(timestamp_ms: i64) -> String {
    match DateTime::from_timestamp_millis(timestamp_ms) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => "1970-01-01T00:00:00Z".to_string(),
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
