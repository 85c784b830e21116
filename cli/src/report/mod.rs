//! Report emitters.
//!
//! Rendering is a collaborator surface, not a product one: plain HTML tables
//! for the statistics report, a linear listing for trace mode. The semantic
//! content comes entirely from the analysis passes.

pub mod html;
pub mod trace_view;

use chrono::{Local, TimeZone};

/// Wall-clock rendering of a tracer timestamp (CLOCK_REALTIME ns).
pub fn format_ts(ns: u64) -> String {
    let secs = (ns / 1_000_000_000) as i64;
    let sub = (ns % 1_000_000_000) as u32;
    match Local.timestamp_opt(secs, sub).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        None => format!("{ns}ns"),
    }
}

/// Nanosecond quantity with a unit, trimmed for readability.
pub fn format_ns(v: f64) -> String {
    if v >= 1_000_000_000.0 {
        format!("{:.3}s", v / 1_000_000_000.0)
    } else if v >= 1_000_000.0 {
        format!("{:.3}ms", v / 1_000_000.0)
    } else if v >= 1_000.0 {
        format!("{:.3}us", v / 1_000.0)
    } else {
        format!("{v:.0}ns")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ns_formatting_picks_a_sensible_unit() {
        assert_eq!(format_ns(250.0), "250ns");
        assert_eq!(format_ns(2_500.0), "2.500us");
        assert_eq!(format_ns(2_500_000.0), "2.500ms");
        assert_eq!(format_ns(2_500_000_000.0), "2.500s");
    }

    #[test]
    fn timestamp_formatting_is_stable() {
        let a = format_ts(1_700_000_000_123_456_789);
        let b = format_ts(1_700_000_000_123_456_789);
        assert_eq!(a, b);
        assert!(a.contains(':'));
    }
}
