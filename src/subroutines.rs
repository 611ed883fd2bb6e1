//! Helpers the engine can call from replies via `<call>`.

use crate::engine::MatchingEngine;
use crate::geo::GeoCache;
use crate::session::UNDEFINED;
use chrono::DateTime;
use std::sync::Arc;

const FULL: &str = "▰";
const EMPTY: &str = "▱";
const BAR_CELLS: usize = 10;

/// Register every subroutine on `engine`. Without a geocode cache,
/// `gpsdistance` always answers `undefined`.
pub fn register(engine: &mut dyn MatchingEngine, geo: Option<Arc<GeoCache>>) {
    engine.set_subroutine(
        "gpsdistance",
        Arc::new(move |args: &[String]| gps_distance(geo.as_deref(), args)),
    );
    engine.set_subroutine("percent", Arc::new(|args: &[String]| percent(args)));
    engine.set_subroutine("since", Arc::new(|args: &[String]| since(args)));
}

/// `gpsdistance <from> <to>`: kilometres between two places.
pub fn gps_distance(geo: Option<&GeoCache>, args: &[String]) -> String {
    let (Some(geo), [from, to, ..]) = (geo, args) else {
        return UNDEFINED.to_string();
    };
    match geo.distance(from, to) {
        Ok(km) => format!("{:.2}", km),
        Err(e) => {
            tracing::debug!(from = %from, to = %to, "gpsdistance unresolved: {}", e);
            UNDEFINED.to_string()
        }
    }
}

/// `percent <part> <total>`: a ten-cell progress bar with the percentage.
pub fn percent(args: &[String]) -> String {
    let parsed = match args {
        [part, total, ..] => part.parse::<f64>().ok().zip(total.parse::<f64>().ok()),
        _ => None,
    };
    let Some((part, total)) = parsed else {
        return EMPTY.repeat(BAR_CELLS);
    };

    if part > total {
        return format!("{} {:.2}%", FULL.repeat(BAR_CELLS), 100.0);
    }
    let per = part * 100.0 / total;
    let filled = ((per / 10.0).round_ties_even().max(0.0) as usize).min(BAR_CELLS);
    format!(
        "{}{} {:.2}%",
        FULL.repeat(filled),
        EMPTY.repeat(BAR_CELLS - filled),
        per
    )
}

/// `since <t1> <t2>`: seconds from `t2` to `t1`, both RFC 3339.
pub fn since(args: &[String]) -> String {
    let [t1, t2, ..] = args else {
        return "{{ERROR}}".to_string();
    };
    match (
        DateTime::parse_from_rfc3339(t1),
        DateTime::parse_from_rfc3339(t2),
    ) {
        (Ok(t1), Ok(t2)) => t1.signed_duration_since(t2).num_seconds().to_string(),
        (Err(e), _) | (_, Err(e)) => {
            tracing::debug!("since: bad timestamp: {}", e);
            "{{ERROR}}".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn percent_bar_rounds_half_to_even() {
        assert_eq!(percent(&args(&["25", "100"])), "▰▰▱▱▱▱▱▱▱▱ 25.00%");
        assert_eq!(percent(&args(&["35", "100"])), "▰▰▰▰▱▱▱▱▱▱ 35.00%");
        assert_eq!(percent(&args(&["0", "10"])), "▱▱▱▱▱▱▱▱▱▱ 0.00%");
        assert_eq!(percent(&args(&["10", "10"])), "▰▰▰▰▰▰▰▰▰▰ 100.00%");
    }

    #[test]
    fn percent_over_total_is_full() {
        assert_eq!(percent(&args(&["12", "10"])), "▰▰▰▰▰▰▰▰▰▰ 100.00%");
    }

    #[test]
    fn percent_bad_input_is_empty_bar() {
        assert_eq!(percent(&args(&["x", "10"])), "▱▱▱▱▱▱▱▱▱▱");
        assert_eq!(percent(&args(&["1"])), "▱▱▱▱▱▱▱▱▱▱");
    }

    #[test]
    fn since_is_signed_seconds() {
        let a = "2024-01-01T01:00:00Z".to_string();
        let b = "2024-01-01T00:00:00Z".to_string();
        assert_eq!(since(&[a.clone(), b.clone()]), "3600");
        assert_eq!(since(&[b, a]), "-3600");
        assert_eq!(since(&args(&["nope", "2024-01-01T00:00:00Z"])), "{{ERROR}}");
    }

    #[test]
    fn gps_distance_without_cache_is_undefined() {
        assert_eq!(gps_distance(None, &args(&["paris", "london"])), UNDEFINED);
    }
}
