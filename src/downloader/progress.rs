//! Turns raw engine progress events into [`ProgressSnapshot`]s.
//!
//! Everything here is pure: the runner decides what to do with the result.

use std::path::PathBuf;
use std::sync::OnceLock;
use regex::Regex;
use crate::downloader::{EngineStage, JobStatus, ProgressSnapshot, RawProgressEvent};

/// Added to the previous percent when the engine gives no usable figure.
const FALLBACK_STEP: f64 = 1.5;
/// The fallback never climbs past this; only a real completion reaches 100.
const FALLBACK_CAP: f64 = 99.0;
/// Ceiling for engine percent strings; 100 is left to the `finished` event.
const REPORTED_CAP: f64 = 99.99;

const RATE_UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];

/// Result of translating one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub snapshot: ProgressSnapshot,
    /// Output file the engine reported with a `finished` event.
    pub filepath: Option<PathBuf>,
}

/// Translates one engine event given the job's previous snapshot.
///
/// Returns `None` for stages the engine may emit that carry no progress
/// meaning (anything other than downloading/finished/error).
pub fn translate(event: &RawProgressEvent, previous: Option<&ProgressSnapshot>) -> Option<Translation> {
    let last_percent = previous.map(|p| p.percent).unwrap_or(0.0);

    match event.stage.as_ref()? {
        EngineStage::Downloading => {
            let mut percent = downloading_percent(event, last_percent);
            if previous.map(|p| p.status) == Some(JobStatus::Downloading) {
                percent = percent.max(last_percent);
            }
            Some(Translation {
                snapshot: ProgressSnapshot {
                    percent: clamp_percent(percent),
                    rate: rate_label(event.speed),
                    status: JobStatus::Downloading,
                    error: None,
                },
                filepath: None,
            })
        }
        EngineStage::Finished => Some(Translation {
            snapshot: ProgressSnapshot::done(),
            filepath: event.filename.as_ref().map(PathBuf::from),
        }),
        EngineStage::Error => Some(Translation {
            snapshot: ProgressSnapshot::failed(
                clamp_percent(last_percent),
                "Error",
                event.error.clone().unwrap_or_else(|| "download error".to_string()),
            ),
            filepath: None,
        }),
        EngineStage::Other(stage) => {
            log::debug!("Ignoring progress event with stage '{}'", stage);
            None
        }
    }
}

fn downloading_percent(event: &RawProgressEvent, last_percent: f64) -> f64 {
    if let (Some(done), Some(total)) = (event.downloaded_bytes, event.total_bytes) {
        if total > 0.0 {
            return round2(done / total * 100.0);
        }
    }

    if let Some(parsed) = event.percent_str.as_deref().and_then(parse_percent) {
        return round2(parsed.min(REPORTED_CAP));
    }

    round2((last_percent + FALLBACK_STEP).min(FALLBACK_CAP))
}

/// Parses strings like `" 42.5%"`, including ones wrapped in terminal colour
/// codes. Anything else (`"N/A"`, `"Unknown %"`) yields `None`.
pub fn parse_percent(raw: &str) -> Option<f64> {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    static PERCENT: OnceLock<Option<Regex>> = OnceLock::new();

    let percent = PERCENT
        .get_or_init(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*%?\s*$").ok())
        .as_ref()?;
    let cleaned = match ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").ok()) {
        Some(ansi) => ansi.replace_all(raw, ""),
        None => raw.into(),
    };

    let captures = percent.captures(&cleaned)?;
    let value: f64 = captures.get(1)?.as_str().parse().ok()?;
    value.is_finite().then_some(value)
}

/// Formats a throughput with binary prefixes: `1536.0` -> `"1.50 KB/s"`.
pub fn format_rate(bytes_per_sec: f64) -> String {
    let mut value = if bytes_per_sec.is_finite() { bytes_per_sec.max(0.0) } else { 0.0 };
    let mut unit = 0;
    while value >= 1024.0 && unit < RATE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, RATE_UNITS[unit])
}

/// Rate label for a snapshot; `"0 B/s"` when the engine reported no rate.
pub fn rate_label(speed: Option<f64>) -> String {
    match speed {
        Some(bps) if bps.is_finite() && bps > 0.0 => format_rate(bps),
        _ => "0 B/s".to_string(),
    }
}

pub fn clamp_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        return 0.0;
    }
    percent.clamp(0.0, 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn snapshot_of(event: &RawProgressEvent, previous: Option<&ProgressSnapshot>) -> ProgressSnapshot {
        translate(event, previous).expect("event should translate").snapshot
    }

    #[test]
    fn rate_uses_binary_prefixes() {
        assert_eq!(format_rate(0.0), "0.00 B/s");
        assert_eq!(format_rate(1536.0), "1.50 KB/s");
        assert_eq!(format_rate(1048576.0), "1.00 MB/s");
        assert_eq!(format_rate(3.0 * 1024.0 * 1024.0 * 1024.0), "3.00 GB/s");
        assert_eq!(format_rate(5.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0), "5120.00 GB/s");
        assert_eq!(format_rate(1023.0), "1023.00 B/s");
    }

    #[test]
    fn missing_rate_is_zero_label() {
        assert_eq!(rate_label(None), "0 B/s");
        assert_eq!(rate_label(Some(0.0)), "0 B/s");
        assert_eq!(rate_label(Some(2048.0)), "2.00 KB/s");
    }

    #[test]
    fn percent_from_bytes_is_rounded() {
        let event = RawProgressEvent::downloading()
            .with_bytes(1.0, Some(3.0))
            .with_speed(1536.0);
        let snapshot = snapshot_of(&event, None);
        assert_eq!(snapshot.percent, 33.33);
        assert_eq!(snapshot.rate, "1.50 KB/s");
        assert_eq!(snapshot.status, JobStatus::Downloading);
    }

    #[test]
    fn percent_from_bytes_is_clamped() {
        let event = RawProgressEvent::downloading().with_bytes(150.0, Some(100.0));
        assert_eq!(snapshot_of(&event, None).percent, 100.0);
    }

    #[test]
    fn percent_string_used_when_total_unknown() {
        let event = RawProgressEvent::downloading()
            .with_bytes(500.0, None)
            .with_percent_str("\u{1b}[0;94m 42.5%\u{1b}[0m");
        assert_eq!(snapshot_of(&event, None).percent, 42.5);
    }

    #[test]
    fn oversized_percent_string_stays_below_hundred() {
        let event = RawProgressEvent::downloading().with_percent_str("120%");
        assert_eq!(snapshot_of(&event, None).percent, 99.99);

        let event = RawProgressEvent::downloading().with_percent_str("100.0%");
        let previous = ProgressSnapshot::starting();
        assert!(snapshot_of(&event, Some(&previous)).percent < 100.0);
    }

    #[test]
    fn fallback_steps_and_caps_below_hundred() {
        let event = RawProgressEvent::downloading().with_percent_str("N/A");
        let mut previous = ProgressSnapshot::starting();

        let first = snapshot_of(&event, Some(&previous));
        assert_eq!(first.percent, 1.5);

        for _ in 0..200 {
            previous = snapshot_of(&event, Some(&previous));
            assert!(previous.percent < 100.0);
        }
        assert_eq!(previous.percent, FALLBACK_CAP);
    }

    #[test]
    fn finished_reports_done_and_path() {
        let event = RawProgressEvent::finished(Some("/tmp/abc-clip.mp4".to_string()));
        let translation = translate(&event, None).unwrap();
        assert_eq!(translation.snapshot, ProgressSnapshot::done());
        assert_eq!(translation.filepath, Some(PathBuf::from("/tmp/abc-clip.mp4")));
    }

    #[test]
    fn error_keeps_last_percent_and_message() {
        let previous = ProgressSnapshot {
            percent: 63.2,
            rate: "1.00 MB/s".to_string(),
            status: JobStatus::Downloading,
            error: None,
        };
        let snapshot = snapshot_of(&RawProgressEvent::error("HTTP Error 403: Forbidden"), Some(&previous));
        assert_eq!(snapshot.percent, 63.2);
        assert_eq!(snapshot.rate, "Error");
        assert_eq!(snapshot.status, JobStatus::Error);
        assert_eq!(snapshot.error.as_deref(), Some("HTTP Error 403: Forbidden"));
    }

    #[test]
    fn unknown_stage_is_ignored() {
        let event = RawProgressEvent {
            stage: Some(EngineStage::Other("processing".to_string())),
            ..RawProgressEvent::default()
        };
        assert!(translate(&event, None).is_none());
        assert!(translate(&RawProgressEvent::default(), None).is_none());
    }

    #[test]
    fn downloading_percent_never_decreases() {
        // Mix of byte counts, percent strings and unusable events.
        let mut rng = StdRng::seed_from_u64(0x2545_f491_4f6c_dd1d);

        let mut previous = ProgressSnapshot::starting();
        for _ in 0..2_000 {
            let event = match rng.gen_range(0..4) {
                0 => RawProgressEvent::downloading()
                    .with_bytes(rng.gen_range(0..1000) as f64, Some(1000.0)),
                1 => RawProgressEvent::downloading()
                    .with_percent_str(format!("{}%", rng.gen_range(0..120))),
                2 => RawProgressEvent::downloading().with_percent_str("garbage"),
                _ => RawProgressEvent::downloading().with_bytes(rng.gen_range(0..5000) as f64, None),
            };
            let snapshot = snapshot_of(&event, Some(&previous));
            assert!((0.0..=100.0).contains(&snapshot.percent));
            assert!(snapshot.percent >= previous.percent);
            assert_eq!(snapshot.status, JobStatus::Downloading);
            previous = snapshot;
        }
    }
}
