//! Validation and normalization of located segments.

use serde_json::Value;
use tracing::{debug, warn};

use autoedit_models::Segment;

use crate::locator::RawSegment;

/// Segments shorter than this are widened.
pub const MIN_SEGMENT_SECS: f64 = 1.0;

/// Seconds added on each side of a short segment.
pub const SEGMENT_PADDING_SECS: f64 = 0.5;

/// Result of normalizing a locator response.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSegments {
    pub segments: Vec<Segment>,
    /// Segments dropped because they were empty or inverted
    pub discarded: usize,
    /// Whether the whole video was used because nothing survived
    pub fell_back: bool,
}

/// Turn raw locator segments into cut ranges within `[0, duration]`.
///
/// Each segment is coerced, clamped, dropped when `start >= end`, and padded
/// once when shorter than [`MIN_SEGMENT_SECS`]. When nothing survives, the
/// whole video is kept. Running the output through again yields the same list.
pub fn normalize_segments(raw: &[RawSegment], duration: f64) -> NormalizedSegments {
    let duration = duration.max(0.0);
    let mut segments = Vec::with_capacity(raw.len());
    let mut discarded = 0;

    for (index, candidate) in raw.iter().enumerate() {
        let start = coerce(candidate.start_value(), 0.0).clamp(0.0, duration);
        let end = coerce(candidate.end_value(), duration).clamp(0.0, duration);

        if start >= end {
            warn!(index, start, end, "Discarding empty segment");
            discarded += 1;
            continue;
        }

        let segment = Segment {
            start,
            end,
            rationale: candidate.rationale_text(),
            padded: candidate.padded,
        };
        segments.push(pad_short(segment, duration));
    }

    let fell_back = segments.is_empty();
    if fell_back {
        warn!(duration, "No usable segments, keeping the whole video");
        segments.push(pad_short(Segment::new(0.0, duration), duration));
    }

    NormalizedSegments {
        segments,
        discarded,
        fell_back,
    }
}

fn pad_short(mut segment: Segment, duration: f64) -> Segment {
    if segment.padded || segment.duration() >= MIN_SEGMENT_SECS {
        return segment;
    }

    let (start, end) = (segment.start, segment.end);
    segment.start = (start - SEGMENT_PADDING_SECS).max(0.0);
    segment.end = (end + SEGMENT_PADDING_SECS).min(duration);
    segment.padded = true;
    debug!(start, end, padded_start = segment.start, padded_end = segment.end, "Padded short segment");
    segment
}

/// Numeric value of a JSON field.
///
/// Unparseable strings take `on_parse_failure`; anything else non-numeric is 0.
fn coerce(value: Option<&Value>, on_parse_failure: f64) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()).unwrap_or(0.0),
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => {
                warn!(value = %s, fallback = on_parse_failure, "Segment time is not a number");
                on_parse_failure
            }
        },
        _ => 0.0,
    }
}
