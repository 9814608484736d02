//! Segment locator contract and response parsing.

use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use autoedit_media::VideoInfo;
use autoedit_models::Segment;

use crate::error::{WorkerError, WorkerResult};

/// Input for one locate call.
#[derive(Debug, Clone, Copy)]
pub struct LocateRequest<'a> {
    pub video_path: &'a Path,
    pub video: &'a VideoInfo,
    /// Empty means "pick the most engaging parts"
    pub script_text: &'a str,
}

/// Candidate segments returned by a locator.
#[derive(Debug, Clone, Default)]
pub struct LocatorOutput {
    pub segments: Vec<RawSegment>,
    pub analysis: String,
}

/// Finds the parts of a video that match a script.
#[async_trait]
pub trait SegmentLocator: Send + Sync {
    async fn locate(&self, request: &LocateRequest<'_>) -> WorkerResult<LocatorOutput>;
}

/// An unvalidated segment as produced by the model.
///
/// Both `start`/`end` and `start_time`/`end_time` spellings are accepted and
/// values may be numbers or numeric strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSegment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<Value>,
    /// Set when normalization already padded this range; never read from model output.
    #[serde(skip)]
    pub padded: bool,
}

impl RawSegment {
    /// Start value, preferring `start_time`.
    pub fn start_value(&self) -> Option<&Value> {
        self.start_time.as_ref().or(self.start.as_ref())
    }

    /// End value, preferring `end_time`.
    pub fn end_value(&self) -> Option<&Value> {
        self.end_time.as_ref().or(self.end.as_ref())
    }

    /// First non-empty explanation field.
    pub fn rationale_text(&self) -> Option<String> {
        [&self.rationale, &self.description, &self.reason]
            .into_iter()
            .flatten()
            .find_map(|value| match value {
                Value::Null => None,
                Value::String(s) if s.trim().is_empty() => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
    }
}

impl From<&Segment> for RawSegment {
    fn from(segment: &Segment) -> Self {
        Self {
            start: Some(Value::from(segment.start)),
            end: Some(Value::from(segment.end)),
            rationale: segment.rationale.clone().map(Value::String),
            padded: segment.padded,
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct LocatorPayload {
    #[serde(default, alias = "segments")]
    segments_to_keep: Vec<RawSegment>,
    #[serde(default)]
    analysis: Option<Value>,
}

fn json_block() -> &'static Regex {
    static JSON_BLOCK: OnceLock<Regex> = OnceLock::new();
    JSON_BLOCK.get_or_init(|| Regex::new(r"(\{[\s\S]*\})").expect("valid JSON block pattern"))
}

/// Parse a model response into candidate segments.
///
/// Takes the largest `{...}` block; if it is not valid JSON, retries once with
/// single quotes replaced by double quotes.
pub fn parse_locator_response(text: &str) -> WorkerResult<LocatorOutput> {
    let block = json_block()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| WorkerError::ai_failed("Could not extract valid JSON from model response"))?;

    let payload: LocatorPayload = match serde_json::from_str(block) {
        Ok(payload) => payload,
        Err(first) => {
            warn!("Model response is not valid JSON ({}), retrying with quote repair", first);
            serde_json::from_str(&block.replace('\'', "\"")).map_err(|_| {
                let preview: String = block.chars().take(200).collect();
                WorkerError::ai_failed(format!(
                    "Could not parse JSON from model response: {}...",
                    preview
                ))
            })?
        }
    };

    let analysis = match payload.analysis {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    Ok(LocatorOutput {
        segments: payload.segments_to_keep,
        analysis,
    })
}

/// Editing instructions sent with the video.
pub fn build_prompt(video: &VideoInfo, script_text: &str) -> String {
    let script = if script_text.trim().is_empty() {
        "No specific script provided. Please identify the most interesting, informative, or engaging segments of this video."
    } else {
        script_text
    };

    format!(
        r#"You are an expert video editor. Edit the attached video according to the script below.

# VIDEO INFORMATION
Duration: {duration:.2} seconds
Resolution: {width}x{height}
FPS: {fps:.2}

# SCRIPT TO FOLLOW
{script}

# YOUR TASK
1. Analyze the video
2. Find the parts of the video that match the script
3. Return precise timestamps, in seconds, for the segments to keep

# RULES
- Timestamps must be exact start and end times in seconds
- Only include segments that clearly match the script
- Segments should start and end at natural boundaries
- If uncertain, extend a segment to give more context
- If the same content appears more than once (for example a line delivered twice), keep only the clearest take
- Never include several segments that repeat the same information, even when phrased differently
- Prefer one good segment over several repetitive ones

# RESPONSE FORMAT
Return ONLY a JSON object with this structure:
{{
  "segments_to_keep": [
    {{
      "start_time": <seconds>,
      "end_time": <seconds>,
      "description": "why this segment matches the script"
    }}
  ],
  "analysis": "how well the video matches the script"
}}"#,
        duration = video.duration,
        width = video.width,
        height = video.height,
        fps = video.fps,
        script = script,
    )
}
