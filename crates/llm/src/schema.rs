//! Structured-output validation for extraction responses.
//!
//! The extraction prompt asks for a JSON array of candidate facts. Models
//! drift: they wrap arrays in prose, fence them in markdown, emit objects
//! with a `memories` key, or invent fields. This module is the single
//! place that turns raw completion text into validated candidates, or an
//! `InvalidLLMOutput` error the selector can re-prompt on.

use serde::Deserialize;
use serde_json::Value;

use mr_domain::error::{Error, Result};

/// One candidate fact as emitted by the extraction model, prior to
/// normalization. `type_label` is kept raw — unknown labels are dropped
/// by the pipeline, not coerced here.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedCandidate {
    pub content: String,
    #[serde(rename = "type")]
    pub type_label: String,
    pub importance: i64,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub source_quote: Option<String>,
}

/// Parse and validate a raw extraction completion.
///
/// Accepts either a bare JSON array or an object with a `memories` array,
/// optionally wrapped in a markdown code fence. Anything else fails with
/// `InvalidLLMOutput`.
pub fn parse_extraction(raw: &str) -> Result<Vec<ExtractedCandidate>> {
    let stripped = strip_code_fence(raw.trim());

    let value: Value = serde_json::from_str(stripped)
        .map_err(|e| Error::InvalidLlmOutput(format!("not valid JSON: {e}")))?;

    let array = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("memories") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(Error::InvalidLlmOutput(
                    "expected a JSON array or an object with a 'memories' array".into(),
                ))
            }
        },
        _ => {
            return Err(Error::InvalidLlmOutput(
                "expected a JSON array of candidate objects".into(),
            ))
        }
    };

    let mut candidates = Vec::with_capacity(array.len());
    for (i, item) in array.into_iter().enumerate() {
        let candidate: ExtractedCandidate = serde_json::from_value(item)
            .map_err(|e| Error::InvalidLlmOutput(format!("candidate[{i}]: {e}")))?;
        candidates.push(candidate);
    }
    Ok(candidates)
}

/// Strip a surrounding markdown code fence (```json ... ```), if present.
fn strip_code_fence(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("```") else {
        return raw;
    };
    // Skip the optional language tag on the opening fence line.
    let rest = match rest.split_once('\n') {
        Some((_lang, body)) => body,
        None => rest,
    };
    rest.strip_suffix("```").map(str::trim).unwrap_or(raw)
}
