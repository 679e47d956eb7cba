//! Wire form of an [`ExecutionContext`].
//!
//! The context travels with every request and reply. It is written as a JSON
//! (or YAML) document:
//!
//! ```json
//! {
//!   "options": {"width": "100"},
//!   "sourceReference": "abc-123",
//!   "levels": [
//!     {"kind": "P", "stepCount": 1, "cursor": 0, "reference": 123,
//!      "startTime": "2026-01-01T00:00:00Z", "retries": 0,
//!      "steps": [["pdf-to-png", "application/pdf", "image/png"]]}
//!   ]
//! }
//! ```
//!
//! Decoding checks the structure and rejects anything malformed with
//! [`StackError::Structure`]. Nothing is repaired.

use crate::model::TransformOptions;
use crate::stack::{ExecutionContext, Level, LevelKind, StackError, Step};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct WireContext {
    #[serde(default)]
    options: TransformOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_reference: Option<String>,
    levels: Vec<WireLevel>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct WireLevel {
    kind: String,
    step_count: usize,
    cursor: usize,
    reference: u64,
    start_time: DateTime<Utc>,
    retries: u32,
    steps: Vec<(String, String, String)>,
}

impl From<&ExecutionContext> for WireContext {
    fn from(ctx: &ExecutionContext) -> Self {
        Self {
            options: ctx.options().clone(),
            source_reference: ctx.source_reference().map(str::to_string),
            levels: ctx
                .levels()
                .iter()
                .map(|level| WireLevel {
                    kind: level.kind().tag().to_string(),
                    step_count: level.steps().len(),
                    cursor: level.cursor(),
                    reference: level.reference(),
                    start_time: level.started_at(),
                    retries: level.retries(),
                    steps: level
                        .steps()
                        .iter()
                        .map(|s| {
                            (
                                s.transformer_name.clone(),
                                s.source_media_type.clone(),
                                s.target_media_type.clone(),
                            )
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

impl TryFrom<WireContext> for ExecutionContext {
    type Error = StackError;

    fn try_from(wire: WireContext) -> Result<Self, StackError> {
        if wire.options.keys().any(|k| k.trim().is_empty()) {
            return Err(StackError::Structure(
                "the TransformOptions set correctly: blank option name".into(),
            ));
        }
        if wire.levels.is_empty() {
            return Err(StackError::Structure(
                "the Stack set: no open levels".into(),
            ));
        }

        let mut levels = Vec::with_capacity(wire.levels.len());
        for (i, level) in wire.levels.into_iter().enumerate() {
            let kind = LevelKind::from_tag(&level.kind).ok_or_else(|| {
                StackError::Structure(format!(
                    "levels set correctly: level {} has kind {:?}",
                    i, level.kind
                ))
            })?;
            if level.step_count != level.steps.len() {
                return Err(StackError::Structure(format!(
                    "levels set correctly: level {} claims {} steps but has {}",
                    i,
                    level.step_count,
                    level.steps.len()
                )));
            }
            let steps = level
                .steps
                .into_iter()
                .map(|(name, source, target)| Step::new(name, source, target))
                .collect();
            levels.push(Level::from_parts(
                kind,
                steps,
                level.cursor,
                level.reference,
                level.start_time,
                level.retries,
            )?);
        }
        Ok(ExecutionContext::from_parts(
            wire.options,
            wire.source_reference,
            levels,
        ))
    }
}

impl ExecutionContext {
    /// Encode as compact JSON.
    pub fn encode(&self) -> Result<String, StackError> {
        serde_json::to_string(&WireContext::from(self)).map_err(|e| StackError::Encode(e.to_string()))
    }

    /// Decode from JSON, rejecting anything structurally invalid.
    pub fn decode(data: &str) -> Result<Self, StackError> {
        Self::from_bytes_format(data.as_bytes(), "json")
    }

    /// Encode in the given format (`json` or `yaml`).
    pub fn to_bytes(&self, format: &str) -> Result<Vec<u8>, StackError> {
        let wire = WireContext::from(self);
        match format {
            "json" => serde_json::to_vec_pretty(&wire).map_err(|e| StackError::Encode(e.to_string())),
            "yaml" | "yml" => serde_yaml::to_string(&wire)
                .map(String::into_bytes)
                .map_err(|e| StackError::Encode(e.to_string())),
            _ => Err(StackError::Encode(format!("unsupported format: {}", format))),
        }
    }

    /// Decode from the given format (`json` or `yaml`).
    pub fn from_bytes_format(data: &[u8], format: &str) -> Result<Self, StackError> {
        let parsed: Result<WireContext, String> = match format {
            "json" => serde_json::from_slice(data).map_err(|e| e.to_string()),
            "yaml" | "yml" => serde_yaml::from_slice(data).map_err(|e| e.to_string()),
            _ => return Err(StackError::Encode(format!("unsupported format: {}", format))),
        };
        let result = parsed
            .map_err(|e| StackError::Structure(format!("a valid encoding: {}", e)))
            .and_then(ExecutionContext::try_from);
        if let Err(err) = &result {
            tracing::error!(
                payload = %String::from_utf8_lossy(data),
                "rejected execution context: {}",
                err
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{LevelBuilder, Progress};

    fn sample() -> ExecutionContext {
        let mut options = TransformOptions::new();
        options.insert("width".into(), "100".into());
        let mut ctx = ExecutionContext::new(options, Some("abc-123".into()));
        ctx.add_level(LevelBuilder::pipeline().step("doc-to-png", "doc", "png"))
            .unwrap();
        ctx.set_reference(123).unwrap();
        ctx.add_level(
            LevelBuilder::pipeline()
                .step("office", "doc", "pdf")
                .step("renderer", "pdf", "png"),
        )
        .unwrap();
        ctx.remove_successful_step().unwrap();
        ctx.increment_attempted_retries().unwrap();
        ctx
    }

    fn valid_json() -> String {
        r#"{
            "options": {"width": "100"},
            "sourceReference": "abc-123",
            "levels": [
                {"kind": "P", "stepCount": 1, "cursor": 0, "reference": 123,
                 "startTime": "2026-01-01T00:00:00Z", "retries": 0,
                 "steps": [["doc-to-png", "doc", "png"]]},
                {"kind": "F", "stepCount": 2, "cursor": 1, "reference": 2,
                 "startTime": "2026-01-01T00:00:01Z", "retries": 1,
                 "steps": [["a", "doc", "png"], ["b", "doc", "png"]]}
            ]
        }"#
        .to_string()
    }

    fn structure_error(json: &str) -> String {
        match ExecutionContext::decode(json) {
            Err(StackError::Structure(message)) => message,
            other => panic!("expected structural error, got {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_json() {
        let ctx = sample();
        let decoded = ExecutionContext::decode(&ctx.encode().unwrap()).unwrap();
        assert_eq!(decoded, ctx);
        assert_eq!(decoded.reference(), "123.2");
        assert_eq!(decoded.attempted_retries(), 1);
        assert_eq!(decoded.current_step().unwrap().transformer_name, "renderer");
    }

    #[test]
    fn test_round_trip_yaml() {
        let ctx = sample();
        let bytes = ctx.to_bytes("yaml").unwrap();
        assert_eq!(ExecutionContext::from_bytes_format(&bytes, "yaml").unwrap(), ctx);
    }

    #[test]
    fn test_transitions_continue_after_decode() {
        let ctx = sample();
        let mut decoded = ExecutionContext::decode(&ctx.encode().unwrap()).unwrap();
        assert_eq!(decoded.remove_successful_step(), Ok(Progress::Completed));
        assert_eq!(decoded.options().get("width").map(String::as_str), Some("100"));
        assert_eq!(decoded.source_reference(), Some("abc-123"));
    }

    #[test]
    fn test_decode_valid() {
        let ctx = ExecutionContext::decode(&valid_json()).unwrap();
        assert_eq!(ctx.depth(), 2);
        assert!(ctx.is_parent_a_failover());
        assert_eq!(ctx.parent_name(), Some("doc-to-png"));
        assert_eq!(ctx.reference(), "123.2");
    }

    #[test]
    fn test_bad_kind_tag() {
        let json = valid_json().replace(r#""kind": "F""#, r#""kind": "X""#);
        assert!(structure_error(&json).contains("kind"));
    }

    #[test]
    fn test_non_numeric_counter() {
        let json = valid_json().replace(r#""reference": 2"#, r#""reference": "two""#);
        structure_error(&json);
        let json = valid_json().replace(r#""retries": 1"#, r#""retries": -1"#);
        structure_error(&json);
    }

    #[test]
    fn test_truncated_step() {
        let json = valid_json().replace(r#"["b", "doc", "png"]"#, r#"["b", "doc"]"#);
        structure_error(&json);
    }

    #[test]
    fn test_blank_step_field() {
        let json = valid_json().replace(r#"["b", "doc", "png"]"#, r#"["b", " ", "png"]"#);
        assert!(structure_error(&json).contains("blank"));
    }

    #[test]
    fn test_cursor_out_of_range() {
        let json = valid_json().replace(r#""cursor": 1"#, r#""cursor": 2"#);
        assert!(structure_error(&json).contains("cursor"));
    }

    #[test]
    fn test_step_count_mismatch() {
        let json = valid_json().replace(r#""stepCount": 2"#, r#""stepCount": 3"#);
        assert!(structure_error(&json).contains("claims 3 steps"));
    }

    #[test]
    fn test_no_levels() {
        structure_error(r#"{"options": {}, "levels": []}"#);
        structure_error(r#"{"options": {}}"#);
    }

    #[test]
    fn test_blank_option_name() {
        let json = valid_json().replace(r#""width": "100""#, r#""": "100""#);
        assert!(structure_error(&json).contains("TransformOptions"));
    }

    #[test]
    fn test_not_a_document() {
        structure_error("P,1,0,1");
    }

    #[test]
    fn test_unknown_format() {
        assert!(matches!(
            sample().to_bytes("csv"),
            Err(StackError::Encode(_))
        ));
    }
}
