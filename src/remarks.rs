//! Compiler loop-remark ingestion
//!
//! The autovec pass emits one JSON object per attempted loop transformation
//! (newline-delimited). The stream is best-effort telemetry: malformed lines
//! are skipped and a missing file yields an empty mapping, since some modes
//! (vectorization off) never emit remarks at all.

use crate::error::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Outcome tag of a single loop-transformation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemarkStatus {
    /// The loop was lowered to vector form
    Lowered,
    /// The pass rejected the loop
    Reject,
    /// Any other tag; kept for row accounting but never credited
    Other,
}

impl RemarkStatus {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "lowered" => Self::Lowered,
            "reject" => Self::Reject,
            _ => Self::Other,
        }
    }

    /// The wire tag for this status
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lowered => "lowered",
            Self::Reject => "reject",
            Self::Other => "other",
        }
    }
}

/// One emitted decision record for a single loop-transformation attempt
#[derive(Debug, Clone, PartialEq)]
pub struct LoopRemark {
    /// Enclosing function name (the kernel, possibly `_`-prefixed)
    pub function: String,
    pub status: RemarkStatus,
    pub reason: String,
    pub selected_mode: Option<String>,
    pub configured_mode: Option<String>,
    pub lane_count: i64,
    pub group_count: i64,
    pub force_scalar_lane: bool,
    pub has_recurrence: bool,
    pub header_kind: String,
    /// Tri-state: the pass may be unable to classify memory traffic
    pub touches_memory: Option<bool>,
    pub tripcount_source: String,
    pub address_model: String,
}

impl LoopRemark {
    /// Build a remark from one parsed JSON record. Returns `None` when the
    /// record is not an object or carries no function name.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let function = obj.get("function")?.as_str()?.trim().to_string();
        if function.is_empty() {
            return None;
        }

        Some(Self {
            function,
            status: RemarkStatus::from_tag(
                obj.get("status").and_then(Value::as_str).unwrap_or(""),
            ),
            reason: coerce_str(obj.get("reason")),
            selected_mode: obj
                .get("selected_mode")
                .and_then(Value::as_str)
                .map(str::to_string),
            configured_mode: obj
                .get("configured_mode")
                .and_then(Value::as_str)
                .map(str::to_string),
            lane_count: coerce_int(obj.get("lane_count"), 0),
            group_count: coerce_int(obj.get("group_count"), 0),
            force_scalar_lane: coerce_bool(obj.get("force_scalar_lane")).unwrap_or(false),
            has_recurrence: coerce_bool(obj.get("has_recurrence")).unwrap_or(false),
            header_kind: coerce_str(obj.get("header_kind")),
            touches_memory: coerce_bool(obj.get("touches_memory")),
            tripcount_source: coerce_str(obj.get("tripcount_source")),
            address_model: coerce_str(obj.get("address_model")),
        })
    }
}

/// Tolerant boolean coercion: accepts JSON booleans and the usual string
/// spellings. Anything else is "unknown".
#[must_use]
pub fn coerce_bool(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Tolerant integer coercion: JSON numbers, booleans, or strings with an
/// optional radix prefix (`0x`, `0o`, `0b`).
#[must_use]
pub fn coerce_int(value: Option<&Value>, default: i64) -> i64 {
    match value {
        Some(Value::Bool(b)) => i64::from(*b),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(default),
        Some(Value::String(s)) => parse_radix_int(s.trim()).unwrap_or(default),
        _ => default,
    }
}

fn parse_radix_int(text: &str) -> Option<i64> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(oct) = body.strip_prefix("0o").or_else(|| body.strip_prefix("0O")) {
        i64::from_str_radix(oct, 8).ok()?
    } else if let Some(bin) = body.strip_prefix("0b").or_else(|| body.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).ok()?
    } else {
        body.parse().ok()?
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn coerce_str(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Parse a newline-delimited remark stream. Malformed lines are skipped.
#[must_use]
pub fn parse_remarks_text(text: &str) -> Vec<LoopRemark> {
    text.lines()
        .filter_map(|raw| {
            let line = raw.trim();
            if line.is_empty() {
                return None;
            }
            let value: Value = serde_json::from_str(line).ok()?;
            LoopRemark::from_value(&value)
        })
        .collect()
}

/// Group remarks by enclosing function name, preserving stream order
/// within each function.
#[must_use]
pub fn group_by_function(rows: Vec<LoopRemark>) -> HashMap<String, Vec<LoopRemark>> {
    let mut by_function: HashMap<String, Vec<LoopRemark>> = HashMap::new();
    for row in rows {
        by_function.entry(row.function.clone()).or_default().push(row);
    }
    by_function
}

/// Load and group a remark file. `None` or a missing path yields an empty
/// mapping; a present but unreadable file is an I/O error.
pub fn load_remarks(path: Option<&Path>) -> Result<HashMap<String, Vec<LoopRemark>>> {
    let Some(path) = path else {
        return Ok(HashMap::new());
    };
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let text = fs::read_to_string(path)?;
    Ok(group_by_function(parse_remarks_text(&text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_remark() {
        let text = r#"{"function": "s2111", "status": "lowered", "reason": "lowered_vblock_memseq", "touches_memory": true, "lane_count": 8}"#;
        let rows = parse_remarks_text(text);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].function, "s2111");
        assert_eq!(rows[0].status, RemarkStatus::Lowered);
        assert_eq!(rows[0].reason, "lowered_vblock_memseq");
        assert_eq!(rows[0].touches_memory, Some(true));
        assert_eq!(rows[0].lane_count, 8);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let text = "not json\n{\"function\": \"s000\", \"status\": \"reject\", \"reason\": \"no_store_in_loop\"}\n{broken\n";
        let rows = parse_remarks_text(text);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].function, "s000");
    }

    #[test]
    fn test_non_object_lines_skipped() {
        let rows = parse_remarks_text("[1, 2, 3]\n42\n\"string\"\n");
        assert!(rows.is_empty());
    }

    #[test]
    fn test_missing_function_skipped() {
        let rows = parse_remarks_text(r#"{"status": "reject", "reason": "x"}"#);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_unknown_status_kept_as_other() {
        let rows = parse_remarks_text(r#"{"function": "s1", "status": "deferred", "reason": "x"}"#);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, RemarkStatus::Other);
    }

    #[test]
    fn test_coerce_bool_strings() {
        assert_eq!(coerce_bool(Some(&Value::String("true".into()))), Some(true));
        assert_eq!(coerce_bool(Some(&Value::String("YES".into()))), Some(true));
        assert_eq!(coerce_bool(Some(&Value::String("0".into()))), Some(false));
        assert_eq!(coerce_bool(Some(&Value::String("off".into()))), Some(false));
        assert_eq!(coerce_bool(Some(&Value::String("maybe".into()))), None);
        assert_eq!(coerce_bool(None), None);
    }

    #[test]
    fn test_coerce_int_radix() {
        assert_eq!(coerce_int(Some(&Value::String("0x10".into())), 0), 16);
        assert_eq!(coerce_int(Some(&Value::String("12".into())), 0), 12);
        assert_eq!(coerce_int(Some(&Value::String("-0b101".into())), 0), -5);
        assert_eq!(coerce_int(Some(&Value::String("junk".into())), 7), 7);
        assert_eq!(coerce_int(Some(&Value::Bool(true)), 0), 1);
        assert_eq!(coerce_int(None, 3), 3);
    }

    #[test]
    fn test_group_by_function_preserves_order() {
        let text = concat!(
            r#"{"function": "s1", "status": "reject", "reason": "a"}"#,
            "\n",
            r#"{"function": "s2", "status": "reject", "reason": "b"}"#,
            "\n",
            r#"{"function": "s1", "status": "reject", "reason": "c"}"#,
        );
        let grouped = group_by_function(parse_remarks_text(text));

        assert_eq!(grouped["s1"].len(), 2);
        assert_eq!(grouped["s1"][0].reason, "a");
        assert_eq!(grouped["s1"][1].reason, "c");
        assert_eq!(grouped["s2"].len(), 1);
    }

    #[test]
    fn test_load_remarks_missing_file_is_empty() {
        let map = load_remarks(Some(Path::new("/nonexistent/remarks.jsonl"))).unwrap();
        assert!(map.is_empty());
        assert!(load_remarks(None).unwrap().is_empty());
    }
}
