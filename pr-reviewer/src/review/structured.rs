//! Structured-output driver: parse schema-constrained LLM text with a
//! bounded repair loop.
//!
//! Strategy, in order:
//! 1. strip markdown fences and extract the outermost balanced JSON object
//!    (preferred) or array;
//! 2. normalize common malformations: literal newlines/tabs inside string
//!    literals are re-escaped character by character, numeric-keyed objects
//!    become arrays, and `suggestedFixDiff` values are nullified as a last
//!    resort;
//! 3. ask the LLM to repair the text against the JSON schema, at most
//!    `parse_retries` times, each retry carrying the previous error and the
//!    broken text truncated to a fixed budget;
//! 4. give up with a typed [`ParseFailure`].

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::ParseFailure;
use crate::review::gateway::LlmGateway;
use crate::review::prompt;

/// Truncation budget for broken text echoed into repair prompts.
const REPAIR_TEXT_BUDGET: usize = 3_000;

lazy_static! {
    static ref DIFF_FIELD: Regex =
        Regex::new(r#""suggestedFixDiff"\s*:\s*"([^"\\]|\\.)*""#).unwrap();
}

/// Parse `raw` into `T`, repairing via the LLM when local fixes fail.
pub async fn parse_structured<T, L>(
    llm: &L,
    raw: &str,
    schema_name: &'static str,
    schema_json: &str,
    retries: usize,
) -> Result<T, ParseFailure>
where
    T: DeserializeOwned,
    L: LlmGateway,
{
    let mut last_error = match parse_locally::<T>(raw) {
        Ok(v) => return Ok(v),
        Err(e) => {
            warn!(schema = schema_name, error = %e, "initial parse failed");
            e
        }
    };

    let mut broken = raw.to_string();
    for attempt in 1..=retries {
        debug!(schema = schema_name, attempt, "repairing JSON via LLM");
        let repair_prompt = prompt::build_repair_prompt(
            &truncate(&broken, REPAIR_TEXT_BUDGET),
            &last_error,
            schema_json,
        );
        let repaired = match llm.complete(&repair_prompt).await {
            Ok(text) => text,
            Err(e) => {
                last_error = e.to_string();
                continue;
            }
        };

        match parse_locally::<T>(&repaired) {
            Ok(v) => {
                debug!(schema = schema_name, attempt, "repair succeeded");
                return Ok(v);
            }
            Err(e) => {
                last_error = e;
                warn!(schema = schema_name, attempt, error = %last_error, "repair attempt failed");
                broken = repaired;
            }
        }
    }

    Err(ParseFailure {
        schema: schema_name,
        last_error,
    })
}

/// All local (non-LLM) parsing strategies.
fn parse_locally<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let fixed = fix_unescaped_control_chars(raw.trim());
    let cleaned = clean_json_text(&fixed);

    match parse_value::<T>(&cleaned) {
        Ok(v) => return Ok(v),
        Err(first_err) => {
            // Nullify diff fields that commonly break the string grammar.
            let without_diffs = remove_problematic_diffs(&cleaned);
            if without_diffs != cleaned {
                if let Ok(v) = parse_value::<T>(&without_diffs) {
                    return Ok(v);
                }
            }
            // Balanced-object scan over the raw text as a final local step.
            if let Some(candidate) = find_balanced_json(&fixed) {
                if candidate != cleaned {
                    if let Ok(v) = parse_value::<T>(&candidate) {
                        return Ok(v);
                    }
                }
            }
            Err(first_err)
        }
    }
}

fn parse_value<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let mut value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    normalize_numeric_keyed_arrays(&mut value);
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// Strip markdown fences and cut to the outermost object or array.
pub fn clean_json_text(text: &str) -> String {
    let mut text = text.trim().to_string();

    if let Some(start) = text.find("```json") {
        let after = &text[start + 7..];
        text = match after.find("```") {
            Some(end) => after[..end].trim().to_string(),
            None => after.trim().to_string(),
        };
    } else if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        text = match after.find("```") {
            Some(end) => after[..end].trim().to_string(),
            None => after.trim().to_string(),
        };
    }

    let obj_start = text.find('{');
    let obj_end = text.rfind('}');
    let arr_start = text.find('[');
    let arr_end = text.rfind(']');

    match (obj_start, obj_end) {
        (Some(s), Some(e)) if e > s => {
            // Prefer the object unless an array clearly encloses everything.
            if let (Some(als), Some(ale)) = (arr_start, arr_end) {
                if als < s && ale > e {
                    return text[als..=ale].to_string();
                }
            }
            text[s..=e].to_string()
        }
        _ => match (arr_start, arr_end) {
            (Some(s), Some(e)) if e > s => text[s..=e].to_string(),
            _ => text,
        },
    }
}

/// Re-escape literal newlines/carriage returns/tabs inside JSON strings,
/// tracking string and escape state character by character.
pub fn fix_unescaped_control_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' && in_string {
            out.push(c);
            if let Some(next) = chars.next() {
                out.push(next);
            }
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            out.push(c);
            continue;
        }
        if in_string {
            match c {
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                other => out.push(other),
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Convert `{"0": a, "1": b}` objects into `[a, b]` arrays, recursively.
pub fn normalize_numeric_keyed_arrays(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for v in map.values_mut() {
                normalize_numeric_keyed_arrays(v);
            }
            let numeric = !map.is_empty()
                && map.keys().all(|k| k.trim_start_matches('-').chars().all(|c| c.is_ascii_digit()) && !k.is_empty());
            if numeric {
                let mut entries: Vec<(i64, Value)> = map
                    .iter()
                    .filter_map(|(k, v)| k.parse::<i64>().ok().map(|n| (n, v.clone())))
                    .collect();
                if entries.len() == map.len() {
                    entries.sort_by_key(|(n, _)| *n);
                    *value = Value::Array(entries.into_iter().map(|(_, v)| v).collect());
                }
            }
        }
        Value::Array(items) => {
            for v in items {
                normalize_numeric_keyed_arrays(v);
            }
        }
        _ => {}
    }
}

/// Nullify `suggestedFixDiff` string values. Intentionally aggressive: a
/// lost diff beats a failed parse.
pub fn remove_problematic_diffs(text: &str) -> String {
    if !text.contains("\"suggestedFixDiff\"") {
        return text.to_string();
    }
    DIFF_FIELD
        .replace_all(text, "\"suggestedFixDiff\": null")
        .into_owned()
}

/// Extract the first balanced top-level JSON object, respecting strings and
/// escapes.
pub fn find_balanced_json(text: &str) -> Option<String> {
    let bytes: Vec<char> = text.chars().collect();
    let start = bytes.iter().position(|c| *c == '{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in bytes.iter().enumerate().skip(start) {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(bytes[start..=i].iter().collect());
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        return s.to_string();
    }
    s.chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        comment: String,
        #[serde(default)]
        issues: Vec<Value>,
    }

    #[test]
    fn strips_fences() {
        let raw = "Here you go:\n```json\n{\"comment\": \"ok\", \"issues\": []}\n```";
        let s: Sample = parse_value(&clean_json_text(raw)).unwrap();
        assert_eq!(s.comment, "ok");
    }

    #[test]
    fn fixes_literal_newlines_in_strings() {
        let raw = "{\"comment\": \"line one\nline two\", \"issues\": []}";
        let fixed = fix_unescaped_control_chars(raw);
        let s: Sample = parse_value(&fixed).unwrap();
        assert_eq!(s.comment, "line one\nline two");
    }

    #[test]
    fn numeric_keyed_object_becomes_array() {
        let raw = r#"{"comment": "ok", "issues": {"0": {"a": 1}, "1": {"a": 2}}}"#;
        let s: Sample = parse_value(raw).unwrap();
        assert_eq!(s.issues.len(), 2);
    }

    #[test]
    fn balanced_extraction_skips_prose() {
        let raw = "The model says {\"comment\": \"found {nested}\", \"issues\": []} and then rambles }}}";
        let json = find_balanced_json(raw).unwrap();
        let s: Sample = parse_value(&json).unwrap();
        assert_eq!(s.comment, "found {nested}");
    }

    #[test]
    fn diff_nullification_rescues_parse() {
        let raw = r#"{"comment": "ok", "issues": [], "suggestedFixDiff": "--- a\n+++ b"}"#;
        let out = remove_problematic_diffs(raw);
        assert!(out.contains("\"suggestedFixDiff\": null"));
    }

    #[tokio::test]
    async fn repair_loop_bounded_and_typed_failure() {
        struct BrokenLlm;
        impl LlmGateway for BrokenLlm {
            async fn complete(&self, _p: &str) -> Result<String, crate::review::gateway::GatewayError> {
                Ok("still not json".to_string())
            }
            async fn chat(
                &self,
                _t: &[ai_llm_service::chat::ChatTurn],
                _tools: &[ai_llm_service::chat::ToolSpec],
            ) -> Result<ai_llm_service::chat::ChatOutcome, crate::review::gateway::GatewayError>
            {
                Ok(ai_llm_service::chat::ChatOutcome::Message("no".into()))
            }
        }

        let err = parse_structured::<Sample, _>(&BrokenLlm, "garbage", "Sample", "{}", 2)
            .await
            .unwrap_err();
        assert_eq!(err.schema, "Sample");
    }

    #[tokio::test]
    async fn repair_loop_recovers_with_llm_help() {
        struct FixingLlm;
        impl LlmGateway for FixingLlm {
            async fn complete(&self, _p: &str) -> Result<String, crate::review::gateway::GatewayError> {
                Ok("{\"comment\": \"repaired\", \"issues\": []}".to_string())
            }
            async fn chat(
                &self,
                _t: &[ai_llm_service::chat::ChatTurn],
                _tools: &[ai_llm_service::chat::ToolSpec],
            ) -> Result<ai_llm_service::chat::ChatOutcome, crate::review::gateway::GatewayError>
            {
                Ok(ai_llm_service::chat::ChatOutcome::Message("no".into()))
            }
        }

        let s: Sample = parse_structured(&FixingLlm, "not json at all", "Sample", "{}", 2)
            .await
            .unwrap();
        assert_eq!(s.comment, "repaired");
    }
}
