//! Tool-call extraction from raw LLM output text (§4.7).
//!
//! Models emit tool calls in five distinct surface forms depending on
//! provider and prompt phrasing. All five are tried against every response;
//! the first form that matches wins for a given call bracket so a response
//! is never double-parsed.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::types::ToolCall;

static BRACKET_WITH_ARGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[(\w+)\((.*?)\)\]").unwrap());
static BRACKET_NO_ARGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\w+)\]").unwrap());
static JSON_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)\{\s*"type"\s*:\s*"function".*?\}\s*\}"#).unwrap());
static XML_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<function=(\w+)>(.*?)</function>").unwrap());
static PYTHON_TAG_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\|python_tag\|>\s*(\w+)\.call\((.*?)\)").unwrap());
static NAKED_END_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)\bend_call\(\s*\{(.*?)\}\s*\)"#).unwrap());

/// Split `key=value` argument lists the way a shell would, honoring quotes,
/// then coerce each value to bool/int/float/null/string.
fn parse_arguments(raw: &str) -> HashMap<String, Value> {
    let mut out = HashMap::new();
    let raw = raw.trim().trim_end_matches(',');
    if raw.is_empty() {
        return out;
    }
    let tokens = match shell_words::split(raw) {
        Ok(t) => t,
        Err(_) => raw.split(',').map(|s| s.trim().to_string()).collect(),
    };
    for token in tokens {
        let token = token.trim_end_matches(',');
        if let Some((key, value)) = token.split_once('=') {
            out.insert(key.trim().to_string(), convert_type(value.trim()));
        }
    }
    out
}

fn convert_type(value: &str) -> Value {
    let unquoted = value.trim_matches(|c| c == '"' || c == '\'');
    match unquoted {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" | "none" | "None" => Value::Null,
        _ => {
            if let Ok(i) = unquoted.parse::<i64>() {
                Value::Number(i.into())
            } else if let Ok(f) = unquoted.parse::<f64>() {
                serde_json::Number::from_f64(f).map(Value::Number).unwrap_or_else(|| Value::String(unquoted.to_string()))
            } else {
                Value::String(unquoted.to_string())
            }
        }
    }
}

/// Extract every tool call found in `text`, trying each surface form in
/// order and deduplicating by name (first occurrence of a given tool name
/// wins; a model asking for the same tool twice in one turn is a prompting
/// bug, not a dispatch request).
pub fn extract_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut seen = HashSet::new();

    for capture in BRACKET_WITH_ARGS.captures_iter(text) {
        let name = capture[1].to_string();
        if seen.insert(name.clone()) {
            calls.push(ToolCall { name, arguments: parse_arguments(&capture[2]) });
        }
    }

    for capture in BRACKET_NO_ARGS.captures_iter(text) {
        let name = capture[1].to_string();
        if seen.insert(name.clone()) {
            calls.push(ToolCall { name, arguments: HashMap::new() });
        }
    }

    for capture in JSON_CALL.find_iter(text) {
        if let Ok(value) = serde_json::from_str::<Value>(capture.as_str()) {
            if let Some(name) = value.pointer("/function/name").and_then(Value::as_str) {
                if seen.insert(name.to_string()) {
                    let arguments = value
                        .pointer("/function/arguments")
                        .and_then(|v| if v.is_string() { serde_json::from_str(v.as_str().unwrap()).ok() } else { v.as_object().cloned() })
                        .map(|obj| obj.into_iter().collect())
                        .unwrap_or_default();
                    calls.push(ToolCall { name: name.to_string(), arguments });
                }
            }
        }
    }

    for capture in XML_CALL.captures_iter(text) {
        let name = capture[1].to_string();
        if seen.insert(name.clone()) {
            let arguments = parse_xml_parameters(&capture[2]);
            calls.push(ToolCall { name, arguments });
        }
    }

    for capture in PYTHON_TAG_CALL.captures_iter(text) {
        let name = capture[1].to_string();
        if seen.insert(name.clone()) {
            calls.push(ToolCall { name, arguments: parse_arguments(&capture[2]) });
        }
    }

    // Naked end_call(...) with a JSON-ish body that slipped past the other
    // surface forms (models do this when asked to "just call end_call").
    if !seen.contains("end_call") {
        if let Some(capture) = NAKED_END_CALL.captures(text) {
            let body = format!("{{{}}}", &capture[1]);
            if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&body) {
                seen.insert("end_call".to_string());
                calls.push(ToolCall { name: "end_call".to_string(), arguments: obj.into_iter().collect() });
            }
        }
    }

    calls
}

fn parse_xml_parameters(body: &str) -> HashMap<String, Value> {
    static PARAMETER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<parameter=(\w+)>(.*?)</parameter>").unwrap());
    let mut out = HashMap::new();
    for capture in PARAMETER.captures_iter(body) {
        out.insert(capture[1].to_string(), convert_type(capture[2].trim()));
    }
    out
}

/// Strip every recognized tool-call surface form out of `text`, leaving
/// whatever prose the model addressed to the caller directly.
pub fn strip_tool_calls(text: &str) -> String {
    let mut cleaned = BRACKET_WITH_ARGS.replace_all(text, "").to_string();
    cleaned = BRACKET_NO_ARGS.replace_all(&cleaned, "").to_string();
    cleaned = JSON_CALL.replace_all(&cleaned, "").to_string();
    cleaned = XML_CALL.replace_all(&cleaned, "").to_string();
    cleaned = PYTHON_TAG_CALL.replace_all(&cleaned, "").to_string();
    cleaned = NAKED_END_CALL.replace_all(&cleaned, "").to_string();
    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bracket_call_with_keyword_arguments() {
        let calls = extract_tool_calls(r#"Un momento. [set_mode(mode=create_appt)]"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "set_mode");
        assert_eq!(calls[0].arguments["mode"], Value::String("create_appt".to_string()));
    }

    #[test]
    fn parses_bracket_call_with_no_arguments() {
        let calls = extract_tool_calls("Claro. [end_call]");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "end_call");
        assert!(calls[0].arguments.is_empty());
    }

    #[test]
    fn parses_json_style_function_call() {
        let raw = r#"{"type":"function","function":{"name":"registrar_lead","arguments":"{\"phone\":\"5551234\"}"}}"#;
        let calls = extract_tool_calls(raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "registrar_lead");
        assert_eq!(calls[0].arguments["phone"], Value::String("5551234".to_string()));
    }

    #[test]
    fn parses_xml_style_function_call() {
        let raw = "<function=end_call><parameter=reason>user_request</parameter></function>";
        let calls = extract_tool_calls(raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "end_call");
        assert_eq!(calls[0].arguments["reason"], Value::String("user_request".to_string()));
    }

    #[test]
    fn parses_python_tag_style_call() {
        let raw = "<|python_tag|> end_call.call(reason=\"done\")";
        let calls = extract_tool_calls(raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "end_call");
    }

    #[test]
    fn parses_naked_end_call_with_json_body() {
        let raw = r#"Gracias por llamar. end_call({"reason": "user_request"})"#;
        let calls = extract_tool_calls(raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "end_call");
    }

    #[test]
    fn duplicate_tool_name_keeps_first_occurrence_only() {
        let calls = extract_tool_calls("[set_mode(mode=a)] [set_mode(mode=b)]");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["mode"], Value::String("a".to_string()));
    }

    #[test]
    fn convert_type_coerces_bool_int_float_and_null() {
        assert_eq!(convert_type("true"), Value::Bool(true));
        assert_eq!(convert_type("42"), Value::Number(42.into()));
        assert_eq!(convert_type("null"), Value::Null);
        assert!(matches!(convert_type("3.5"), Value::Number(_)));
    }

    #[test]
    fn strip_tool_calls_removes_bracket_call_leaving_prose() {
        let cleaned = strip_tool_calls("Un momento por favor. [end_call]");
        assert_eq!(cleaned, "Un momento por favor.");
    }
}
