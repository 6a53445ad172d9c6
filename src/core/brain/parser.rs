//! Turns a model's free-text answer into a structured action.
//!
//! The expected shape is
//!
//! ```text
//! ACTION: <tool name>
//! PARAMETERS: {"json": "object"}
//! REASON: <free text>
//! ```
//!
//! Models regularly glue the tool name onto the `PARAMETERS:` label
//! (`SleepToolPARAMETERS: {...}`), so that shape is recovered as well. Parsing
//! is pure: no clock reads, no I/O.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static ACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ACTION:[ \t]*([A-Za-z_][A-Za-z0-9_]*)").unwrap());

static GLUED_PARAMETERS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)PARAMETERS:").unwrap());

static REASON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)REASON:(.*?)(?:ACTION:|PARAMETERS:|\z)").unwrap());

const PARAMETERS_LABEL: &str = "PARAMETERS:";

/// An actionable instruction extracted from model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAction {
    pub tool: String,
    pub parameters: Map<String, Value>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Action(ParsedAction),
    /// The model did not name a tool. Not an error; the cycle simply ends.
    NoAction { reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailure {
    #[error("invalid PARAMETERS for {tool}: {message}")]
    InvalidParameters { tool: String, message: String },
    #[error("{tool} is missing required parameters: {}", fields.join(", "))]
    MissingFields { tool: String, fields: Vec<String> },
    #[error("could not normalize parameters for {tool}: {message}")]
    Normalization { tool: String, message: String },
}

/// Replace typographic characters models like to emit with their ASCII forms.
pub fn normalize_text(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2013}' => '-',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn parse(raw: &str) -> Result<ParseOutcome, ParseFailure> {
    let text = normalize_text(raw);
    let reason = extract_reason(&text);

    let Some(tool) = extract_tool_name(&text) else {
        return Ok(ParseOutcome::NoAction { reason });
    };

    let parameters = match text.find(PARAMETERS_LABEL) {
        Some(idx) => decode_parameters(&tool, &text[idx + PARAMETERS_LABEL.len()..])?,
        None => Map::new(),
    };

    Ok(ParseOutcome::Action(ParsedAction {
        tool,
        parameters,
        reason,
    }))
}

fn extract_tool_name(text: &str) -> Option<String> {
    if let Some(caps) = ACTION_RE.captures(text) {
        let whole = caps.get(1)?;
        let name = whole.as_str();
        // `ACTION: FooPARAMETERS: {...}` captures `FooPARAMETERS`.
        if let Some(stripped) = name.strip_suffix("PARAMETERS")
            && text[whole.end()..].starts_with(':')
        {
            return (!stripped.is_empty()).then(|| stripped.to_string());
        }
        return Some(name.to_string());
    }

    GLUED_PARAMETERS_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn extract_reason(text: &str) -> Option<String> {
    REASON_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|r| !r.is_empty())
}

fn decode_parameters(tool: &str, after_label: &str) -> Result<Map<String, Value>, ParseFailure> {
    let invalid = |message: String| ParseFailure::InvalidParameters {
        tool: tool.to_string(),
        message,
    };

    let block = extract_json_object(after_label)
        .ok_or_else(|| invalid("no JSON object found".to_string()))?;

    match serde_json::from_str::<Value>(block) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(invalid(format!("expected an object, got {}", other))),
        Err(e) => Err(invalid(e.to_string())),
    }
}

/// Slice out the first balanced `{...}` block, tolerating newlines and
/// braces inside string literals.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn action(raw: &str) -> ParsedAction {
        match parse(raw) {
            Ok(ParseOutcome::Action(a)) => a,
            other => panic!("expected an action, got {:?}", other),
        }
    }

    #[test]
    fn parses_canonical_three_field_response() {
        let a = action(
            "ACTION: SleepTool\nPARAMETERS: {\"milliseconds\": 3600000}\nREASON: wait",
        );
        assert_eq!(a.tool, "SleepTool");
        assert_eq!(a.parameters.get("milliseconds"), Some(&json!(3600000)));
        assert_eq!(a.reason.as_deref(), Some("wait"));
    }

    #[test]
    fn parameters_may_span_multiple_lines() {
        let a = action(
            "Thinking it over.\nACTION: CreateCampaign\nPARAMETERS: {\n  \"title\": \"Launch\",\n  \"reward\": 5,\n  \"tags\": {\"a\": \"}\"}\n}\nREASON: growth",
        );
        assert_eq!(a.tool, "CreateCampaign");
        assert_eq!(a.parameters.get("title"), Some(&json!("Launch")));
        assert_eq!(a.parameters.get("tags"), Some(&json!({"a": "}"})));
        assert_eq!(a.reason.as_deref(), Some("growth"));
    }

    #[test]
    fn fields_may_appear_in_any_order() {
        let a = action("REASON: quiet day\nPARAMETERS: {\"milliseconds\": 10}\nACTION: SleepTool");
        assert_eq!(a.tool, "SleepTool");
        assert_eq!(a.reason.as_deref(), Some("quiet day"));
        assert_eq!(a.parameters.get("milliseconds"), Some(&json!(10)));
    }

    #[test]
    fn reason_stops_at_parameters_label() {
        let a = action("ACTION: PostUpdate\nREASON: say hi\nPARAMETERS: {\"text\": \"gm\"}");
        assert_eq!(a.reason.as_deref(), Some("say hi"));
        assert_eq!(a.parameters.get("text"), Some(&json!("gm")));
    }

    #[test]
    fn reason_stops_at_next_action_label() {
        let a = action("ACTION: A\nREASON: first\nACTION: B");
        assert_eq!(a.tool, "A");
        assert_eq!(a.reason.as_deref(), Some("first"));
    }

    #[test]
    fn smart_quotes_and_dashes_are_normalized() {
        let a = action(
            "  ACTION: PostTool\nPARAMETERS: {\u{201C}text\u{201D}: \u{201C}it\u{2019}s 9\u{2013}5\u{201D}}\n",
        );
        assert_eq!(a.parameters.get("text"), Some(&json!("it's 9-5")));
    }

    #[test]
    fn glued_tool_name_after_action_label() {
        let a = action("ACTION: SleepToolPARAMETERS: {\"milliseconds\": 5}");
        assert_eq!(a.tool, "SleepTool");
        assert_eq!(a.parameters.get("milliseconds"), Some(&json!(5)));
    }

    #[test]
    fn glued_tool_name_without_action_label() {
        let a = action("I will rest now. SleepToolPARAMETERS: {\"milliseconds\": 5}");
        assert_eq!(a.tool, "SleepTool");
    }

    #[test]
    fn glued_fallback_takes_longest_identifier() {
        let a = action("x my_long_tool_2PARAMETERS: {}");
        assert_eq!(a.tool, "my_long_tool_2");
    }

    #[test]
    fn missing_parameters_label_yields_empty_map() {
        let a = action("ACTION: SleepTool\nREASON: tired");
        assert!(a.parameters.is_empty());
    }

    #[test]
    fn fenced_json_is_accepted() {
        let a = action("ACTION: PostTool\nPARAMETERS: ```json\n{\"text\": \"hi\"}\n```");
        assert_eq!(a.parameters.get("text"), Some(&json!("hi")));
    }

    #[test]
    fn free_text_is_no_action() {
        assert_eq!(
            parse("Nothing worth doing right now."),
            Ok(ParseOutcome::NoAction { reason: None })
        );
    }

    #[test]
    fn no_action_keeps_reason() {
        assert_eq!(
            parse("REASON: markets closed"),
            Ok(ParseOutcome::NoAction {
                reason: Some("markets closed".to_string())
            })
        );
    }

    #[test]
    fn lone_parameters_label_is_no_action() {
        assert_eq!(
            parse("PARAMETERS: {\"a\": 1}"),
            Ok(ParseOutcome::NoAction { reason: None })
        );
    }

    #[test]
    fn undecodable_parameters_is_failure() {
        let err = parse("ACTION: Foo\nPARAMETERS: {not json}").unwrap_err();
        assert!(matches!(err, ParseFailure::InvalidParameters { ref tool, .. } if tool == "Foo"));
    }

    #[test]
    fn unbalanced_parameters_is_failure() {
        assert!(parse("ACTION: Foo\nPARAMETERS: {\"a\": 1").is_err());
    }

    #[test]
    fn non_object_parameters_is_failure() {
        assert!(parse("ACTION: Foo\nPARAMETERS: [1, 2]").is_err());
    }

    #[test]
    fn extract_json_object_handles_escaped_quotes() {
        let text = r#" {"a": "say \"}\" ok"} trailing"#;
        assert_eq!(extract_json_object(text), Some(r#"{"a": "say \"}\" ok"}"#));
    }

    proptest! {
        #[test]
        fn parsing_is_deterministic(
            tool in "[A-Za-z_][A-Za-z0-9_]{0,20}",
            key in "[a-z]{1,8}",
            value in "[a-zA-Z0-9 ]{0,30}",
            reason in "[a-zA-Z0-9 .,]{0,60}",
        ) {
            let raw = format!(
                "ACTION: {}\nPARAMETERS: {{\"{}\": \"{}\"}}\nREASON: {}",
                tool, key, value, reason
            );
            prop_assert_eq!(parse(&raw), parse(&raw));
        }

        #[test]
        fn text_without_labels_is_never_a_failure(text in "[a-zA-Z0-9 .,!?\n{}\":]{0,200}") {
            prop_assume!(!text.contains("ACTION:") && !text.contains("PARAMETERS:"));
            let outcome = parse(&text);
            prop_assert!(matches!(outcome, Ok(ParseOutcome::NoAction { .. })), "got {:?}", outcome);
        }
    }
}
