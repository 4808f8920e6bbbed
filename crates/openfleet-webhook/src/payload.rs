//! Issue-number extraction from a `projects_v2_item` webhook body (spec
//! §4.8 step 5).

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn content_url_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(?:issues|pull)/(\d+)").expect("static regex is valid"))
}

/// Tries, in order: `projects_v2_item.content_number`,
/// `projects_v2_item.issue_number`, `projects_v2_item.content.number`,
/// `projects_v2_item.issue.number`, then a regex scan of any string
/// value in the payload that looks like an issue/PR URL.
pub fn extract_issue_number(payload: &Value) -> Option<String> {
    let item = payload.get("projects_v2_item");

    if let Some(n) = item.and_then(|i| as_number(i.get("content_number"))) {
        return Some(n);
    }
    if let Some(n) = item.and_then(|i| as_number(i.get("issue_number"))) {
        return Some(n);
    }
    if let Some(content) = item.and_then(|i| i.get("content")) {
        if let Some(n) = as_number(content.get("number")) {
            return Some(n);
        }
        if let Some(n) = content
            .get("url")
            .and_then(Value::as_str)
            .and_then(extract_from_url)
        {
            return Some(n);
        }
    }
    if let Some(n) = item
        .and_then(|i| i.get("issue"))
        .and_then(|i| as_number(i.get("number")))
    {
        return Some(n);
    }

    scan_for_content_url_number(payload)
}

fn as_number(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_u64).map(|n| n.to_string())
}

fn extract_from_url(url: &str) -> Option<String> {
    content_url_number_regex()
        .captures(url)
        .map(|c| c[1].to_string())
}

fn scan_for_content_url_number(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => extract_from_url(s),
        Value::Array(items) => items.iter().find_map(scan_for_content_url_number),
        Value::Object(map) => map.values().find_map(scan_for_content_url_number),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_content_number() {
        let payload = json!({"projects_v2_item": {"content_number": 7}});
        assert_eq!(extract_issue_number(&payload).as_deref(), Some("7"));
    }

    #[test]
    fn falls_back_to_nested_content_number() {
        let payload = json!({"projects_v2_item": {"content": {"number": 42}}});
        assert_eq!(extract_issue_number(&payload).as_deref(), Some("42"));
    }

    #[test]
    fn falls_back_to_content_url_regex() {
        let payload = json!({
            "projects_v2_item": {"content": {"url": "https://api.github.com/repos/acme/widgets/issues/99"}}
        });
        assert_eq!(extract_issue_number(&payload).as_deref(), Some("99"));
    }

    #[test]
    fn returns_none_when_nothing_matches() {
        let payload = json!({"projects_v2_item": {"content": {}}});
        assert_eq!(extract_issue_number(&payload), None);
    }
}
