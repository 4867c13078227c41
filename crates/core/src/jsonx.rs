//! Every LLM-to-JSON boundary goes through here: strip code-fence wrappers,
//! trim to the first balanced object or array, then parse. Model output is
//! untrusted input; callers fall back to deterministic extractors when even
//! the repaired text does not parse.

use serde::de::DeserializeOwned;

use crate::error::GuardianError;

/// Parse a typed value out of raw model output, applying one repair pass.
pub fn parse_llm_json<T: DeserializeOwned>(raw: &str) -> Result<T, GuardianError> {
    let cleaned = strip_code_fences(raw);
    if let Ok(value) = serde_json::from_str::<T>(cleaned.trim()) {
        return Ok(value);
    }
    let repaired = first_balanced_json(&cleaned)
        .ok_or_else(|| GuardianError::Parse(preview(raw)))?;
    serde_json::from_str::<T>(repaired).map_err(|e| GuardianError::Parse(format!("{e}: {}", preview(raw))))
}

/// Remove a surrounding markdown code fence, tolerating a language tag.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let after_fence = match trimmed.find('\n') {
        Some(idx) => &trimmed[idx + 1..],
        None => return trimmed.to_string(),
    };
    match after_fence.rfind("```") {
        Some(end) => after_fence[..end].trim().to_string(),
        None => after_fence.trim().to_string(),
    }
}

/// Locate the first balanced `{...}` or `[...]` in the text, respecting
/// string literals and escapes.
pub fn first_balanced_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() > 120 {
        let mut end = 120;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &trimmed[..end])
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn plain_json_parses() {
        let v: Value = parse_llm_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn fenced_json_parses() {
        let v: Value = parse_llm_json("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn chatter_around_object_is_trimmed() {
        let raw = "Sure, here is the plan:\n{\"tools\": [\"qa\"]}\nHope that helps!";
        let v: Value = parse_llm_json(raw).unwrap();
        assert_eq!(v["tools"][0], "qa");
    }

    #[test]
    fn nested_braces_in_strings_survive() {
        let raw = r#"prefix {"msg": "uses { and } inside", "n": 2} suffix"#;
        let v: Value = parse_llm_json(raw).unwrap();
        assert_eq!(v["n"], 2);
    }

    #[test]
    fn arrays_are_found() {
        let raw = "```\n[{\"line\": 4}]\n```";
        let v: Value = parse_llm_json(raw).unwrap();
        assert_eq!(v[0]["line"], 4);
    }

    #[test]
    fn invalid_payload_is_a_parse_error() {
        let err = parse_llm_json::<Value>("```json\n{not valid}\n```").unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[test]
    fn empty_input_is_a_parse_error() {
        assert!(parse_llm_json::<Value>("").is_err());
        assert!(parse_llm_json::<Value>("no json here").is_err());
    }
}
