//! Tolerant extraction of JSON from free-form model output.
//!
//! Models wrap JSON in code fences, preface it with prose, or append
//! commentary. Every consumer goes through [`extract_json`] and handles the
//! two branches of [`Parsed`] explicitly instead of scattering try/catch
//! chains across call sites.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Result of a tolerant parse: either the model's own structure, or a
/// rule-based stand-in with the reason the model output was unusable.
#[derive(Debug, Clone)]
pub enum Parsed<T> {
    Ok(T),
    Fallback { reason: String, value: T },
}

impl<T> Parsed<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Parsed::Fallback { .. })
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            Parsed::Ok(_) => None,
            Parsed::Fallback { reason, .. } => Some(reason),
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Parsed::Ok(value) => value,
            Parsed::Fallback { value, .. } => value,
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Parsed::Ok(value) => value,
            Parsed::Fallback { value, .. } => value,
        }
    }
}

fn fence_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"```json\s*([\s\S]*?)\s*```").expect("valid regex"),
            Regex::new(r"```\s*([\s\S]*?)\s*```").expect("valid regex"),
        ]
    })
}

/// Extract the first JSON object from model output.
///
/// Accepts, in order: bare JSON, JSON inside ```json or ``` fences, and a
/// single object embedded in surrounding prose.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    for pattern in fence_patterns() {
        for captures in pattern.captures_iter(trimmed) {
            let candidate = captures.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if !candidate.starts_with('{') {
                continue;
            }
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }

    balanced_object(trimmed).and_then(|candidate| {
        serde_json::from_str::<Value>(candidate)
            .ok()
            .filter(Value::is_object)
    })
}

/// Slice out the first brace-balanced object, string-aware.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
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
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Pull a relevance score in [0, 1] from model output: a bare number, a
/// `score`/`relevance_score` key, or the first decimal in the text.
pub fn extract_score(text: &str) -> Option<f64> {
    let trimmed = text.trim();

    if let Ok(score) = trimmed.parse::<f64>() {
        return Some(score.clamp(0.0, 1.0));
    }

    if let Some(value) = extract_json(trimmed) {
        for key in ["score", "relevance_score", "relevance"] {
            if let Some(score) = value.get(key).and_then(Value::as_f64) {
                return Some(score.clamp(0.0, 1.0));
            }
        }
    }

    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let number = NUMBER.get_or_init(|| Regex::new(r"\d*\.?\d+").expect("valid regex"));
    number
        .find(trimmed)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|score| score.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_json() {
        let value = extract_json(r#"{"category": "admission"}"#).unwrap();
        assert_eq!(value["category"], "admission");
    }

    #[test]
    fn test_fenced_json() {
        let text = "Here is the result:\n```json\n{\"score\": 0.8}\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["score"], 0.8);
    }

    #[test]
    fn test_unlabelled_fence() {
        let text = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(text).unwrap()["a"], 1);
    }

    #[test]
    fn test_json_with_prose() {
        let text = "Sure! The analysis is {\"relevance_score\": 0.4, \"summary\": \"ok\"} as requested.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["relevance_score"], 0.4);
    }

    #[test]
    fn test_braces_inside_strings() {
        let text = r#"prefix {"summary": "has } and { inside", "n": 2} suffix"#;
        let value = extract_json(text).unwrap();
        assert_eq!(value["n"], 2);
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(extract_json("[1, 2, 3]").is_none());
        assert!(extract_json("just prose").is_none());
        assert!(extract_json("").is_none());
    }

    #[test]
    fn test_extract_score_variants() {
        assert_eq!(extract_score("0.7"), Some(0.7));
        assert_eq!(extract_score("{\"score\": 0.35}"), Some(0.35));
        assert_eq!(extract_score("I'd rate this 0.9 overall"), Some(0.9));
        assert_eq!(extract_score("definitely relevant: 2.0"), Some(1.0));
        assert_eq!(extract_score("no number here"), None);
    }

    #[test]
    fn test_parsed_accessors() {
        let ok: Parsed<u32> = Parsed::Ok(1);
        assert!(!ok.is_fallback());
        assert_eq!(ok.into_value(), 1);

        let fallback = Parsed::Fallback {
            reason: "parse error".to_string(),
            value: 2u32,
        };
        assert!(fallback.is_fallback());
        assert_eq!(fallback.fallback_reason(), Some("parse error"));
        assert_eq!(fallback.into_value(), 2);
    }
}
