//! Decoding and schema checks for raw model output.

use crate::models::{AnalysisResult, Recommendation, Sentiment};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Decode raw model text as JSON.
///
/// Tolerates a surrounding markdown code fence and leading or trailing
/// prose around a single object.
pub fn parse(raw: &str) -> Result<Value, String> {
    let text = strip_fence(raw.trim());
    if text.is_empty() {
        return Err("empty reply".to_string());
    }

    match serde_json::from_str::<Value>(text) {
        Ok(value) => Ok(value),
        Err(first) => {
            let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
                return Err(format!("not JSON: {}", first));
            };
            if end <= start {
                return Err(format!("not JSON: {}", first));
            }
            serde_json::from_str::<Value>(&text[start..=end])
                .map_err(|e| format!("not JSON: {}", e))
        }
    }
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line, then the closing fence
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Check a decoded value against the analysis schema.
///
/// Every violation is collected so a correction prompt can name all of
/// them at once.
pub fn check(value: &Value) -> Result<AnalysisResult, Vec<String>> {
    let Some(object) = value.as_object() else {
        return Err(vec!["top-level value must be an object".to_string()]);
    };

    let mut violations = Vec::new();

    let summary = match object.get("summary") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::String(_)) => {
            violations.push("'summary' must not be empty".to_string());
            None
        }
        Some(_) => {
            violations.push("'summary' must be a string".to_string());
            None
        }
        None => {
            violations.push("missing field 'summary'".to_string());
            None
        }
    };

    let recommendation = enumerated(
        object,
        "recommendation",
        &Recommendation::ALLOWED,
        true,
        &mut violations,
    )
    .and_then(|s| serde_json::from_value::<Recommendation>(Value::String(s)).ok());

    let sentiment = enumerated(object, "sentiment", &Sentiment::ALLOWED, false, &mut violations)
        .and_then(|s| serde_json::from_value::<Sentiment>(Value::String(s)).ok());

    let subject = match object.get("subject") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(_) => {
            violations.push("'subject' must be a string or null".to_string());
            None
        }
    };

    let figures = match object.get("figures") {
        Some(Value::Object(map)) => {
            let mut figures = BTreeMap::new();
            for (name, v) in map {
                match v.as_f64().filter(|n| n.is_finite()) {
                    Some(n) => {
                        figures.insert(name.clone(), n);
                    }
                    None => violations.push(format!("figure '{}' must be a number", name)),
                }
            }
            Some(figures)
        }
        Some(_) => {
            violations.push("'figures' must be an object of numbers".to_string());
            None
        }
        None => {
            violations.push("missing field 'figures'".to_string());
            None
        }
    };

    let citations = match object.get("citations") {
        Some(Value::Array(items)) => {
            let mut citations = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => citations.push(s.trim().to_string()),
                    _ => violations.push("'citations' must contain only strings".to_string()),
                }
            }
            Some(citations)
        }
        Some(_) => {
            violations.push("'citations' must be an array".to_string());
            None
        }
        None => {
            violations.push("missing field 'citations'".to_string());
            None
        }
    };

    let confidence = match object.get("confidence") {
        Some(v) => match v.as_f64() {
            Some(c) if (0.0..=1.0).contains(&c) => Some(c),
            Some(c) => {
                violations.push(format!("'confidence' {} is outside 0..=1", c));
                None
            }
            None => {
                violations.push("'confidence' must be a number".to_string());
                None
            }
        },
        None => {
            violations.push("missing field 'confidence'".to_string());
            None
        }
    };

    match (summary, recommendation, figures, citations, confidence) {
        (Some(summary), Some(recommendation), Some(figures), Some(citations), Some(confidence))
            if violations.is_empty() =>
        {
            Ok(AnalysisResult {
                summary,
                recommendation,
                subject,
                sentiment,
                figures,
                citations,
                confidence,
            })
        }
        _ => Err(violations),
    }
}

/// Read a lowercase enumerated string field; `null` is allowed when optional.
fn enumerated(
    object: &Map<String, Value>,
    field: &str,
    allowed: &[&str],
    required: bool,
    violations: &mut Vec<String>,
) -> Option<String> {
    match object.get(field) {
        Some(Value::String(s)) if allowed.contains(&s.as_str()) => Some(s.clone()),
        Some(Value::String(s)) => {
            violations.push(format!(
                "'{}' value '{}' is not one of {}",
                field,
                s,
                allowed.join(", ")
            ));
            None
        }
        None | Some(Value::Null) if !required => None,
        None => {
            violations.push(format!("missing field '{}'", field));
            None
        }
        Some(_) => {
            violations.push(format!("'{}' must be a string", field));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "summary": "AAPL trades at 150.",
            "recommendation": "hold",
            "subject": "AAPL",
            "sentiment": null,
            "figures": { "current_price": 150.0 },
            "citations": ["stock:AAPL"],
            "confidence": 0.7
        })
    }

    #[test]
    fn test_parse_plain_and_fenced() {
        assert!(parse(r#"{"a":1}"#).is_ok());
        assert_eq!(parse("```json\n{\"a\":1}\n```").unwrap(), json!({"a": 1}));
        assert_eq!(parse("Here you go: {\"a\":1} hope it helps").unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("").is_err());
        assert!(parse("not json at all").is_err());
        assert!(parse("{\"summary\": ").is_err());
        assert!(parse("} backwards {").is_err());
    }

    #[test]
    fn test_check_valid_result() {
        let result = check(&valid()).unwrap();
        assert_eq!(result.recommendation, Recommendation::Hold);
        assert_eq!(result.subject.as_deref(), Some("AAPL"));
        assert_eq!(result.sentiment, None);
        assert_eq!(result.figures["current_price"], 150.0);
    }

    #[test]
    fn test_check_collects_every_violation() {
        let value = json!({
            "summary": "",
            "recommendation": "strong buy",
            "figures": { "current_price": "150" },
            "confidence": 1.5
        });

        let violations = check(&value).unwrap_err();
        assert!(violations.iter().any(|v| v.contains("'summary' must not be empty")));
        assert!(violations.iter().any(|v| v.contains("'strong buy'")));
        assert!(violations.iter().any(|v| v.contains("figure 'current_price'")));
        assert!(violations.iter().any(|v| v.contains("missing field 'citations'")));
        assert!(violations.iter().any(|v| v.contains("outside 0..=1")));
    }

    #[test]
    fn test_check_rejects_non_object() {
        assert!(check(&json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_optional_fields_may_be_absent() {
        let mut value = valid();
        let object = value.as_object_mut().unwrap();
        object.remove("subject");
        object.remove("sentiment");

        let result = check(&value).unwrap();
        assert!(result.subject.is_none());
        assert!(result.sentiment.is_none());
    }
}
