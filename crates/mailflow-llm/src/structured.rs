//! Structured-output decoding with heuristic fallback.
//!
//! Models are asked for JSON but sometimes answer in prose, wrap the JSON in
//! code fences, or emit unescaped control characters. Every decode here
//! follows the same ladder: strict JSON, then a regex/keyword heuristic,
//! then [`ParseOutcome::Unusable`] so the caller can apply its default. The
//! ladder lives in this module only — callers never re-implement it.

use std::sync::OnceLock;

use mailflow_core::types::EmailCategory;
use regex::Regex;

/// Result of decoding a model response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    /// Strict decode succeeded.
    Parsed(T),
    /// A heuristic recovered a usable value from free text.
    Fallback(T),
    /// Nothing usable; the caller applies its documented default.
    Unusable,
}

impl<T> ParseOutcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            ParseOutcome::Parsed(v) | ParseOutcome::Fallback(v) => Some(v),
            ParseOutcome::Unusable => None,
        }
    }
}

/// Proofreader verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofreadVerdict {
    pub sendable: bool,
    pub feedback: String,
}

/// Pull the first `{...}` block out of a response, tolerating code fences
/// and surrounding prose.
fn json_block(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

/// Decode `{"category": "..."}`; fall back to keyword scan over the text.
pub fn parse_category(raw: &str) -> ParseOutcome<EmailCategory> {
    if let Some(block) = json_block(raw) {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(block) {
            if let Some(s) = v.get("category").and_then(|c| c.as_str()) {
                if let Ok(cat) = s.parse() {
                    return ParseOutcome::Parsed(cat);
                }
            }
        }
    }

    let lower = raw.to_lowercase();
    let scanned = if lower.contains("unrelated") || lower.contains("无关") {
        Some(EmailCategory::Unrelated)
    } else if lower.contains("complaint") || lower.contains("投诉") {
        Some(EmailCategory::CustomerComplaint)
    } else if lower.contains("feedback") || lower.contains("反馈") {
        Some(EmailCategory::CustomerFeedback)
    } else if lower.contains("enquiry") || lower.contains("inquiry") || lower.contains("咨询") {
        Some(EmailCategory::ProductEnquiry)
    } else {
        None
    };
    match scanned {
        Some(cat) => ParseOutcome::Fallback(cat),
        None => ParseOutcome::Unusable,
    }
}

/// Decode `{"queries": ["...", ...]}`; fall back to bullet/numbered list
/// items bearing quoted strings.
pub fn parse_queries(raw: &str) -> ParseOutcome<Vec<String>> {
    if let Some(block) = json_block(raw) {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(block) {
            if let Some(arr) = v.get("queries").and_then(|q| q.as_array()) {
                let queries: Vec<String> = arr
                    .iter()
                    .filter_map(|q| q.as_str())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if !queries.is_empty() {
                    return ParseOutcome::Parsed(queries);
                }
            }
        }
    }

    static ITEM: OnceLock<Regex> = OnceLock::new();
    let re = ITEM.get_or_init(|| {
        Regex::new(r#"[-\d]+\.?\s*["'“]([^"'”]+)["'”]"#).expect("valid list-item regex")
    });
    let queries: Vec<String> = re
        .captures_iter(raw)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if queries.is_empty() {
        ParseOutcome::Unusable
    } else {
        ParseOutcome::Fallback(queries)
    }
}

/// Decode `{"email": "..."}`; fall back to a regex over the raw text, then
/// to treating the whole response as the draft.
pub fn parse_draft(raw: &str) -> ParseOutcome<String> {
    if let Some(block) = json_block(raw) {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(block) {
            if let Some(s) = v.get("email").and_then(|e| e.as_str()) {
                if !s.trim().is_empty() {
                    return ParseOutcome::Parsed(s.to_string());
                }
            }
        }
    }

    // Unescaped control characters break strict decoding; recover the field
    // by regex and unescape manually.
    static EMAIL_FIELD: OnceLock<Regex> = OnceLock::new();
    let re = EMAIL_FIELD.get_or_init(|| {
        Regex::new(r#"(?s)\{\s*"email"\s*:\s*"(.*)"\s*\}"#).expect("valid email-field regex")
    });
    if let Some(caps) = re.captures(raw) {
        let unescaped = caps[1]
            .replace("\\n", "\n")
            .replace("\\r", "\r")
            .replace("\\t", "\t")
            .replace("\\\"", "\"")
            .replace("\\\\", "\\");
        if !unescaped.trim().is_empty() {
            return ParseOutcome::Fallback(unescaped);
        }
    }

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        ParseOutcome::Unusable
    } else {
        ParseOutcome::Fallback(trimmed.to_string())
    }
}

/// Decode `{"send": bool, "feedback": "..."}`; fall back to a verdict scan.
pub fn parse_proofread(raw: &str) -> ParseOutcome<ProofreadVerdict> {
    if let Some(block) = json_block(raw) {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(block) {
            if let Some(send) = v.get("send").and_then(|s| s.as_bool()) {
                let feedback = v
                    .get("feedback")
                    .and_then(|f| f.as_str())
                    .unwrap_or_default()
                    .to_string();
                return ParseOutcome::Parsed(ProofreadVerdict {
                    sendable: send,
                    feedback,
                });
            }
        }
    }

    let lower = raw.to_lowercase();
    let sendable = if lower.contains(r#""send": true"#)
        || lower.contains("可以发送")
        || lower.contains("sendable: true")
    {
        Some(true)
    } else if lower.contains(r#""send": false"#)
        || lower.contains("不可发送")
        || lower.contains("需要修改")
        || lower.contains("sendable: false")
    {
        Some(false)
    } else {
        None
    };
    match sendable {
        Some(sendable) => ParseOutcome::Fallback(ProofreadVerdict {
            sendable,
            feedback: raw.trim().to_string(),
        }),
        None => ParseOutcome::Unusable,
    }
}

/// Last-resort query: the first 100 characters of the email body.
pub fn body_prefix_query(body: &str) -> String {
    body.chars().take(100).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_strict_json() {
        assert_eq!(
            parse_category(r#"{"category": "customer_complaint"}"#),
            ParseOutcome::Parsed(EmailCategory::CustomerComplaint)
        );
    }

    #[test]
    fn category_from_fenced_json() {
        let raw = "```json\n{\"category\": \"unrelated\"}\n```";
        assert_eq!(
            parse_category(raw),
            ParseOutcome::Parsed(EmailCategory::Unrelated)
        );
    }

    #[test]
    fn category_keyword_fallback() {
        assert_eq!(
            parse_category("这封邮件是投诉类型的。"),
            ParseOutcome::Fallback(EmailCategory::CustomerComplaint)
        );
        assert_eq!(
            parse_category("This looks like a product inquiry to me."),
            ParseOutcome::Fallback(EmailCategory::ProductEnquiry)
        );
        assert_eq!(parse_category("???"), ParseOutcome::Unusable);
    }

    #[test]
    fn queries_strict_json() {
        let raw = r#"{"queries": ["企服通套餐价格", "基础版功能"]}"#;
        assert_eq!(
            parse_queries(raw),
            ParseOutcome::Parsed(vec![
                "企服通套餐价格".to_string(),
                "基础版功能".to_string()
            ])
        );
    }

    #[test]
    fn queries_bullet_fallback() {
        let raw = "Here are the queries:\n- \"企服通是什么\"\n2. \"CRM系统价格\"";
        match parse_queries(raw) {
            ParseOutcome::Fallback(qs) => {
                assert_eq!(qs, vec!["企服通是什么".to_string(), "CRM系统价格".to_string()]);
            }
            other => panic!("expected fallback, got {other:?}"),
        }
        assert_eq!(parse_queries("no list here"), ParseOutcome::Unusable);
    }

    #[test]
    fn draft_strict_and_regex_fallback() {
        assert_eq!(
            parse_draft(r#"{"email": "您好"}"#),
            ParseOutcome::Parsed("您好".to_string())
        );
        // Raw newline inside the string breaks strict JSON.
        let broken = "{\"email\": \"line1\nline2\\n结束\"}";
        match parse_draft(broken) {
            ParseOutcome::Fallback(text) => {
                assert!(text.contains("line1\nline2\n结束"));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn draft_plain_text_is_fallback_not_unusable() {
        match parse_draft("尊敬的客户，您好！……") {
            ParseOutcome::Fallback(text) => assert!(text.starts_with("尊敬的客户")),
            other => panic!("expected fallback, got {other:?}"),
        }
        assert_eq!(parse_draft("   "), ParseOutcome::Unusable);
    }

    #[test]
    fn proofread_strict_and_fallback() {
        assert_eq!(
            parse_proofread(r#"{"send": true, "feedback": "ok"}"#),
            ParseOutcome::Parsed(ProofreadVerdict {
                sendable: true,
                feedback: "ok".to_string()
            })
        );
        match parse_proofread("邮件质量良好，可以发送。") {
            ParseOutcome::Fallback(v) => assert!(v.sendable),
            other => panic!("expected fallback, got {other:?}"),
        }
        assert_eq!(parse_proofread("嗯……"), ParseOutcome::Unusable);
    }

    #[test]
    fn body_prefix_respects_char_boundaries() {
        let body = "价".repeat(150);
        let q = body_prefix_query(&body);
        assert_eq!(q.chars().count(), 100);
    }
}
