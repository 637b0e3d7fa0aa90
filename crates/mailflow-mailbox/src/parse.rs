//! Header and body normalisation shared by mailbox backends.

use std::sync::OnceLock;

use regex::Regex;

/// Subject used when a message carries none.
pub const FALLBACK_SUBJECT: &str = "(无主题)";

/// Extract a bare address from a From-style header.
///
/// Handles `显示名称 <user@example.com>` and plain `user@example.com`;
/// strips wrapping quotes and whitespace. Returns `None` when no '@' is
/// present — such messages are skipped entirely.
pub fn extract_address(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let candidate = match (raw.find('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if start < end => &raw[start + 1..end],
        _ => raw,
    };
    let cleaned = candidate.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if cleaned.contains('@') && !cleaned.is_empty() {
        Some(cleaned.to_string())
    } else {
        None
    }
}

/// Strip HTML markup from a body when only a text/html part was available.
pub fn strip_html(body: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let re = TAG.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));
    re.replace_all(body, "").to_string()
}

/// Reply subject per the outbound contract.
pub fn reply_subject(subject: &str) -> String {
    format!("Re: {}", subject)
}

/// Message id used when the Message-ID header is missing.
pub fn fallback_id(seq: &str) -> String {
    format!("email_{}", seq)
}

/// Whether an inbound message should enter the pipeline at all: own sends
/// and empty bodies are dropped at the adapter boundary.
pub fn should_process(own_address: &str, sender: &str, body: &str) -> bool {
    if !own_address.is_empty() && sender.contains(own_address) {
        return false;
    }
    if body.trim().is_empty() {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bracketed_address() {
        assert_eq!(
            extract_address("张三 <zhang@example.com>").as_deref(),
            Some("zhang@example.com")
        );
        assert_eq!(
            extract_address("plain@example.com").as_deref(),
            Some("plain@example.com")
        );
        assert_eq!(
            extract_address("\"quoted@example.com\"").as_deref(),
            Some("quoted@example.com")
        );
    }

    #[test]
    fn address_without_at_is_rejected() {
        assert_eq!(extract_address("not-an-address"), None);
        assert_eq!(extract_address("名称 <>"), None);
        assert_eq!(extract_address(""), None);
    }

    #[test]
    fn html_markup_is_stripped() {
        let html = "<div><p>你好，</p><br/>请问<b>价格</b>？</div>";
        assert_eq!(strip_html(html), "你好，请问价格？");
    }

    #[test]
    fn own_sends_and_empty_bodies_are_filtered() {
        assert!(!should_process("me@qq.com", "me@qq.com", "text"));
        assert!(!should_process("me@qq.com", "other@qq.com", "   \n"));
        assert!(should_process("me@qq.com", "other@qq.com", "text"));
        // No configured address: nothing is "own".
        assert!(should_process("", "anyone@qq.com", "text"));
    }

    #[test]
    fn id_fallback_uses_sequence() {
        assert_eq!(fallback_id("42"), "email_42");
    }
}
