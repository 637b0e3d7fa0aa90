//! Keyword-driven urgency detection over subject + body.
//!
//! Pure rule engine, no LLM: urgency must be available at ingestion time
//! for every message, including ones that never reach the pipeline.

use std::sync::OnceLock;

use mailflow_core::types::UrgencyLevel;
use regex::RegexBuilder;

struct LevelPatterns {
    level: UrgencyLevel,
    patterns: Vec<(regex::Regex, &'static str)>,
}

const URGENT_KEYWORDS: &[&str] = &[
    // English
    "urgent", "asap", "immediately", "emergency", "critical", "crisis", "outage",
    "not working", "broken", "failure", "panic",
    // Chinese
    "紧急", "立即", "马上", "立刻", "十万火急", "急件", "急事", "尽快处理",
    "非常重要", "系统宕机", "服务中断", "无法访问", "出问题了", "非常着急",
    "刻不容缓", "迫在眉睫", "火烧眉毛",
];

const HIGH_KEYWORDS: &[&str] = &[
    "important", "priority", "as soon as possible", "need response", "waiting for",
    "follow up", "time sensitive", "deadline", "due today",
    "重要", "重要事项", "重要通知", "重要客户", "尽快", "尽快回复", "尽快完成",
    "重要提醒", "请尽快", "麻烦尽快", "催促", "提醒", "请马上", "请立即",
    "尽快安排", "尽快解决",
];

const MEDIUM_KEYWORDS: &[&str] = &[
    "request", "would you", "could you", "when possible", "at your convenience",
    "请问", "希望", "期望", "建议", "能否", "是否可以", "方便的话", "谢谢配合",
    "麻烦", "感谢", "请帮忙", "请协助", "希望您", "请您", "如有可能", "如果方便",
];

/// Phrases that explicitly de-escalate; any match forces `low`.
const LOWERING_KEYWORDS: &[&str] = &[
    "不急", "慢慢来", "有空再说", "没关系", "不必着急", "不用急", "慢慢处理",
    "不着急", "有时间再说", "以后再说", "延后处理", "低优先级",
    "no rush", "take your time", "whenever", "not urgent",
];

fn compile(words: &[&'static str]) -> Vec<(regex::Regex, &'static str)> {
    words
        .iter()
        .filter_map(|w| {
            RegexBuilder::new(&regex::escape(w))
                .case_insensitive(true)
                .build()
                .ok()
                .map(|re| (re, *w))
        })
        .collect()
}

fn levels() -> &'static [LevelPatterns] {
    static LEVELS: OnceLock<Vec<LevelPatterns>> = OnceLock::new();
    LEVELS.get_or_init(|| {
        vec![
            LevelPatterns {
                level: UrgencyLevel::Urgent,
                patterns: compile(URGENT_KEYWORDS),
            },
            LevelPatterns {
                level: UrgencyLevel::High,
                patterns: compile(HIGH_KEYWORDS),
            },
            LevelPatterns {
                level: UrgencyLevel::Medium,
                patterns: compile(MEDIUM_KEYWORDS),
            },
        ]
    })
}

fn lowering() -> &'static Vec<regex::Regex> {
    static LOWERING: OnceLock<Vec<regex::Regex>> = OnceLock::new();
    LOWERING.get_or_init(|| {
        LOWERING_KEYWORDS
            .iter()
            .filter_map(|w| {
                RegexBuilder::new(&regex::escape(w))
                    .case_insensitive(true)
                    .build()
                    .ok()
            })
            .collect()
    })
}

/// Analyse urgency from a message's subject and body.
///
/// Returns the strongest matching level and the keywords that triggered it.
/// De-escalating phrases ("不急", "no rush") override everything to `low`.
pub fn analyze(subject: &str, body: &str) -> (UrgencyLevel, Vec<String>) {
    let text = format!("{} {}", subject, body);

    if lowering().iter().any(|re| re.is_match(&text)) {
        return (UrgencyLevel::Low, Vec::new());
    }

    for level in levels() {
        let matched: Vec<String> = level
            .patterns
            .iter()
            .filter(|(re, _)| re.is_match(&text))
            .map(|(_, word)| word.to_string())
            .collect();
        if !matched.is_empty() {
            return (level.level, matched);
        }
    }

    (UrgencyLevel::Low, Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outage_is_urgent() {
        let (level, keywords) = analyze("系统宕机！", "我们的服务无法访问，请立即处理");
        assert_eq!(level, UrgencyLevel::Urgent);
        assert!(keywords.iter().any(|k| k == "系统宕机"));
    }

    #[test]
    fn deadline_is_high() {
        let (level, _) = analyze("deadline reminder", "need this before the deadline");
        assert_eq!(level, UrgencyLevel::High);
    }

    #[test]
    fn polite_request_is_medium() {
        let (level, _) = analyze("咨询", "请问你们的产品怎么收费");
        assert_eq!(level, UrgencyLevel::Medium);
    }

    #[test]
    fn plain_text_is_low() {
        let (level, keywords) = analyze("hello", "just an ordinary note");
        assert_eq!(level, UrgencyLevel::Low);
        assert!(keywords.is_empty());
    }

    #[test]
    fn lowering_phrase_overrides_urgent_keywords() {
        let (level, keywords) = analyze("紧急", "其实不急，有空再说");
        assert_eq!(level, UrgencyLevel::Low);
        assert!(keywords.is_empty());
    }

    #[test]
    fn matching_is_case_insensitive() {
        let (level, _) = analyze("URGENT issue", "");
        assert_eq!(level, UrgencyLevel::Urgent);
    }
}
