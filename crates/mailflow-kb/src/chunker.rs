//! Recursive boundary-aware text chunking.
//!
//! Targets ~500-character chunks with 100 characters of overlap, preferring
//! to break on paragraph, line, then Chinese/Latin sentence punctuation
//! before falling back to spaces and finally hard character windows.

/// Target chunk length in characters.
pub const CHUNK_SIZE: usize = 500;
/// Characters carried over between adjacent chunks.
pub const CHUNK_OVERLAP: usize = 100;
/// Preferred split boundaries, strongest first. The empty separator means
/// "hard split by character window".
pub const SEPARATORS: [&str; 9] = ["\n\n", "\n", "。", "！", "？", "；", "，", " ", ""];

/// Split `text` into chunks. Empty/whitespace-only chunks are dropped.
///
/// A produced chunk never exceeds `CHUNK_SIZE + CHUNK_OVERLAP` plus the
/// length of one separator.
pub fn split_text(text: &str) -> Vec<String> {
    split_recursive(text, &SEPARATORS)
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn tail_chars(s: &str, n: usize) -> String {
    let total = char_len(s);
    if total <= n {
        return s.to_string();
    }
    s.chars().skip(total - n).collect()
}

fn split_recursive(text: &str, separators: &[&str]) -> Vec<String> {
    if char_len(text) <= CHUNK_SIZE {
        return vec![text.to_string()];
    }

    // First separator actually present in the text wins; the empty
    // separator always matches.
    let mut sep = "";
    let mut rest: &[&str] = &[];
    for (i, s) in separators.iter().enumerate() {
        if s.is_empty() || text.contains(s) {
            sep = s;
            rest = &separators[i + 1..];
            break;
        }
    }

    if sep.is_empty() {
        return hard_split(text);
    }
    let pieces: Vec<String> = text.split_inclusive(sep).map(str::to_string).collect();

    let mut chunks = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        if char_len(&piece) > CHUNK_SIZE {
            if !current.trim().is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            if rest.is_empty() {
                chunks.extend(hard_split(&piece));
            } else {
                chunks.extend(split_recursive(&piece, rest));
            }
            continue;
        }
        if !current.is_empty() && char_len(&current) + char_len(&piece) > CHUNK_SIZE {
            let overlap = tail_chars(&current, CHUNK_OVERLAP);
            chunks.push(std::mem::replace(&mut current, overlap));
        }
        current.push_str(&piece);
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

fn hard_split(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = CHUNK_SIZE - CHUNK_OVERLAP;
    let mut out = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + CHUNK_SIZE).min(chars.len());
        out.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_SEP_LEN: usize = 2; // "\n\n"

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = split_text("请问价格是多少？");
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn paragraphs_split_on_double_newline() {
        let a = "甲".repeat(300);
        let b = "乙".repeat(300);
        let text = format!("{a}\n\n{b}");
        let chunks = split_text(&text);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].contains('甲'));
        assert!(chunks.last().unwrap().contains('乙'));
    }

    #[test]
    fn chunks_never_exceed_bound() {
        // Mixed Chinese prose with sentence punctuation and no newlines.
        let sentence = "企服通平台提供数字化诊断与系统搭建服务，覆盖中小企业的核心业务流程。";
        let text = sentence.repeat(80);
        for chunk in split_text(&text) {
            assert!(
                chunk.chars().count() <= CHUNK_SIZE + CHUNK_OVERLAP + MAX_SEP_LEN,
                "chunk too long: {} chars",
                chunk.chars().count()
            );
        }
    }

    #[test]
    fn unbreakable_text_is_hard_split_with_overlap() {
        let text = "x".repeat(1200);
        let chunks = split_text(&text);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= CHUNK_SIZE);
        }
        // Adjacent hard-split chunks share the overlap window.
        let first: Vec<char> = chunks[0].chars().collect();
        let second: Vec<char> = chunks[1].chars().collect();
        let tail: String = first[first.len() - CHUNK_OVERLAP..].iter().collect();
        let head: String = second[..CHUNK_OVERLAP].iter().collect();
        assert_eq!(tail, head);
    }

    #[test]
    fn adjacent_chunks_carry_overlap() {
        let sentence = "一句话。";
        let text = sentence.repeat(400);
        let chunks = split_text(&text);
        assert!(chunks.len() >= 2);
        // The head of chunk 2 repeats the overlap tail of chunk 1.
        let tail = tail_chars(&chunks[0], CHUNK_OVERLAP);
        assert!(chunks[1].starts_with(tail.trim_start()));
    }
}
