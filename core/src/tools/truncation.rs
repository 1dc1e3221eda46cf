//! Two-step output truncation applied to every tool's string output before it enters the
//! assistant's context: a char-based pass, then a line-based pass, each independently capped.

use config::{TruncationModeDefault, TruncationRule};

/// Truncates `text` per `rule`. Step 1 (chars): pass through if `len <= max_chars`; otherwise in
/// `head_tail` mode keep the first and last half of the budget with a removed-char-count warning
/// spliced in between, or in `tail` mode keep the trailing `max_chars` with a leading warning.
/// Step 2 (lines, only if `max_lines` is set): pass through if the result has `<= max_lines`
/// lines, otherwise keep the first and last half of the line budget with an
/// `[... N lines omitted ...]` marker.
pub fn truncate(text: &str, rule: &TruncationRule) -> String {
    let after_chars = truncate_chars(text, rule.max_chars, rule.mode);
    match rule.max_lines {
        Some(max_lines) => truncate_lines(&after_chars, max_lines),
        None => after_chars,
    }
}

fn truncate_chars(text: &str, max_chars: usize, mode: TruncationModeDefault) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }
    let removed = chars.len() - max_chars;
    match mode {
        TruncationModeDefault::Tail => {
            let warning = format!("[... {removed} characters omitted ...]\n");
            let tail: String = chars[chars.len() - max_chars..].iter().collect();
            format!("{warning}{tail}")
        }
        TruncationModeDefault::HeadTail => {
            let half = max_chars / 2;
            let head: String = chars[..half].iter().collect();
            let tail: String = chars[chars.len() - (max_chars - half)..].iter().collect();
            format!("{head}\n[... {removed} characters omitted ...]\n{tail}")
        }
    }
}

fn truncate_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        return text.to_string();
    }
    let removed = lines.len() - max_lines;
    let half = max_lines / 2;
    let head = lines[..half].join("\n");
    let tail = lines[lines.len() - (max_lines - half)..].join("\n");
    format!("{head}\n[... {removed} lines omitted ...]\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(max_chars: usize, mode: TruncationModeDefault, max_lines: Option<usize>) -> TruncationRule {
        TruncationRule { max_chars, mode, max_lines }
    }

    #[test]
    fn text_under_budget_passes_through_unchanged() {
        let r = rule(100, TruncationModeDefault::Tail, None);
        assert_eq!(truncate("short", &r), "short");
    }

    #[test]
    fn tail_mode_keeps_trailing_chars_with_warning_prefix() {
        let r = rule(5, TruncationModeDefault::Tail, None);
        let out = truncate("abcdefghij", &r);
        assert!(out.ends_with("fghij"));
        assert!(out.contains("omitted"));
    }

    #[test]
    fn head_tail_mode_splices_warning_in_the_middle() {
        let r = rule(6, TruncationModeDefault::HeadTail, None);
        let out = truncate("abcdefghijklmno", &r);
        assert!(out.starts_with("abc"));
        assert!(out.ends_with("mno"));
        assert!(out.contains("omitted"));
    }

    #[test]
    fn line_cap_applies_after_char_truncation() {
        let r = rule(1_000, TruncationModeDefault::Tail, Some(2));
        let text = "a\nb\nc\nd\ne";
        let out = truncate(text, &r);
        assert!(out.contains("omitted"));
        assert_eq!(out.lines().count(), 3); // 1 head + marker + 1 tail
    }
}
