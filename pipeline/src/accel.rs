//! Accelerator-key stripping shared by edge-label normalization (§4.11) and the `WaitForHuman`
//! handler's choice-key extraction (§4.10). Recognizes the `[K]`, `K)`, and `K - ` prefixes.

/// Strips a leading accelerator marker from `label`, returning the remainder trimmed of
/// leading whitespace. Labels without a recognized marker pass through unchanged (trimmed).
pub fn strip_accelerator(label: &str) -> String {
    let trimmed = label.trim();
    let chars: Vec<char> = trimmed.chars().collect();

    if chars.first() == Some(&'[') {
        if let Some(close) = trimmed.find(']') {
            if close == 2 {
                return trimmed[close + 1..].trim_start().to_string();
            }
        }
    }
    if chars.len() >= 2 && chars[1] == ')' {
        return trimmed[2..].trim_start().to_string();
    }
    if chars.len() >= 4 && chars[1] == ' ' && chars[2] == '-' && chars[3] == ' ' {
        return trimmed[4..].trim_start().to_string();
    }
    trimmed.to_string()
}

/// Extracts the accelerator key itself: the bracketed/prefixed character, uppercased, or the
/// first remaining character of the label if no marker is present.
pub fn extract_key(label: &str) -> Option<char> {
    let trimmed = label.trim();
    let chars: Vec<char> = trimmed.chars().collect();

    if chars.first() == Some(&'[') && trimmed.find(']') == Some(2) {
        return chars.get(1).map(|c| c.to_ascii_uppercase());
    }
    if chars.len() >= 2 && chars[1] == ')' {
        return chars.first().map(|c| c.to_ascii_uppercase());
    }
    if chars.len() >= 4 && chars[1] == ' ' && chars[2] == '-' && chars[3] == ' ' {
        return chars.first().map(|c| c.to_ascii_uppercase());
    }
    strip_accelerator(label).chars().next().map(|c| c.to_ascii_uppercase())
}

/// Normalized form used for preferred-label edge matching (§4.11 step 2): lowercase, trimmed,
/// accelerator prefix stripped.
pub fn normalize_label(label: &str) -> String {
    strip_accelerator(label).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bracket_marker() {
        assert_eq!(strip_accelerator("[A] Approve"), "Approve");
    }

    #[test]
    fn strips_paren_marker() {
        assert_eq!(strip_accelerator("A) Approve"), "Approve");
    }

    #[test]
    fn strips_dash_marker() {
        assert_eq!(strip_accelerator("A - Approve"), "Approve");
    }

    #[test]
    fn passes_through_plain_label() {
        assert_eq!(strip_accelerator("Approve"), "Approve");
    }

    #[test]
    fn extract_key_prefers_marker_char() {
        assert_eq!(extract_key("[R] Retry"), Some('R'));
        assert_eq!(extract_key("r) Retry"), Some('R'));
    }

    #[test]
    fn extract_key_falls_back_to_first_char() {
        assert_eq!(extract_key("retry"), Some('R'));
    }

    #[test]
    fn normalize_label_lowercases_and_strips() {
        assert_eq!(normalize_label("[A] Approve"), "approve");
        assert_eq!(normalize_label("approve"), "approve");
    }
}
