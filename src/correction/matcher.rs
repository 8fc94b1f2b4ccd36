//! Approximate phrase search over corrected text.

use levenshtein::levenshtein;

/// Smallest edit distance between `phrase` and any substring of `text`
/// whose length is within `tolerance` characters of the phrase length.
///
/// An exact occurrence short-circuits to 0. Text shorter than every window
/// is compared whole.
pub(crate) fn substring_distance(text: &str, phrase: &str, tolerance: usize) -> usize {
    if text.contains(phrase) {
        return 0;
    }

    let chars: Vec<char> = text.chars().collect();
    let phrase_len = phrase.chars().count();
    let min_len = phrase_len.saturating_sub(tolerance).max(1);
    let max_len = phrase_len + tolerance;

    if chars.len() < min_len {
        return levenshtein(text, phrase);
    }

    let mut best = usize::MAX;
    for start in 0..chars.len() {
        for len in min_len..=max_len {
            let end = start + len;
            if end > chars.len() {
                break;
            }
            let window: String = chars[start..end].iter().collect();
            best = best.min(levenshtein(&window, phrase));
            if best == 0 {
                return 0;
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_substring_is_zero() {
        assert_eq!(substring_distance("홍길동님이들어왔습니다.", "들어왔습니다", 1), 0);
    }

    #[test]
    fn test_single_substitution_inside_longer_text() {
        assert_eq!(substring_distance("홍길동님이들머왔습니다", "들어왔습니다", 1), 1);
    }

    #[test]
    fn test_dropped_character() {
        assert_eq!(substring_distance("님이들어왔니다", "들어왔습니다", 1), 1);
    }

    #[test]
    fn test_unrelated_text_is_far() {
        assert!(substring_distance("안녕하세요반갑습니다", "들어왔습니다", 1) > 1);
    }

    #[test]
    fn test_short_text_compared_whole() {
        assert_eq!(substring_distance("들어", "들어왔습니다", 1), 4);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        // Multi-byte text must not produce byte-length windows.
        assert_eq!(substring_distance("xx들어왔슴니다yy", "들어왔습니다", 1), 1);
    }
}
