//! Character-level cleanup of recognizer output.

/// Folds full-width ASCII to half-width and drops whitespace, control and
/// invisible formatting characters.
///
/// `normalize(&normalize(s)) == normalize(s)` for every input.
pub fn normalize(text: &str) -> String {
    text.chars()
        .map(to_halfwidth)
        .filter(|c| !is_ignorable(*c))
        .collect()
}

fn to_halfwidth(c: char) -> char {
    match c as u32 {
        0xFF01..=0xFF5E => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
        0x3000 => ' ',
        _ => c,
    }
}

fn is_ignorable(c: char) -> bool {
    c.is_whitespace()
        || c.is_control()
        || matches!(
            c,
            '\u{00AD}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}'
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fullwidth_folding() {
        assert_eq!(normalize("ＡＢＣ１２３！"), "ABC123!");
        assert_eq!(normalize("들어왔습니다　！"), "들어왔습니다!");
    }

    #[test]
    fn test_drops_whitespace_and_invisibles() {
        assert_eq!(normalize(" 들 어\t왔\n습니다 "), "들어왔습니다");
        assert_eq!(normalize("들\u{200B}어\u{FEFF}왔\u{00AD}습\u{200D}니다"), "들어왔습니다");
        assert_eq!(normalize("a\u{0007}b"), "ab");
    }

    #[test]
    fn test_empty_and_blank() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" \u{3000}\r\n"), "");
    }

    #[test]
    fn test_idempotent() {
        for s in ["ＨＥＬＬＯ　ｗｏｒｌｄ", "님이 들어왔습니다.", "\u{200B}", "abc  def", "～～"] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once);
        }
    }
}
