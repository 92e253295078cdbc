//! SQL-style `LIKE`/`ILIKE` pattern matching with `\`-escaping, used by the
//! `Filter` operator for the `LIKE`, `NOT LIKE`, `ILIKE` and `NOT ILIKE`
//! comparison operators (§3). `%` matches any run of characters, `_` matches
//! exactly one, and `\%`/`\_`/`\\` match the literal character.

use crate::error::LikeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    AnyRun,
}

fn compile(pattern: &str) -> Result<Vec<Token>, LikeError> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => tokens.push(Token::Literal(escaped)),
                None => return Err(LikeError::TrailingEscape),
            },
            '%' => tokens.push(Token::AnyRun),
            '_' => tokens.push(Token::AnyChar),
            other => tokens.push(Token::Literal(other)),
        }
    }
    Ok(tokens)
}

/// Matches `text` against `pattern`. `case_insensitive` selects `ILIKE`
/// semantics (ASCII-lowercasing both sides before comparison).
pub fn like_match(pattern: &str, text: &str, case_insensitive: bool) -> Result<bool, LikeError> {
    let tokens = compile(pattern)?;
    let text_chars: Vec<char> =
        if case_insensitive { text.to_lowercase().chars().collect() } else { text.chars().collect() };
    let tokens: Vec<Token> = if case_insensitive {
        tokens
            .into_iter()
            .map(|t| match t {
                Token::Literal(c) => Token::Literal(c.to_ascii_lowercase()),
                other => other,
            })
            .collect()
    } else {
        tokens
    };
    Ok(matches(&tokens, &text_chars))
}

/// Classic backtracking glob matcher generalized over the token stream.
fn matches(tokens: &[Token], text: &[char]) -> bool {
    match (tokens.first(), text.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(Token::AnyRun), _) => {
            // Try consuming zero or more characters of `text` for this `%`.
            let rest = &tokens[1..];
            if matches(rest, text) {
                return true;
            }
            !text.is_empty() && matches(tokens, &text[1..])
        }
        (Some(Token::AnyChar), Some(_)) => matches(&tokens[1..], &text[1..]),
        (Some(Token::AnyChar), None) => false,
        (Some(Token::Literal(c)), Some(t)) => c == t && matches(&tokens[1..], &text[1..]),
        (Some(Token::Literal(_)), None) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_match() {
        assert!(like_match("hello", "hello", false).unwrap());
        assert!(!like_match("hello", "hellO", false).unwrap());
    }

    #[test]
    fn percent_matches_any_run() {
        assert!(like_match("he%o", "hello", false).unwrap());
        assert!(like_match("%lo", "hello", false).unwrap());
        assert!(like_match("he%", "he", false).unwrap());
        assert!(!like_match("he%o", "hell", false).unwrap());
    }

    #[test]
    fn underscore_matches_exactly_one() {
        assert!(like_match("h_llo", "hello", false).unwrap());
        assert!(!like_match("h_llo", "hllo", false).unwrap());
    }

    #[test]
    fn ilike_is_case_insensitive() {
        assert!(like_match("HE%O", "hello", true).unwrap());
        assert!(!like_match("HE%O", "hello", false).unwrap());
    }

    #[test]
    fn escaped_wildcards_are_literal() {
        assert!(like_match(r"100\%", "100%", false).unwrap());
        assert!(!like_match(r"100\%", "100x", false).unwrap());
    }

    #[test]
    fn trailing_backslash_is_an_error() {
        assert!(matches!(like_match("abc\\", "abc", false), Err(LikeError::TrailingEscape)));
    }
}
