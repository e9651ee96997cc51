//! Shell-like splitting of message text into a command token and arguments.

use crate::{errors::Error, Result};

/// Split `text` on whitespace, honoring `'…'`, `"…"` and `` `…` `` quoting.
///
/// Quotes are stripped from the stored token. Outside quotes a backslash escapes
/// the next character; inside double quotes it only escapes `"` and `\`. Unclosed
/// quotes (or a trailing lone backslash) are rejected as a whole: the caller never
/// sees a partial token list.
pub fn tokenize(text: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut cur = String::new();
    // Tracks whether `cur` is a token even if empty (`""` is a valid argument).
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            } else if ch == '\\' && q == '"' {
                match chars.peek() {
                    Some(&next) if next == '"' || next == '\\' => {
                        cur.push(next);
                        chars.next();
                    }
                    _ => cur.push(ch),
                }
            } else {
                cur.push(ch);
            }
            continue;
        }

        match ch {
            '"' | '\'' | '`' => {
                quote = Some(ch);
                in_token = true;
            }
            '\\' => {
                let Some(next) = chars.next() else {
                    return Err(Error::MalformedInput(
                        "trailing backslash".to_string(),
                    ));
                };
                cur.push(next);
                in_token = true;
            }
            c if c.is_whitespace() => {
                if in_token {
                    out.push(std::mem::take(&mut cur));
                    in_token = false;
                }
            }
            other => {
                cur.push(other);
                in_token = true;
            }
        }
    }

    if let Some(q) = quote {
        return Err(Error::MalformedInput(format!("unclosed {q} quote")));
    }
    if in_token {
        out.push(cur);
    }

    Ok(out)
}

/// Quote a single token so that [`tokenize`] reads it back unchanged.
pub fn quote(token: &str) -> String {
    let plain = !token.is_empty()
        && !token
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '\\'));
    if plain {
        return token.to_string();
    }

    let mut out = String::with_capacity(token.len() + 2);
    out.push('"');
    for c in token.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Restate a token list as one already-quoted string.
pub fn join<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens
        .iter()
        .map(|t| quote(t.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        tokenize(s).unwrap()
    }

    #[test]
    fn empty_input_is_empty_sequence() {
        assert!(toks("").is_empty());
        assert!(toks("   \t\n").is_empty());
    }

    #[test]
    fn splits_on_any_whitespace() {
        assert_eq!(toks("/send  hi\tthere\n"), vec!["/send", "hi", "there"]);
    }

    #[test]
    fn all_three_quote_styles_group_words() {
        assert_eq!(toks(r#"/ban "John Doe""#), vec!["/ban", "John Doe"]);
        assert_eq!(toks("/ban 'John Doe'"), vec!["/ban", "John Doe"]);
        assert_eq!(toks("/ban `John Doe`"), vec!["/ban", "John Doe"]);
    }

    #[test]
    fn quotes_concatenate_with_adjacent_text() {
        assert_eq!(toks(r#"a"b c"d"#), vec!["ab cd"]);
    }

    #[test]
    fn other_quote_chars_are_literal_inside_quotes() {
        assert_eq!(toks(r#""it's `fine`""#), vec!["it's `fine`"]);
        assert_eq!(toks(r#"'say "hi"'"#), vec![r#"say "hi""#]);
    }

    #[test]
    fn explicit_empty_string_is_a_token() {
        assert_eq!(toks(r#"/send """#), vec!["/send", ""]);
    }

    #[test]
    fn backslash_escapes() {
        assert_eq!(toks(r"a\ b"), vec!["a b"]);
        assert_eq!(toks(r#""a\"b""#), vec![r#"a"b"#]);
        assert_eq!(toks(r#""a\nb""#), vec![r"a\nb"]);
        assert_eq!(toks(r"'a\b'"), vec![r"a\b"]);
    }

    #[test]
    fn unbalanced_quotes_are_malformed() {
        for s in [r#"/ban "John"#, "it's", "`x", r#"a "b" 'c"#, r"trailing\"] {
            match tokenize(s) {
                Err(Error::MalformedInput(_)) => {}
                other => panic!("expected MalformedInput for {s:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn quoting_round_trips_through_join() {
        let inputs = [
            "/ban \"John Doe\"",
            "plain words only",
            r#"'single "inner"' `tick 'x'` \\back"#,
            r#"/send "" "a\\b""#,
            "unicode：命令 'with space'",
        ];
        for input in inputs {
            let first = toks(input);
            let restated = join(&first);
            assert_eq!(toks(&restated), first, "restated as {restated:?}");
        }
    }

    #[test]
    fn quote_leaves_plain_tokens_alone() {
        assert_eq!(quote("ban"), "ban");
        assert_eq!(quote("John Doe"), "\"John Doe\"");
        assert_eq!(quote(""), "\"\"");
    }
}
