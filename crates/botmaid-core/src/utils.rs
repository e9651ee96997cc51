/// Join items for humans: `a, b and c`. Each item is substituted into `format` at `{}`.
pub fn list_to_string<S: AsRef<str>>(
    items: &[S],
    format: &str,
    separator: &str,
    and_word: &str,
) -> String {
    let fmt = |s: &S| format.replacen("{}", s.as_ref(), 1);
    match items {
        [] => String::new(),
        [only] => fmt(only),
        [init @ .., last] => {
            let head = init.iter().map(fmt).collect::<Vec<_>>().join(separator);
            format!("{head}{and_word}{}", fmt(last))
        }
    }
}

/// Log-line form of a chat message: `[title]nick: text`.
pub fn chat_log_line(title: &str, nickname: &str, text: &str) -> String {
    let mut out = String::new();
    if !title.is_empty() {
        out.push_str(&format!("[{title}]"));
    }
    if !nickname.is_empty() {
        out.push_str(nickname);
        out.push_str(": ");
    }
    out.push_str(text);
    out
}
