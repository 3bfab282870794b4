//! Splitting command text into chained segments.

use std::path::Path;

/// Words that introduce a command in the same segment.
const PREFIX_KEYWORDS: &[&str] = &[
    "if", "then", "else", "elif", "while", "until", "do", "!", "time", "exec", "command",
];

/// Words that end a compound command.
const CLOSING_KEYWORDS: &[&str] = &["fi", "done", "esac"];

/// Compound-command headers whose words are not commands.
const HEADER_KEYWORDS: &[&str] = &["for", "case", "select", "function", "in"];

/// Split command text on `;`, `&&`, `||`, `|`, `&`, newlines and the start
/// of command substitutions (`$(` and backticks).
///
/// Single-quoted text is never split. Inside double quotes only command
/// substitutions start a new segment.
pub(crate) fn split_segments(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;
    let mut in_single = false;
    let mut in_double = false;

    while i < bytes.len() {
        let b = bytes[i];

        if in_single {
            if b == b'\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }

        match b {
            b'\\' => {
                i += 2;
                continue;
            }
            b'\'' if !in_double => in_single = true,
            b'"' => in_double = !in_double,
            b'`' => {
                push_trimmed(&mut segments, &text[start..i]);
                start = i + 1;
            }
            b'$' if bytes.get(i + 1) == Some(&b'(') => {
                push_trimmed(&mut segments, &text[start..i]);
                i += 2;
                start = i;
                continue;
            }
            // `>&2`, `2>&1`, `&>file` are redirections
            b'&' if is_redirect_ampersand(bytes, i) => {}
            b';' | b'|' | b'&' | b'\n' if !in_double => {
                push_trimmed(&mut segments, &text[start..i]);
                // `&&`, `||`, `|&`, `;;` collapse into one separator
                let mut next = i + 1;
                while next < bytes.len() && matches!(bytes[next], b'|' | b'&' | b';') {
                    next += 1;
                }
                i = next;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    push_trimmed(&mut segments, &text[start..]);
    segments
}

fn is_redirect_ampersand(bytes: &[u8], i: usize) -> bool {
    let prev = i.checked_sub(1).and_then(|p| bytes.get(p));
    matches!(prev, Some(b'>') | Some(b'<')) || bytes.get(i + 1) == Some(&b'>')
}

fn push_trimmed<'a>(segments: &mut Vec<&'a str>, segment: &'a str) {
    let segment = segment.trim();
    if !segment.is_empty() {
        segments.push(segment);
    }
}

/// The command name that leads a segment, lowercased and stripped to its
/// basename. `None` when the segment does not start a command.
pub(crate) fn leading_command(segment: &str) -> Option<String> {
    for raw in segment.split_whitespace() {
        let token = raw.trim_matches(|c| matches!(c, '(' | ')' | '{' | '}' | '"' | '\''));
        if token.is_empty() || is_assignment(token) || PREFIX_KEYWORDS.contains(&token) {
            continue;
        }
        if CLOSING_KEYWORDS.contains(&token) || HEADER_KEYWORDS.contains(&token) {
            return None;
        }
        return Some(basename(token).to_lowercase());
    }
    None
}

/// `NAME=value` prefix assignment.
fn is_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => crate::sanitize::is_valid_env_key(name),
        None => false,
    }
}

fn basename(token: &str) -> &str {
    Path::new(token)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(token)
}

/// Lowercase and collapse whitespace runs to single spaces.
pub(crate) fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
