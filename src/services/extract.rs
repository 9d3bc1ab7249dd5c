//! Pulls structured data out of free-text model replies.
//!
//! Replies often wrap JSON in a fenced block or surround it with commentary.
//! Extraction here is purely textual; whether the fragment has the right
//! shape for a pass is decided by the contracts in `services::shape`.

use serde_json::Value;

/// The reply a model gives when it cannot follow the output contract.
pub const RETRY_SENTINEL: &str = "RETRY";

pub fn is_retry_sentinel(reply: &str) -> bool {
    reply.trim().eq_ignore_ascii_case(RETRY_SENTINEL)
}

/// Returns the content of the first fenced block, or the trimmed reply when
/// there is none.
///
/// A reply that opens with a fence is unwrapped up to its *last* fence, so a
/// fence-wrapped reply containing nested fences stays intact. An unterminated
/// fence yields everything after the opening line.
pub fn unwrap_fenced(reply: &str) -> &str {
    let s = reply.trim();

    if s.starts_with("```") {
        let Some(newline) = s.find('\n') else {
            return s.trim_start_matches('`').trim();
        };
        let body_start = newline + 1;
        return match s.rfind("```") {
            Some(end) if end >= body_start => s[body_start..end].trim(),
            _ => s[body_start..].trim(),
        };
    }

    if let Some(open) = s.find("```") {
        let after = &s[open + 3..];
        let body_start = after.find('\n').map(|n| n + 1).unwrap_or(after.len());
        let body = &after[body_start..];
        return match body.find("```") {
            Some(end) => body[..end].trim(),
            None => body.trim(),
        };
    }

    s
}

/// First balanced top-level JSON array or object in the reply that parses.
pub fn extract_json_fragment(reply: &str) -> Option<&str> {
    let body = unwrap_fenced(reply);
    if let Some(fragment) = scan_for_json(body) {
        return Some(fragment);
    }
    // JSON may sit outside a fence that held something else
    if body.len() != reply.trim().len() {
        return scan_for_json(reply);
    }
    None
}

fn scan_for_json(text: &str) -> Option<&str> {
    for (start, ch) in text.char_indices() {
        if ch != '[' && ch != '{' {
            continue;
        }
        if let Some(len) = balanced_len(&text[start..]) {
            let fragment = &text[start..start + len];
            if serde_json::from_str::<Value>(fragment).is_ok() {
                return Some(fragment);
            }
        }
    }
    None
}

/// Byte length of the bracketed span opening at the start of `text`,
/// honouring string literals and escapes. `None` when it never closes or
/// closes with the wrong bracket.
fn balanced_len(text: &str) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if in_string {
            match ch {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ']' | '}' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}
