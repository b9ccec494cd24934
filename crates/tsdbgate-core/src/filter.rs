//! Credential-based line filtering.
//!
//! Clients embed `user=<name>` and `password=<secret>` tags in ordinary
//! `put` lines. Before a batch goes upstream every line is checked
//! against an authentication oracle; lines that fail (or carry no
//! credentials) are dropped, and surviving lines lose their password tags.

use std::collections::HashMap;

const USER_KEY: &str = "user";
const PASSWORD_KEY: &str = "password";

/// Filter a batch of lines down to the authorized ones.
///
/// The oracle is called at most once per distinct `(user, password)`
/// pair in `message`. The result always ends with exactly one `\n`; a
/// result of just `"\n"` means no line was authorized (see
/// [`is_empty_batch`]).
pub fn filter_authorized<F>(message: &str, mut authenticate: F) -> String
where
    F: FnMut(&str, &str) -> bool,
{
    let mut decisions: HashMap<(&str, &str), bool> = HashMap::new();
    let mut kept: Vec<String> = Vec::new();

    for line in message.lines() {
        let Some((user, password)) = credentials(line) else {
            continue;
        };
        let allowed = *decisions
            .entry((user, password))
            .or_insert_with(|| authenticate(user, password));
        if allowed {
            kept.push(strip_passwords(line));
        }
    }

    let mut out = kept.join("\n");
    out.push('\n');
    out
}

/// True when a filtered batch has nothing left to forward.
pub fn is_empty_batch(filtered: &str) -> bool {
    filtered.trim().is_empty()
}

/// Extract the first `user` and `password` tag values from a line.
///
/// Tags are whitespace-separated and split on their first `=`. Tokens
/// without `=` are ignored.
pub fn credentials(line: &str) -> Option<(&str, &str)> {
    let mut user = None;
    let mut password = None;

    for tag in line.split_whitespace() {
        let Some((key, value)) = tag.split_once('=') else {
            continue;
        };
        match key {
            USER_KEY if user.is_none() => user = Some(value),
            PASSWORD_KEY if password.is_none() => password = Some(value),
            _ => {}
        }
    }

    Some((user?, password?))
}

/// Remove every `password=...` tag along with the whitespace before it.
///
/// Spacing between the remaining tags is kept as it was; the ends are
/// trimmed.
fn strip_passwords(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut cursor = 0;

    for (start, end) in tag_spans(line) {
        let separator = &line[cursor..start];
        cursor = end;
        if is_password_tag(&line[start..end]) {
            continue;
        }
        out.push_str(separator);
        out.push_str(&line[start..end]);
    }

    out.trim().to_string()
}

fn is_password_tag(tag: &str) -> bool {
    tag.split_once('=').is_some_and(|(key, _)| key == PASSWORD_KEY)
}

/// Byte ranges of the whitespace-separated tags in `line`.
fn tag_spans(line: &str) -> impl Iterator<Item = (usize, usize)> + '_ {
    let mut start = None;
    line.char_indices()
        .chain(std::iter::once((line.len(), ' ')))
        .filter_map(move |(i, c)| match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                start = None;
                Some((s, i))
            }
            (false, None) => {
                start = Some(i);
                None
            }
            _ => None,
        })
}
