//! Lexical scanning of bind placeholders in statement text.
//!
//! Recognizes positional `?` markers and named `:name` markers, skipping
//! quoted literals, quoted identifiers, comments and `::` casts. This is not
//! a SQL parser; it only knows enough to not mistake text for a marker.

/// A bind marker found in statement text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Positional,
    Named(String),
}

/// A marker plus its byte range in the statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderSpan {
    pub start: usize,
    pub end: usize,
    pub placeholder: Placeholder,
}

/// Find every bind marker in `sql`, in order of appearance.
pub fn scan(sql: &str) -> Vec<PlaceholderSpan> {
    let bytes = sql.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // Doubled quote is an escaped quote.
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 2;
            }
            b':' if bytes.get(i + 1) == Some(&b':') => {
                i += 2;
            }
            b':' => {
                let start = i;
                let mut end = i + 1;
                while end < bytes.len()
                    && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                let is_name = end > start + 1 && !bytes[start + 1].is_ascii_digit();
                if is_name {
                    spans.push(PlaceholderSpan {
                        start,
                        end,
                        placeholder: Placeholder::Named(sql[start + 1..end].to_string()),
                    });
                }
                i = end.max(start + 1);
            }
            b'?' => {
                spans.push(PlaceholderSpan {
                    start: i,
                    end: i + 1,
                    placeholder: Placeholder::Positional,
                });
                i += 1;
            }
            _ => i += 1,
        }
    }

    spans
}

/// Number of positional `?` markers.
pub fn count_positional(sql: &str) -> usize {
    scan(sql)
        .iter()
        .filter(|s| s.placeholder == Placeholder::Positional)
        .count()
}

/// Distinct named markers, in order of first appearance.
pub fn named(sql: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for span in scan(sql) {
        if let Placeholder::Named(name) = span.placeholder {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// Replace each marker with the text returned by `replace`.
pub fn rewrite<E>(
    sql: &str,
    mut replace: impl FnMut(&Placeholder) -> Result<String, E>,
) -> Result<String, E> {
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for span in scan(sql) {
        out.push_str(&sql[last..span.start]);
        out.push_str(&replace(&span.placeholder)?);
        last = span.end;
    }
    out.push_str(&sql[last..]);
    Ok(out)
}
