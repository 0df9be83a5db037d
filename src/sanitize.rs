//! Argument interpolation for the simple query protocol.
//!
//! The extended protocol separates code from data; the simple protocol does
//! not, so arguments are rendered as SQL literals and substituted for their
//! `$n` placeholders. The tokenizer below exists to make sure substitution
//! never happens inside a string literal, quoted identifier, or comment.
//!
//! Only valid under `standard_conforming_strings=on` and
//! `client_encoding=UTF8`; the caller checks both.

use crate::error::Error;
use crate::type_map::{float_to_text, PgArgument};

/// Substitute `$n` placeholders in `sql` with `args` rendered as literals.
pub(crate) fn interpolate(sql: &str, args: &[PgArgument]) -> Result<String, Error> {
    let mut out = String::with_capacity(sql.len() + args.len() * 8);
    let bytes = sql.as_bytes();
    let mut i = 0;

    // the start of the pending run of ordinary SQL to copy through
    let mut plain = 0;

    while i < bytes.len() {
        match bytes[i] {
            // single-quoted string; `''` is a literal quote
            b'\'' => {
                let escapes = i > 0 && (bytes[i - 1] == b'E' || bytes[i - 1] == b'e');
                i = skip_string(bytes, i + 1, escapes);
            }

            // quoted identifier; `""` is a literal quote
            b'"' => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'"' {
                        if bytes.get(i + 1) == Some(&b'"') {
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
            }

            // line comment
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i += 2;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }

            // block comment; these nest
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                let mut depth = 1;

                while i < bytes.len() && depth > 0 {
                    if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
                        depth += 1;
                        i += 2;
                    } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                        depth -= 1;
                        i += 2;
                    } else {
                        i += 1;
                    }
                }
            }

            b'$' => {
                if let Some((index, end)) = scan_placeholder(bytes, i) {
                    if index == 0 || index > args.len() {
                        return Err(Error::ArgumentIndex {
                            index,
                            count: args.len(),
                        });
                    }

                    out.push_str(&sql[plain..i]);
                    push_literal(&mut out, &args[index - 1]);

                    i = end;
                    plain = end;
                } else if let Some(end) = scan_dollar_quote(bytes, i) {
                    i = end;
                } else {
                    i += 1;
                }
            }

            _ => i += 1,
        }
    }

    out.push_str(&sql[plain..]);

    Ok(out)
}

// after an opening quote: advance past the closing quote, honoring `''`
// everywhere and `\'`/`\\` inside E-strings
fn skip_string(bytes: &[u8], mut i: usize, escapes: bool) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if escapes => i += 2,

            b'\'' => {
                if bytes.get(i + 1) == Some(&b'\'') {
                    i += 2;
                    continue;
                }
                return i + 1;
            }

            _ => i += 1,
        }
    }

    i
}

// `$<digits>` at `i`; returns (index, end) when it really is a placeholder
fn scan_placeholder(bytes: &[u8], i: usize) -> Option<(usize, usize)> {
    let mut end = i + 1;

    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }

    if end == i + 1 {
        return None;
    }

    // `$1abc` is not a placeholder (it is part of some larger token)
    if bytes
        .get(end)
        .map_or(false, |b| b.is_ascii_alphanumeric() || *b == b'_')
    {
        return None;
    }

    let index = std::str::from_utf8(&bytes[i + 1..end])
        .ok()?
        .parse()
        .ok()?;

    Some((index, end))
}

// `$tag$ ... $tag$` at `i`; returns the index just past the closing quote
fn scan_dollar_quote(bytes: &[u8], i: usize) -> Option<usize> {
    let mut tag_end = i + 1;

    while tag_end < bytes.len() {
        match bytes[tag_end] {
            b'$' => break,

            // a dollar-quote tag is an identifier; the leading character
            // must not be a digit (that case is a placeholder, handled
            // before this function runs)
            b if b.is_ascii_alphanumeric() || b == b'_' => tag_end += 1,

            _ => return None,
        }
    }

    if tag_end >= bytes.len() {
        return None;
    }

    let delimiter = &bytes[i..=tag_end];

    // find the matching closing delimiter
    let mut j = tag_end + 1;

    while j + delimiter.len() <= bytes.len() {
        if &bytes[j..j + delimiter.len()] == delimiter {
            return Some(j + delimiter.len());
        }
        j += 1;
    }

    // unterminated; treat the rest of the input as quoted
    Some(bytes.len())
}

// render a value in its SQL literal form
fn push_literal(out: &mut String, arg: &PgArgument) {
    match arg {
        PgArgument::Null => out.push_str("NULL"),

        PgArgument::Bool(true) => out.push_str("true"),
        PgArgument::Bool(false) => out.push_str("false"),

        PgArgument::Int2(v) => out.push_str(itoa::Buffer::new().format(*v)),
        PgArgument::Int4(v) => out.push_str(itoa::Buffer::new().format(*v)),
        PgArgument::Int8(v) => out.push_str(itoa::Buffer::new().format(*v)),

        PgArgument::Float4(v) => push_float(out, f64::from(*v)),
        PgArgument::Float8(v) => push_float(out, *v),

        PgArgument::Text(v) => {
            out.push('\'');
            for c in v.chars() {
                if c == '\'' {
                    out.push('\'');
                }
                out.push(c);
            }
            out.push('\'');
        }

        PgArgument::Bytea(v) => {
            out.push_str("'\\x");
            out.push_str(&hex::encode(v));
            out.push('\'');
        }
    }
}

fn push_float(out: &mut String, v: f64) {
    if v.is_finite() {
        out.push_str(&float_to_text(v));
    } else {
        // NaN and the infinities only parse in their quoted spelling
        out.push('\'');
        out.push_str(&float_to_text(v));
        out.push('\'');
    }
}

/// Quote an identifier (table or column name) for embedding in SQL.
pub(crate) fn quote_identifier(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 2);

    out.push('"');
    for c in ident.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subst(sql: &str, args: &[PgArgument]) -> String {
        interpolate(sql, args).unwrap()
    }

    #[test]
    fn test_basic_substitution() {
        assert_eq!(
            subst(
                "select $1, $2, $1",
                &[PgArgument::Int4(42), PgArgument::Text("hi".into())]
            ),
            "select 42, 'hi', 42"
        );
    }

    #[test]
    fn test_quote_escaping() {
        assert_eq!(
            subst("select $1", &[PgArgument::Text("it's".into())]),
            "select 'it''s'"
        );
    }

    #[test]
    fn test_bytes_and_null_and_bool() {
        assert_eq!(
            subst(
                "values ($1, $2, $3)",
                &[
                    PgArgument::Bytea(vec![0xde, 0xad]),
                    PgArgument::Null,
                    PgArgument::Bool(true),
                ]
            ),
            "values ('\\xdead', NULL, true)"
        );
    }

    #[test]
    fn test_floats() {
        assert_eq!(subst("select $1", &[PgArgument::Float8(1.25)]), "select 1.25");
        assert_eq!(
            subst("select $1", &[PgArgument::Float8(f64::NAN)]),
            "select 'NaN'"
        );
        assert_eq!(
            subst("select $1", &[PgArgument::Float8(f64::NEG_INFINITY)]),
            "select '-Infinity'"
        );
    }

    #[test]
    fn test_placeholders_in_strings_are_preserved() {
        assert_eq!(
            subst("select '$1', $1", &[PgArgument::Int4(7)]),
            "select '$1', 7"
        );
        assert_eq!(
            subst("select \"$1\" from t where x = $1", &[PgArgument::Int4(7)]),
            "select \"$1\" from t where x = 7"
        );
    }

    #[test]
    fn test_doubled_quote_does_not_end_string() {
        assert_eq!(
            subst("select 'a''$1' || $1", &[PgArgument::Int4(1)]),
            "select 'a''$1' || 1"
        );
    }

    #[test]
    fn test_e_string_backslash_escape() {
        assert_eq!(
            subst(r"select E'\'$1' , $1", &[PgArgument::Int4(3)]),
            r"select E'\'$1' , 3"
        );
    }

    #[test]
    fn test_dollar_quoted_strings() {
        assert_eq!(
            subst("select $$ $1 $$, $1", &[PgArgument::Int4(5)]),
            "select $$ $1 $$, 5"
        );
        assert_eq!(
            subst("select $tag$ $1 $tag$, $1", &[PgArgument::Int4(5)]),
            "select $tag$ $1 $tag$, 5"
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            subst("select 1 -- $1\n, $1", &[PgArgument::Int4(9)]),
            "select 1 -- $1\n, 9"
        );
        assert_eq!(
            subst("select /* $1 /* nested $1 */ */ $1", &[PgArgument::Int4(9)]),
            "select /* $1 /* nested $1 */ */ 9"
        );
    }

    #[test]
    fn test_out_of_range_placeholder() {
        let err = interpolate("select $2", &[PgArgument::Int4(1)]).unwrap_err();

        assert!(matches!(err, Error::ArgumentIndex { index: 2, count: 1 }));

        assert!(interpolate("select $0", &[PgArgument::Int4(1)]).is_err());
    }

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(quote_identifier("plain"), "\"plain\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
