//! hstore decoding.
//!
//! Binary rows decode hstore columns through `FromSql`. JSON notification
//! payloads carry them in hstore's text form (`"a"=>"1", "b"=>NULL`), which
//! is parsed here so both paths produce the same flat object.

use std::iter::Peekable;
use std::str::Chars;

use anyhow::{anyhow, bail, Result};
use serde_json::{Map, Value};
use tracing::warn;

use crate::Row;

/// Parse hstore text output into an object of string (or null) values.
pub fn parse_hstore(text: &str) -> Result<Map<String, Value>> {
    let mut chars = text.chars().peekable();
    let mut map = Map::new();

    loop {
        skip_whitespace(&mut chars);
        if chars.peek().is_none() {
            break;
        }

        let (key, _) = read_token(&mut chars)?;
        skip_whitespace(&mut chars);
        match (chars.next(), chars.next()) {
            (Some('='), Some('>')) => {}
            _ => bail!("Expected '=>' after hstore key '{key}'"),
        }
        skip_whitespace(&mut chars);

        let (value, quoted) = read_token(&mut chars)?;
        let value = if !quoted && value.eq_ignore_ascii_case("NULL") {
            Value::Null
        } else {
            Value::String(value)
        };
        map.insert(key, value);

        skip_whitespace(&mut chars);
        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(c) => bail!("Unexpected '{c}' in hstore text"),
        }
    }
    Ok(map)
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

/// Read one quoted or bare token. Returns the text and whether it was quoted.
fn read_token(chars: &mut Peekable<Chars<'_>>) -> Result<(String, bool)> {
    let mut token = String::new();
    if chars.peek() == Some(&'"') {
        chars.next();
        loop {
            match chars.next() {
                Some('\\') => {
                    let escaped = chars
                        .next()
                        .ok_or_else(|| anyhow!("Unterminated escape in hstore text"))?;
                    token.push(escaped);
                }
                Some('"') => return Ok((token, true)),
                Some(c) => token.push(c),
                None => bail!("Unterminated quoted string in hstore text"),
            }
        }
    }

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || c == ',' || c == '=' {
            break;
        }
        token.push(c);
        chars.next();
    }
    if token.is_empty() {
        bail!("Empty token in hstore text");
    }
    Ok((token, false))
}

/// Replace the text form of each named hstore column with its decoded
/// object. Values that fail to parse are left as text.
pub fn decode_hstore_columns(row: &mut Row, columns: &[String]) {
    for column in columns {
        let Some(Value::String(text)) = row.get(column) else {
            continue;
        };
        match parse_hstore(text) {
            Ok(map) => {
                row.insert(column.clone(), Value::Object(map));
            }
            Err(e) => warn!(column = %column, "Leaving hstore column as text: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_quoted_pairs() {
        let map = parse_hstore(r#""id"=>"1", "name"=>"Ada", "note"=>NULL"#).unwrap();
        assert_eq!(
            Value::Object(map),
            json!({"id": "1", "name": "Ada", "note": null})
        );
    }

    #[test]
    fn test_parse_escapes_and_separators_inside_quotes() {
        let map = parse_hstore(r#""a,b"=>"x=>y", "q"=>"say \"hi\"", "s"=>"back\\slash""#).unwrap();
        assert_eq!(map["a,b"], json!("x=>y"));
        assert_eq!(map["q"], json!("say \"hi\""));
        assert_eq!(map["s"], json!("back\\slash"));
    }

    #[test]
    fn test_parse_quoted_null_is_a_string() {
        let map = parse_hstore(r#""k"=>"NULL""#).unwrap();
        assert_eq!(map["k"], json!("NULL"));
    }

    #[test]
    fn test_parse_bare_tokens() {
        let map = parse_hstore("a=>1,b => null").unwrap();
        assert_eq!(map["a"], json!("1"));
        assert_eq!(map["b"], Value::Null);
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_hstore("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_hstore(r#""a"=>"unterminated"#).is_err());
        assert!(parse_hstore(r#""a" "b""#).is_err());
    }

    #[test]
    fn test_decode_columns_in_row() {
        let mut row = json!({
            "event_id": 1,
            "row_data": "\"id\"=>\"7\"",
            "changed_fields": null,
            "broken": "\"x\"=>"
        })
        .as_object()
        .cloned()
        .unwrap();
        let columns = vec![
            "row_data".to_string(),
            "changed_fields".to_string(),
            "broken".to_string(),
        ];
        decode_hstore_columns(&mut row, &columns);

        assert_eq!(row["row_data"], json!({"id": "7"}));
        assert_eq!(row["changed_fields"], Value::Null);
        assert_eq!(row["broken"], json!("\"x\"=>"));
    }
}
