//! Strict decoder for the `passback_params` field.
//!
//! The API serialises this field as a dictionary literal, e.g.
//! `{'oauth_consumer_key': '', 'lis_result_sourcedid': 'course-v1:SkillFactory+DST-3.0+28FEB2021:lms.skillfactory.ru-ca3ecf8e5f284c329eb7bd529e1a9f7e:e', 'lis_outcome_service_url': 'https://lms.skillfactory.ru/courses/...'}`.
//! Only literals are accepted: quoted strings, numbers, booleans, null/None
//! and nested mappings, lists and tuples. Identifiers, calls and operators
//! are parse errors.

use std::collections::BTreeMap;

use serde_json::{Number, Value};

use crate::error::{EtlError, Result};

const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    List(Vec<Literal>),
    Map(BTreeMap<String, Literal>),
}

impl Literal {
    /// Text stored in a `TEXT` column: strings verbatim, null as empty,
    /// lists and mappings as compact JSON.
    pub fn to_text(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => float_text(*f),
            Self::Bool(b) => b.to_string(),
            Self::None => String::new(),
            Self::List(_) | Self::Map(_) => self.to_json().to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Str(s) => Value::String(s.clone()),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::Bool(b) => Value::Bool(*b),
            Self::None => Value::Null,
            Self::List(items) => Value::Array(items.iter().map(Literal::to_json).collect()),
            Self::Map(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

// Whole floats keep their decimal point: `1.0`, not `1`.
fn float_text(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

/// Decodes a mapping literal. Blank input decodes to an empty mapping.
/// Errors carry the byte offset of the first character that is not part of
/// a valid literal.
pub fn parse_mapping(input: &str) -> Result<BTreeMap<String, Literal>> {
    let mut parser = Parser {
        src: input.as_bytes(),
        text: input,
        pos: 0,
    };
    parser.skip_ws();
    if parser.at_end() {
        return Ok(BTreeMap::new());
    }

    let map = parser.mapping(0)?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.error("trailing characters after mapping"));
    }
    Ok(map)
}

struct Parser<'a> {
    src: &'a [u8],
    text: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn error(&self, message: &str) -> EtlError {
        EtlError::Passback {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", byte as char)))
        }
    }

    fn value(&mut self, depth: usize) -> Result<Literal> {
        if depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.skip_ws();
        match self.peek() {
            Some(b'{') => self.mapping(depth + 1).map(Literal::Map),
            Some(b'[') => self.sequence(b'[', b']', depth + 1).map(Literal::List),
            Some(b'(') => self.sequence(b'(', b')', depth + 1).map(Literal::List),
            Some(b'\'' | b'"') => self.string().map(Literal::Str),
            Some(b'-' | b'+' | b'0'..=b'9') => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.keyword(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn mapping(&mut self, depth: usize) -> Result<BTreeMap<String, Literal>> {
        self.expect(b'{')?;
        let mut map = BTreeMap::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(b'}') {
                self.pos += 1;
                return Ok(map);
            }
            let key = match self.peek() {
                Some(b'\'' | b'"') => self.string()?,
                _ => return Err(self.error("mapping keys must be quoted strings")),
            };
            self.expect(b':')?;
            let value = self.value(depth)?;
            map.insert(key, value);

            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {}
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn sequence(&mut self, open: u8, close: u8, depth: usize) -> Result<Vec<Literal>> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(items);
            }
            items.push(self.value(depth)?);
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(c) if c == close => {}
                _ => return Err(self.error("expected ',' or closing bracket")),
            }
        }
    }

    fn string(&mut self) -> Result<String> {
        let quote = self.peek().ok_or_else(|| self.error("expected string"))?;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let text = self.text;
            let rest = text.get(self.pos..).unwrap_or("");
            let mut chars = rest.chars();
            let c = chars.next().ok_or_else(|| self.error("unterminated string"))?;
            self.pos += c.len_utf8();
            match c {
                '\\' => {
                    let escaped = chars.next().ok_or_else(|| self.error("unterminated escape"))?;
                    self.pos += escaped.len_utf8();
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        '\\' | '\'' | '"' | '/' => out.push(escaped),
                        'u' => out.push(self.unicode_escape()?),
                        _ => {
                            out.push('\\');
                            out.push(escaped);
                        }
                    }
                }
                c if c as u32 == u32::from(quote) => return Ok(out),
                '\n' => return Err(self.error("newline in string")),
                c => out.push(c),
            }
        }
    }

    fn unicode_escape(&mut self) -> Result<char> {
        let hex = self
            .text
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| self.error("short \\u escape"))?;
        let code = u32::from_str_radix(hex, 16).map_err(|_| self.error("invalid \\u escape"))?;
        self.pos += 4;
        char::from_u32(code).ok_or_else(|| self.error("invalid code point"))
    }

    fn number(&mut self) -> Result<Literal> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'-' | b'+')) {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(b'0'..=b'9' | b'.' | b'e' | b'E' | b'_')) {
            self.pos += 1;
            if matches!(self.src.get(self.pos - 1), Some(b'e' | b'E'))
                && matches!(self.peek(), Some(b'-' | b'+'))
            {
                self.pos += 1;
            }
        }
        let raw: String = self.text[start..self.pos].chars().filter(|c| *c != '_').collect();
        if let Ok(i) = raw.parse::<i64>() {
            return Ok(Literal::Int(i));
        }
        raw.parse::<f64>().map(Literal::Float).map_err(|_| EtlError::Passback {
            offset: start,
            message: format!("invalid number `{raw}`"),
        })
    }

    fn keyword(&mut self) -> Result<Literal> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.pos += 1;
        }
        match &self.text[start..self.pos] {
            "True" | "true" => Ok(Literal::Bool(true)),
            "False" | "false" => Ok(Literal::Bool(false)),
            "None" | "null" => Ok(Literal::None),
            other => Err(EtlError::Passback {
                offset: start,
                message: format!("`{other}` is not a literal"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(map: &BTreeMap<String, Literal>, key: &str) -> String {
        map.get(key).map(Literal::to_text).unwrap_or_default()
    }

    #[test]
    fn parses_single_quoted_mapping() {
        let map = parse_mapping(
            "{'oauth_consumer_key': '', 'lis_result_sourcedid': 'course-v1:SkillFactory+DST-3.0+28FEB2021:lms.skillfactory.ru-ca3ecf8e5f284c329eb7bd529e1a9f7e:e', 'lis_outcome_service_url': 'https://lms.skillfactory.ru/courses/course-v1:SkillFactory+DST-3.0+28FEB2021/xblock/block-v1:SkillFactory+DST-3.0+28FEB2021+type@lti+block@ca3ecf8e5f284c329eb7bd529e1a9f7e/handler_noauth/grade_handler'}",
        )
        .unwrap();

        assert_eq!(text(&map, "oauth_consumer_key"), "");
        assert!(text(&map, "lis_result_sourcedid").starts_with("course-v1:SkillFactory"));
        assert!(text(&map, "lis_outcome_service_url").ends_with("/grade_handler"));
    }

    #[test]
    fn parses_json_style_mapping() {
        let map = parse_mapping(r#"{"oauth_consumer_key": "key", "extra": [1, 2.5, true, null]}"#)
            .unwrap();
        assert_eq!(text(&map, "oauth_consumer_key"), "key");
        assert_eq!(
            map.get("extra"),
            Some(&Literal::List(vec![
                Literal::Int(1),
                Literal::Float(2.5),
                Literal::Bool(true),
                Literal::None,
            ]))
        );
    }

    #[test]
    fn python_keywords_and_tuples() {
        let map = parse_mapping("{'a': None, 'b': False, 'c': (1, 'x',), 'd': {'e': -3},}").unwrap();
        assert_eq!(map.get("a"), Some(&Literal::None));
        assert_eq!(text(&map, "a"), "");
        assert_eq!(map.get("b"), Some(&Literal::Bool(false)));
        assert_eq!(
            map.get("c"),
            Some(&Literal::List(vec![Literal::Int(1), Literal::Str("x".into())]))
        );
        let Some(Literal::Map(inner)) = map.get("d") else {
            panic!("expected nested mapping");
        };
        assert_eq!(inner.get("e"), Some(&Literal::Int(-3)));
    }

    #[test]
    fn nested_values_are_stored_as_json() {
        let map = parse_mapping("{'ctx': {'b': [1, 'x', None], 'a': True}, 'score': 1.0, 'ratio': 0.25}")
            .unwrap();
        assert_eq!(text(&map, "ctx"), r#"{"a":true,"b":[1,"x",null]}"#);
        assert_eq!(text(&map, "score"), "1.0");
        assert_eq!(text(&map, "ratio"), "0.25");
    }

    #[test]
    fn escapes_are_decoded() {
        let map = parse_mapping(r#"{'k': 'it\'s', "u": "café", 'n': 'a\nb'}"#).unwrap();
        assert_eq!(text(&map, "k"), "it's");
        assert_eq!(text(&map, "u"), "café");
        assert_eq!(text(&map, "n"), "a\nb");
    }

    #[test]
    fn non_ascii_strings_survive() {
        let map = parse_mapping("{'title': 'Попытка №1'}").unwrap();
        assert_eq!(text(&map, "title"), "Попытка №1");
    }

    #[test]
    fn blank_input_is_empty_mapping() {
        assert!(parse_mapping("").unwrap().is_empty());
        assert!(parse_mapping("   ").unwrap().is_empty());
        assert!(parse_mapping("{}").unwrap().is_empty());
    }

    #[test]
    fn expressions_are_rejected() {
        for input in [
            "__import__('os').system('rm -rf /')",
            "{'a': __import__('os')}",
            "{'a': 1 + 2}",
            "{'a': open('/etc/passwd').read()}",
            "{a: 1}",
            "[1, 2]",
        ] {
            let err = parse_mapping(input).unwrap_err();
            assert!(matches!(err, EtlError::Passback { .. }), "{input}: {err}");
        }
    }

    #[test]
    fn reports_offset_of_failure() {
        let err = parse_mapping("{'a' 1}").unwrap_err();
        match err {
            EtlError::Passback { offset, .. } => assert_eq!(offset, 5),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unterminated_input_fails() {
        assert!(parse_mapping("{'a': 'b'").is_err());
        assert!(parse_mapping("{'a': 'b}").is_err());
        assert!(parse_mapping("{'a': 'b'} trailing").is_err());
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let input = format!("{{'a': {}1{}}}", "[".repeat(64), "]".repeat(64));
        assert!(parse_mapping(&input).is_err());
    }
}
