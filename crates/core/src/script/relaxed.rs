//! Recursive-descent parser for the relaxed JSON dialect users write.
//!
//! On top of strict JSON it accepts unquoted identifier keys, single-quoted
//! strings, `//` and `/* */` comments, and trailing commas. The output is a
//! plain [`serde_json::Value`] tree.

use serde_json::{Map, Number, Value};

/// Maximum nesting of objects and arrays, matching `serde_json`'s limit.
pub const MAX_NESTING_DEPTH: usize = 128;

/// A parse failure with the position it occurred at (1-based).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at line {line}, column {column}")]
pub struct RelaxedJsonError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

/// Parse a complete relaxed JSON document.
pub fn parse(input: &str) -> Result<Value, RelaxedJsonError> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
        depth: 0,
    };
    parser.skip_insignificant()?;
    let value = parser.parse_value()?;
    parser.skip_insignificant()?;
    if parser.pos < parser.chars.len() {
        return Err(parser.error("unexpected trailing characters"));
    }
    Ok(value)
}

/// Append the closing delimiters an unbalanced document is missing.
///
/// Only brackets outside string literals are counted. Stray closers are
/// left for the parser to report.
pub fn balance(input: &str) -> String {
    let mut expected: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in input.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' => expected.push('}'),
            '[' => expected.push(']'),
            '}' | ']' => {
                if expected.last() == Some(&c) {
                    expected.pop();
                }
            }
            _ => {}
        }
    }

    let mut balanced = input.trim_end().to_string();
    balanced.extend(expected.iter().rev());
    balanced
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn error(&self, message: impl Into<String>) -> RelaxedJsonError {
        let consumed = &self.chars[..self.pos.min(self.chars.len())];
        let line = consumed.iter().filter(|c| **c == '\n').count() + 1;
        let column = consumed.iter().rev().take_while(|c| **c != '\n').count() + 1;
        RelaxedJsonError {
            message: message.into(),
            line,
            column,
        }
    }

    /// Skip whitespace and comments.
    fn skip_insignificant(&mut self) -> Result<(), RelaxedJsonError> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_whitespace() || c == '\u{feff}' => self.pos += 1,
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                (Some('/'), Some('*')) => {
                    self.pos += 2;
                    loop {
                        match (self.peek(), self.peek_at(1)) {
                            (Some('*'), Some('/')) => {
                                self.pos += 2;
                                break;
                            }
                            (Some(_), _) => self.pos += 1,
                            (None, _) => return Err(self.error("unterminated block comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn parse_value(&mut self) -> Result<Value, RelaxedJsonError> {
        match self.peek() {
            Some('{') => self.nested(Self::parse_object),
            Some('[') => self.nested(Self::parse_array),
            Some(q @ ('"' | '\'')) => self.parse_string(q).map(Value::String),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.parse_number(),
            Some(c) if is_identifier_start(c) => {
                let start = self.pos;
                let word = self.parse_identifier();
                match word.as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    "null" => Ok(Value::Null),
                    _ => {
                        self.pos = start;
                        Err(self.error(format!("unexpected identifier '{word}'")))
                    }
                }
            }
            Some(c) => Err(self.error(format!("unexpected character '{c}'"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    /// Run `parse` one nesting level deeper, refusing past [`MAX_NESTING_DEPTH`].
    fn nested(
        &mut self,
        parse: fn(&mut Self) -> Result<Value, RelaxedJsonError>,
    ) -> Result<Value, RelaxedJsonError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error(format!(
                "nesting deeper than {MAX_NESTING_DEPTH} levels"
            )));
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn parse_object(&mut self) -> Result<Value, RelaxedJsonError> {
        self.pos += 1; // '{'
        let mut map = Map::new();

        loop {
            self.skip_insignificant()?;
            match self.peek() {
                Some('}') => {
                    self.pos += 1;
                    return Ok(Value::Object(map));
                }
                None => return Err(self.error("unterminated object")),
                _ => {}
            }

            let key = self.parse_key()?;
            self.skip_insignificant()?;
            if self.peek() != Some(':') {
                return Err(self.error(format!("expected ':' after key '{key}'")));
            }
            self.pos += 1;
            self.skip_insignificant()?;
            let value = self.parse_value()?;
            map.insert(key, value);

            self.skip_insignificant()?;
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {}
                Some(c) => return Err(self.error(format!("expected ',' or '}}', found '{c}'"))),
                None => return Err(self.error("unterminated object")),
            }
        }
    }

    fn parse_array(&mut self) -> Result<Value, RelaxedJsonError> {
        self.pos += 1; // '['
        let mut items = Vec::new();

        loop {
            self.skip_insignificant()?;
            match self.peek() {
                Some(']') => {
                    self.pos += 1;
                    return Ok(Value::Array(items));
                }
                None => return Err(self.error("unterminated array")),
                _ => {}
            }

            items.push(self.parse_value()?);

            self.skip_insignificant()?;
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(']') => {}
                Some(c) => return Err(self.error(format!("expected ',' or ']', found '{c}'"))),
                None => return Err(self.error("unterminated array")),
            }
        }
    }

    fn parse_key(&mut self) -> Result<String, RelaxedJsonError> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => self.parse_string(q),
            Some(c) if is_identifier_start(c) || c.is_ascii_digit() => Ok(self.parse_identifier()),
            Some(c) => Err(self.error(format!("expected a property name, found '{c}'"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse_identifier(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_identifier_start(c) || c.is_ascii_digit() || c == '-' || c == '.' {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn parse_string(&mut self, quote: char) -> Result<String, RelaxedJsonError> {
        self.pos += 1; // opening quote
        let mut out = String::new();

        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unterminated string"));
            };
            self.pos += 1;

            if c == quote {
                return Ok(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }

            let Some(escaped) = self.peek() else {
                return Err(self.error("unterminated escape sequence"));
            };
            self.pos += 1;
            match escaped {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'b' => out.push('\u{8}'),
                'f' => out.push('\u{c}'),
                'u' => out.push(self.parse_unicode_escape()?),
                other => out.push(other),
            }
        }
    }

    fn parse_unicode_escape(&mut self) -> Result<char, RelaxedJsonError> {
        let high = self.parse_hex4()?;
        if (0xD800..0xDC00).contains(&high) {
            if self.peek() == Some('\\') && self.peek_at(1) == Some('u') {
                self.pos += 2;
                let low = self.parse_hex4()?;
                if !(0xDC00..0xE000).contains(&low) {
                    return Err(self.error("invalid surrogate pair"));
                }
                let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                return char::from_u32(code).ok_or_else(|| self.error("invalid surrogate pair"));
            }
            return Err(self.error("unpaired surrogate in unicode escape"));
        }
        char::from_u32(high).ok_or_else(|| self.error("invalid unicode escape"))
    }

    fn parse_hex4(&mut self) -> Result<u32, RelaxedJsonError> {
        let end = self.pos + 4;
        if end > self.chars.len() {
            return Err(self.error("truncated unicode escape"));
        }
        let digits = &self.chars[self.pos..end];
        if !digits.iter().all(char::is_ascii_hexdigit) {
            return Err(self.error("invalid unicode escape"));
        }
        let digits: String = digits.iter().collect();
        let value =
            u32::from_str_radix(&digits, 16).map_err(|_| self.error("invalid unicode escape"))?;
        self.pos = end;
        Ok(value)
    }

    fn parse_number(&mut self) -> Result<Value, RelaxedJsonError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let literal = text.strip_prefix('+').unwrap_or(&text);

        if let Ok(int) = literal.parse::<i64>() {
            return Ok(Value::Number(int.into()));
        }
        if let Ok(uint) = literal.parse::<u64>() {
            return Ok(Value::Number(uint.into()));
        }
        literal
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| {
                self.pos = start;
                self.error(format!("invalid number '{text}'"))
            })
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$' || c == '@'
}
