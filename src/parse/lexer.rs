//! A pull-based JSON tokenizer over a buffered async byte stream.
//!
//! Produces the fixed event alphabet consumed by the stream handler, with
//! line/column tracking for error reports. The tokenizer enforces the JSON
//! container grammar (comma/colon placement, one root value) so the handler
//! only ever deals with well-shaped event sequences. Numbers are classified
//! into signed/unsigned integers and doubles; any other raw numeric form is
//! rejected.

use tokio::io::{AsyncRead, AsyncReadExt};

use super::ParseError;

/// One lexical event.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum JsonEvent {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// An integer fitting i64.
    Int(i64),
    /// A non-negative integer exceeding i64.
    Uint(u64),
    /// A fractional or exponential number.
    Double(f64),
    /// A string in value position.
    Str(String),
    /// A string in key position.
    Key(String),
    /// `{`
    StartObject,
    /// `}`
    EndObject,
    /// `[`
    StartArray,
    /// `]`
    EndArray,
}

impl JsonEvent {
    /// The event name used in diagnostics.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            JsonEvent::Null => "null",
            JsonEvent::Bool(_) => "bool",
            JsonEvent::Int(_) => "int",
            JsonEvent::Uint(_) => "uint",
            JsonEvent::Double(_) => "double",
            JsonEvent::Str(_) => "string",
            JsonEvent::Key(_) => "key",
            JsonEvent::StartObject => "start_object",
            JsonEvent::EndObject => "end_object",
            JsonEvent::StartArray => "start_array",
            JsonEvent::EndArray => "end_array",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Ctx {
    /// In an object, before the first key or `}`.
    ObjectFirstKey,
    /// In an object, before a key.
    ObjectKey,
    /// In an object, before a value.
    ObjectValue,
    /// In an object, after a value.
    ObjectNext,
    /// In an array, before the first value or `]`.
    ArrayFirstValue,
    /// In an array, after a value.
    ArrayNext,
}

const READ_CHUNK: usize = 8 * 1024;

/// The tokenizer.
pub(crate) struct Lexer<R> {
    input: R,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
    line: u64,
    column: u64,
    token_line: u64,
    token_column: u64,
    ctx: Vec<Ctx>,
    root_done: bool,
}

impl<R: AsyncRead + Unpin> Lexer<R> {
    pub(crate) fn new(input: R) -> Self {
        Lexer {
            input,
            buf: Vec::new(),
            pos: 0,
            eof: false,
            line: 1,
            column: 1,
            token_line: 1,
            token_column: 1,
            ctx: Vec::new(),
            root_done: false,
        }
    }

    /// Line of the token currently being reported.
    pub(crate) fn token_line(&self) -> u64 {
        self.token_line
    }

    /// Column of the token currently being reported.
    pub(crate) fn token_column(&self) -> u64 {
        self.token_column
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            line: self.line,
            column: self.column,
            state: "lexer".into(),
            message: message.into(),
        }
    }

    async fn peek_byte(&mut self) -> Result<Option<u8>, ParseError> {
        while self.pos >= self.buf.len() {
            if self.eof {
                return Ok(None);
            }
            self.buf.clear();
            self.pos = 0;
            let mut chunk = vec![0u8; READ_CHUNK];
            let n = self
                .input
                .read(&mut chunk)
                .await
                .map_err(|e| self.error(format!("read error: {e}")))?;
            if n == 0 {
                self.eof = true;
            } else {
                chunk.truncate(n);
                self.buf = chunk;
            }
        }
        Ok(Some(self.buf[self.pos]))
    }

    async fn take_byte(&mut self) -> Result<Option<u8>, ParseError> {
        let b = self.peek_byte().await?;
        if let Some(b) = b {
            self.pos += 1;
            if b == b'\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        Ok(b)
    }

    async fn skip_whitespace(&mut self) -> Result<(), ParseError> {
        while let Some(b) = self.peek_byte().await? {
            if matches!(b, b' ' | b'\t' | b'\n' | b'\r') {
                self.take_byte().await?;
            } else {
                break;
            }
        }
        Ok(())
    }

    async fn expect_byte(&mut self, expected: u8) -> Result<(), ParseError> {
        match self.take_byte().await? {
            Some(b) if b == expected => Ok(()),
            Some(b) => Err(self.error(format!(
                "expected {:?}, found {:?}",
                expected as char, b as char
            ))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    async fn expect_literal(&mut self, rest: &[u8]) -> Result<(), ParseError> {
        for &expected in rest {
            self.expect_byte(expected).await?;
        }
        Ok(())
    }

    /// The next event, or `None` after the root value and clean EOF.
    pub(crate) async fn next(&mut self) -> Result<Option<JsonEvent>, ParseError> {
        self.skip_whitespace().await?;
        self.token_line = self.line;
        self.token_column = self.column;
        if self.ctx.is_empty() {
            if self.root_done {
                return match self.peek_byte().await? {
                    None => Ok(None),
                    Some(b) => Err(self.error(format!(
                        "trailing characters after the root value: {:?}",
                        b as char
                    ))),
                };
            }
            let ev = self.lex_value().await?;
            if self.ctx.is_empty() {
                self.root_done = true;
            }
            return Ok(Some(ev));
        }
        match *self.ctx.last().unwrap() {
            Ctx::ObjectFirstKey => match self.peek_byte().await? {
                Some(b'}') => {
                    self.take_byte().await?;
                    self.close_container();
                    Ok(Some(JsonEvent::EndObject))
                }
                _ => self.lex_key().await.map(Some),
            },
            Ctx::ObjectKey => self.lex_key().await.map(Some),
            Ctx::ObjectValue => {
                *self.ctx.last_mut().unwrap() = Ctx::ObjectNext;
                self.lex_value().await.map(Some)
            }
            Ctx::ObjectNext => match self.take_byte().await? {
                Some(b',') => {
                    *self.ctx.last_mut().unwrap() = Ctx::ObjectKey;
                    self.skip_whitespace().await?;
                    self.token_line = self.line;
                    self.token_column = self.column;
                    self.lex_key().await.map(Some)
                }
                Some(b'}') => {
                    self.close_container();
                    Ok(Some(JsonEvent::EndObject))
                }
                Some(b) => Err(self.error(format!("expected ',' or '}}', found {:?}", b as char))),
                None => Err(self.error("unexpected end of input")),
            },
            Ctx::ArrayFirstValue => match self.peek_byte().await? {
                Some(b']') => {
                    self.take_byte().await?;
                    self.close_container();
                    Ok(Some(JsonEvent::EndArray))
                }
                _ => {
                    *self.ctx.last_mut().unwrap() = Ctx::ArrayNext;
                    self.lex_value().await.map(Some)
                }
            },
            Ctx::ArrayNext => match self.take_byte().await? {
                Some(b',') => {
                    self.skip_whitespace().await?;
                    self.token_line = self.line;
                    self.token_column = self.column;
                    self.lex_value().await.map(Some)
                }
                Some(b']') => {
                    self.close_container();
                    Ok(Some(JsonEvent::EndArray))
                }
                Some(b) => Err(self.error(format!("expected ',' or ']', found {:?}", b as char))),
                None => Err(self.error("unexpected end of input")),
            },
        }
    }

    fn close_container(&mut self) {
        self.ctx.pop();
        if self.ctx.is_empty() {
            self.root_done = true;
        }
    }

    async fn lex_key(&mut self) -> Result<JsonEvent, ParseError> {
        match self.peek_byte().await? {
            Some(b'"') => {}
            Some(b) => return Err(self.error(format!("expected a key, found {:?}", b as char))),
            None => return Err(self.error("unexpected end of input")),
        }
        let key = self.lex_string().await?;
        self.skip_whitespace().await?;
        self.expect_byte(b':').await?;
        *self.ctx.last_mut().unwrap() = Ctx::ObjectValue;
        Ok(JsonEvent::Key(key))
    }

    async fn lex_value(&mut self) -> Result<JsonEvent, ParseError> {
        match self.peek_byte().await? {
            Some(b'{') => {
                self.take_byte().await?;
                self.ctx.push(Ctx::ObjectFirstKey);
                Ok(JsonEvent::StartObject)
            }
            Some(b'[') => {
                self.take_byte().await?;
                self.ctx.push(Ctx::ArrayFirstValue);
                Ok(JsonEvent::StartArray)
            }
            Some(b'"') => Ok(JsonEvent::Str(self.lex_string().await?)),
            Some(b't') => {
                self.expect_literal(b"true").await?;
                Ok(JsonEvent::Bool(true))
            }
            Some(b'f') => {
                self.expect_literal(b"false").await?;
                Ok(JsonEvent::Bool(false))
            }
            Some(b'n') => {
                self.expect_literal(b"null").await?;
                Ok(JsonEvent::Null)
            }
            Some(b'-') | Some(b'0'..=b'9') => self.lex_number().await,
            Some(b) => Err(self.error(format!("unexpected character {:?}", b as char))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    async fn lex_number(&mut self) -> Result<JsonEvent, ParseError> {
        let mut text = String::new();
        let mut fractional = false;
        if self.peek_byte().await? == Some(b'-') {
            text.push('-');
            self.take_byte().await?;
        }
        let mut digits = 0usize;
        while let Some(b) = self.peek_byte().await? {
            match b {
                b'0'..=b'9' => {
                    text.push(b as char);
                    digits += 1;
                    self.take_byte().await?;
                }
                b'.' | b'e' | b'E' | b'+' | b'-' => {
                    fractional = true;
                    text.push(b as char);
                    self.take_byte().await?;
                }
                _ => break,
            }
        }
        if digits == 0 {
            return Err(self.error("malformed number"));
        }
        if fractional {
            return text
                .parse::<f64>()
                .map(JsonEvent::Double)
                .map_err(|_| self.error(format!("malformed number {text:?}")));
        }
        if let Ok(v) = text.parse::<i64>() {
            return Ok(JsonEvent::Int(v));
        }
        text.parse::<u64>()
            .map(JsonEvent::Uint)
            .map_err(|_| self.error(format!("number out of range: {text}")))
    }

    async fn lex_string(&mut self) -> Result<String, ParseError> {
        self.expect_byte(b'"').await?;
        let mut out: Vec<u8> = Vec::new();
        loop {
            let Some(b) = self.take_byte().await? else {
                return Err(self.error("unterminated string"));
            };
            match b {
                b'"' => break,
                b'\\' => {
                    let Some(esc) = self.take_byte().await? else {
                        return Err(self.error("unterminated string escape"));
                    };
                    match esc {
                        b'"' => out.push(b'"'),
                        b'\\' => out.push(b'\\'),
                        b'/' => out.push(b'/'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'u' => {
                            let c = self.lex_unicode_escape().await?;
                            let mut utf8 = [0u8; 4];
                            out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
                        }
                        other => {
                            return Err(self.error(format!(
                                "invalid string escape \\{}",
                                other as char
                            )))
                        }
                    }
                }
                0x00..=0x1f => {
                    return Err(self.error("unescaped control character in string"));
                }
                other => out.push(other),
            }
        }
        String::from_utf8(out).map_err(|_| self.error("string is not valid utf-8"))
    }

    async fn lex_hex4(&mut self) -> Result<u32, ParseError> {
        let mut v = 0u32;
        for _ in 0..4 {
            let Some(b) = self.take_byte().await? else {
                return Err(self.error("unterminated unicode escape"));
            };
            let digit = (b as char)
                .to_digit(16)
                .ok_or_else(|| self.error("invalid unicode escape"))?;
            v = (v << 4) | digit;
        }
        Ok(v)
    }

    async fn lex_unicode_escape(&mut self) -> Result<char, ParseError> {
        let first = self.lex_hex4().await?;
        if (0xd800..=0xdbff).contains(&first) {
            // High surrogate; a low surrogate must follow.
            self.expect_byte(b'\\').await?;
            self.expect_byte(b'u').await?;
            let second = self.lex_hex4().await?;
            if !(0xdc00..=0xdfff).contains(&second) {
                return Err(self.error("unpaired surrogate in unicode escape"));
            }
            let c = 0x10000 + ((first - 0xd800) << 10) + (second - 0xdc00);
            return char::from_u32(c).ok_or_else(|| self.error("invalid unicode escape"));
        }
        if (0xdc00..=0xdfff).contains(&first) {
            return Err(self.error("unpaired surrogate in unicode escape"));
        }
        char::from_u32(first).ok_or_else(|| self.error("invalid unicode escape"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn lex_all(input: &str) -> Result<Vec<JsonEvent>, ParseError> {
        let mut lexer = Lexer::new(input.as_bytes());
        let mut events = Vec::new();
        while let Some(ev) = lexer.next().await? {
            events.push(ev);
        }
        Ok(events)
    }

    #[tokio::test]
    async fn events_for_a_small_document() {
        let events = lex_all(r#"{"a": [1, -2, 2.5, "x\n"], "b": null}"#).await.unwrap();
        assert_eq!(
            events,
            vec![
                JsonEvent::StartObject,
                JsonEvent::Key("a".into()),
                JsonEvent::StartArray,
                JsonEvent::Int(1),
                JsonEvent::Int(-2),
                JsonEvent::Double(2.5),
                JsonEvent::Str("x\n".into()),
                JsonEvent::EndArray,
                JsonEvent::Key("b".into()),
                JsonEvent::Null,
                JsonEvent::EndObject,
            ]
        );
    }

    #[tokio::test]
    async fn large_unsigned_values_become_uint() {
        let events = lex_all("[18446744073709551615]").await.unwrap();
        assert_eq!(
            events,
            vec![
                JsonEvent::StartArray,
                JsonEvent::Uint(u64::MAX),
                JsonEvent::EndArray
            ]
        );
    }

    #[tokio::test]
    async fn unicode_escapes_decode() {
        // A surrogate pair, a BMP escape, and raw multibyte passthrough.
        let events = lex_all(r#"["A\ud83d\ude00 \u00e9 é"]"#).await.unwrap();
        assert_eq!(
            events,
            vec![
                JsonEvent::StartArray,
                JsonEvent::Str("A\u{1f600} \u{e9} \u{e9}".into()),
                JsonEvent::EndArray
            ]
        );
    }

    #[tokio::test]
    async fn errors_carry_line_and_column() {
        let err = lex_all("[1,\n 2,\n x]").await.unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.column, 2);
    }

    #[tokio::test]
    async fn trailing_garbage_is_rejected() {
        let err = lex_all("[] true").await.unwrap_err();
        assert!(err.message.contains("trailing characters"), "{err}");
    }

    #[tokio::test]
    async fn missing_comma_is_rejected() {
        assert!(lex_all(r#"{"a":1 "b":2}"#).await.is_err());
    }
}
