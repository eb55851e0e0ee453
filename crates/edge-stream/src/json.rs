//! Incremental JSON parsers over a [`CharStream`] (spec §4.5).
//!
//! Each parser tracks an explicit state machine and is re-entrant: calling
//! `parse()` any number of times advances deterministically as bytes become
//! available, and calling it again once finished is a no-op. Running out of
//! stream before a terminator is reached is not an error — the parser simply
//! stays in its last state (spec §9: a bare number followed by EOF never
//! finishes, consistent with source behaviour).

use crate::char_stream::CharStream;
use std::fmt;

/// Errors from the JSON value-stream parsers.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonStreamError {
    /// An unexpected byte was encountered where a specific token was
    /// required.
    UnexpectedByte {
        /// The offending byte.
        byte: char,
    },
    /// The first byte routed to a value kind this crate does not parse yet
    /// (`true`/`false`/`null` are reserved for a future bool/null variant).
    Unsupported {
        /// The offending byte.
        byte: char,
    },
    /// The scanned number text failed to parse as a JSON number.
    InvalidNumber {
        /// The text that failed to parse.
        text: String,
    },
    /// A `\` escape inside a string was malformed.
    InvalidEscape {
        /// The text surrounding the bad escape.
        text: String,
    },
}

impl fmt::Display for JsonStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonStreamError::UnexpectedByte { byte } => {
                write!(f, "unexpected byte {byte:?} in JSON stream")
            }
            JsonStreamError::Unsupported { byte } => {
                write!(f, "unsupported JSON value starting with {byte:?}")
            }
            JsonStreamError::InvalidNumber { text } => {
                write!(f, "invalid JSON number: {text:?}")
            }
            JsonStreamError::InvalidEscape { text } => {
                write!(f, "invalid escape sequence near: {text:?}")
            }
        }
    }
}

impl std::error::Error for JsonStreamError {}

impl From<JsonStreamError> for edge_error::OrchestratorError {
    fn from(err: JsonStreamError) -> Self {
        edge_error::OrchestratorError::new(edge_error::ErrorCode::ParseError, err.to_string())
    }
}

/// A polymorphic incremental JSON value parser.
pub trait JsonValueStream: Send {
    /// Advance as far as the currently available bytes allow. Returns
    /// immediately once data is exhausted without a decision or once
    /// already finished.
    fn parse(&mut self, stream: &CharStream) -> Result<(), JsonStreamError>;

    /// True once a terminating token has been consumed.
    fn finished(&self) -> bool;

    /// The fully materialised value, once `finished()`.
    fn to_json(&self) -> Option<serde_json::Value>;
}

/// Peek the next non-whitespace byte and construct the matching parser.
/// Returns `Ok(None)` if no byte is available yet.
pub fn get_value_stream(
    stream: &CharStream,
) -> Result<Option<Box<dyn JsonValueStream>>, JsonStreamError> {
    match stream.pop_ws_and_peek() {
        None => Ok(None),
        Some('"') => Ok(Some(Box::new(JsonStringStream::new()))),
        Some('{') => Ok(Some(Box::new(JsonObjectStream::new()))),
        Some('[') => Ok(Some(Box::new(JsonArrayStream::new()))),
        Some(c) if c == '-' || c.is_ascii_digit() => Ok(Some(Box::new(JsonNumberStream::new()))),
        Some(c @ ('t' | 'f' | 'n')) => Err(JsonStreamError::Unsupported { byte: c }),
        Some(c) => Err(JsonStreamError::UnexpectedByte { byte: c }),
    }
}

// ---------------------------------------------------------------------------
// String
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringState {
    ScanningToOpen,
    ScanningToClose,
    Finished,
}

/// Parses a JSON string, including the surrounding quotes.
pub struct JsonStringStream {
    state: StringState,
    start_idx: usize,
    escaped: bool,
    value: Option<String>,
}

impl JsonStringStream {
    /// Construct a fresh, unstarted string parser.
    pub fn new() -> Self {
        Self {
            state: StringState::ScanningToOpen,
            start_idx: 0,
            escaped: false,
            value: None,
        }
    }

    /// The decoded string, once finished.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

impl Default for JsonStringStream {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonValueStream for JsonStringStream {
    fn parse(&mut self, stream: &CharStream) -> Result<(), JsonStreamError> {
        if self.state == StringState::ScanningToOpen {
            let Some(c) = stream.pop() else { return Ok(()) };
            if c != '"' {
                return Err(JsonStreamError::UnexpectedByte { byte: c });
            }
            self.start_idx = stream.cursor();
            self.state = StringState::ScanningToClose;
        }

        while self.state == StringState::ScanningToClose {
            let Some(c) = stream.peek() else { return Ok(()) };
            if self.escaped {
                self.escaped = false;
                stream.pop();
                continue;
            }
            match c {
                '\\' => {
                    self.escaped = true;
                    stream.pop();
                }
                '"' => {
                    let end = stream.cursor();
                    stream.pop();
                    let raw = stream.get_stream_view(self.start_idx, end);
                    self.value = Some(unescape_json_string(&raw)?);
                    self.state = StringState::Finished;
                }
                _ => {
                    stream.pop();
                }
            }
        }
        Ok(())
    }

    fn finished(&self) -> bool {
        self.state == StringState::Finished
    }

    fn to_json(&self) -> Option<serde_json::Value> {
        self.value.clone().map(serde_json::Value::String)
    }
}

fn unescape_json_string(raw: &str) -> Result<String, JsonStreamError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('b') => out.push('\u{0008}'),
            Some('f') => out.push('\u{000C}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16).map_err(|_| {
                    JsonStreamError::InvalidEscape {
                        text: format!("\\u{hex}"),
                    }
                })?;
                let ch = char::from_u32(code).ok_or_else(|| JsonStreamError::InvalidEscape {
                    text: format!("\\u{hex}"),
                })?;
                out.push(ch);
            }
            _ => {
                return Err(JsonStreamError::InvalidEscape {
                    text: raw.to_string(),
                });
            }
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Number
// ---------------------------------------------------------------------------

/// Parses a bare JSON number, leaving the terminator (`,`/`}`/`]`) in the
/// stream for the parent parser to consume.
pub struct JsonNumberStream {
    start_idx: Option<usize>,
    finished: bool,
    value: Option<f64>,
}

impl JsonNumberStream {
    /// Construct a fresh, unstarted number parser.
    pub fn new() -> Self {
        Self {
            start_idx: None,
            finished: false,
            value: None,
        }
    }

    /// The decoded number, once finished.
    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

impl Default for JsonNumberStream {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonValueStream for JsonNumberStream {
    fn parse(&mut self, stream: &CharStream) -> Result<(), JsonStreamError> {
        if self.finished {
            return Ok(());
        }
        if self.start_idx.is_none() {
            let Some(c) = stream.peek() else { return Ok(()) };
            if c != '-' && !c.is_ascii_digit() {
                return Err(JsonStreamError::UnexpectedByte { byte: c });
            }
            self.start_idx = Some(stream.cursor());
        }
        loop {
            let Some(c) = stream.peek() else { return Ok(()) };
            if matches!(c, ',' | '}' | ']') {
                let end = stream.cursor();
                let text = stream.get_stream_view(self.start_idx.unwrap(), end);
                let value = text
                    .parse::<f64>()
                    .map_err(|_| JsonStreamError::InvalidNumber { text: text.clone() })?;
                self.value = Some(value);
                self.finished = true;
                return Ok(());
            }
            stream.pop();
        }
    }

    fn finished(&self) -> bool {
        self.finished
    }

    fn to_json(&self) -> Option<serde_json::Value> {
        self.value
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
    }
}

// ---------------------------------------------------------------------------
// Array
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayState {
    Start,
    CreateValueStream,
    ParsingValue,
    ParsedValue,
    Finish,
}

/// Parses a JSON array of heterogeneous values.
pub struct JsonArrayStream {
    state: ArrayState,
    elements: Vec<Box<dyn JsonValueStream>>,
    current: Option<Box<dyn JsonValueStream>>,
}

impl JsonArrayStream {
    /// Construct a fresh, unstarted array parser.
    pub fn new() -> Self {
        Self {
            state: ArrayState::Start,
            elements: Vec::new(),
            current: None,
        }
    }

    /// Elements parsed so far (may grow across calls before `finished()`).
    pub fn elements(&self) -> &[Box<dyn JsonValueStream>] {
        &self.elements
    }
}

impl Default for JsonArrayStream {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonValueStream for JsonArrayStream {
    fn parse(&mut self, stream: &CharStream) -> Result<(), JsonStreamError> {
        loop {
            match self.state {
                ArrayState::Start => {
                    let Some(c) = stream.pop_next_non_ws() else { return Ok(()) };
                    if c != '[' {
                        return Err(JsonStreamError::UnexpectedByte { byte: c });
                    }
                    match stream.pop_ws_and_peek() {
                        None => return Ok(()),
                        Some(']') => {
                            stream.pop_next_non_ws();
                            self.state = ArrayState::Finish;
                            return Ok(());
                        }
                        Some(_) => self.state = ArrayState::CreateValueStream,
                    }
                }
                ArrayState::CreateValueStream => match get_value_stream(stream)? {
                    None => return Ok(()),
                    Some(vs) => {
                        self.current = Some(vs);
                        self.state = ArrayState::ParsingValue;
                    }
                },
                ArrayState::ParsingValue => {
                    let vs = self
                        .current
                        .as_mut()
                        .expect("ParsingValue state always holds a value stream");
                    vs.parse(stream)?;
                    if vs.finished() {
                        self.state = ArrayState::ParsedValue;
                    } else {
                        return Ok(());
                    }
                }
                ArrayState::ParsedValue => {
                    let vs = self
                        .current
                        .take()
                        .expect("ParsedValue state always holds a finished value stream");
                    self.elements.push(vs);
                    let Some(c) = stream.pop_next_non_ws() else { return Ok(()) };
                    match c {
                        ',' => self.state = ArrayState::CreateValueStream,
                        ']' => {
                            self.state = ArrayState::Finish;
                            return Ok(());
                        }
                        _ => return Err(JsonStreamError::UnexpectedByte { byte: c }),
                    }
                }
                ArrayState::Finish => return Ok(()),
            }
        }
    }

    fn finished(&self) -> bool {
        self.state == ArrayState::Finish
    }

    fn to_json(&self) -> Option<serde_json::Value> {
        if !self.finished() {
            return None;
        }
        let values: Option<Vec<serde_json::Value>> =
            self.elements.iter().map(|e| e.to_json()).collect();
        values.map(serde_json::Value::Array)
    }
}

// ---------------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectState {
    Start,
    ParsingKey,
    ParsedKey,
    CreateValueStream,
    ParsingValue,
    ParsedValue,
    Finish,
}

/// Parses a JSON object, preserving insertion order.
pub struct JsonObjectStream {
    state: ObjectState,
    entries: Vec<(String, Box<dyn JsonValueStream>)>,
    current_key: Option<JsonStringStream>,
    current_value: Option<Box<dyn JsonValueStream>>,
}

impl JsonObjectStream {
    /// Construct a fresh, unstarted object parser.
    pub fn new() -> Self {
        Self {
            state: ObjectState::Start,
            entries: Vec::new(),
            current_key: None,
            current_value: None,
        }
    }

    /// Look up a key's value stream, if that entry has fully arrived.
    /// Non-blocking: callers that need to wait for a key to appear drive
    /// this from the task pump (see `edge-task`).
    pub fn get(&self, key: &str) -> Option<&dyn JsonValueStream> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_ref())
    }

    /// Keys parsed so far, in arrival order.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }
}

impl Default for JsonObjectStream {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonValueStream for JsonObjectStream {
    fn parse(&mut self, stream: &CharStream) -> Result<(), JsonStreamError> {
        loop {
            match self.state {
                ObjectState::Start => {
                    let Some(c) = stream.pop_next_non_ws() else { return Ok(()) };
                    if c != '{' {
                        return Err(JsonStreamError::UnexpectedByte { byte: c });
                    }
                    match stream.pop_ws_and_peek() {
                        None => return Ok(()),
                        Some('}') => {
                            stream.pop_next_non_ws();
                            self.state = ObjectState::Finish;
                            return Ok(());
                        }
                        Some(_) => self.state = ObjectState::ParsingKey,
                    }
                }
                ObjectState::ParsingKey => {
                    let key_stream = self.current_key.get_or_insert_with(JsonStringStream::new);
                    key_stream.parse(stream)?;
                    if key_stream.finished() {
                        self.state = ObjectState::ParsedKey;
                    } else {
                        return Ok(());
                    }
                }
                ObjectState::ParsedKey => {
                    let Some(c) = stream.pop_next_non_ws() else { return Ok(()) };
                    if c != ':' {
                        return Err(JsonStreamError::UnexpectedByte { byte: c });
                    }
                    self.state = ObjectState::CreateValueStream;
                }
                ObjectState::CreateValueStream => match get_value_stream(stream)? {
                    None => return Ok(()),
                    Some(vs) => {
                        self.current_value = Some(vs);
                        self.state = ObjectState::ParsingValue;
                    }
                },
                ObjectState::ParsingValue => {
                    let vs = self
                        .current_value
                        .as_mut()
                        .expect("ParsingValue state always holds a value stream");
                    vs.parse(stream)?;
                    if vs.finished() {
                        self.state = ObjectState::ParsedValue;
                    } else {
                        return Ok(());
                    }
                }
                ObjectState::ParsedValue => {
                    let key = self
                        .current_key
                        .take()
                        .expect("ParsedValue state always holds a finished key")
                        .value()
                        .expect("finished string stream always has a value")
                        .to_string();
                    let value = self
                        .current_value
                        .take()
                        .expect("ParsedValue state always holds a finished value");
                    self.entries.push((key, value));
                    let Some(c) = stream.pop_next_non_ws() else { return Ok(()) };
                    match c {
                        ',' => self.state = ObjectState::ParsingKey,
                        '}' => {
                            self.state = ObjectState::Finish;
                            return Ok(());
                        }
                        _ => return Err(JsonStreamError::UnexpectedByte { byte: c }),
                    }
                }
                ObjectState::Finish => return Ok(()),
            }
        }
    }

    fn finished(&self) -> bool {
        self.state == ObjectState::Finish
    }

    fn to_json(&self) -> Option<serde_json::Value> {
        if !self.finished() {
            return None;
        }
        let mut map = serde_json::Map::with_capacity(self.entries.len());
        for (k, v) in &self.entries {
            map.insert(k.clone(), v.to_json()?);
        }
        Some(serde_json::Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(stream: &CharStream, s: &str) {
        stream.push(s).unwrap();
    }

    #[test]
    fn string_parses_simple() {
        let stream = CharStream::new();
        feed(&stream, "\"hello\"");
        let mut s = JsonStringStream::new();
        s.parse(&stream).unwrap();
        assert!(s.finished());
        assert_eq!(s.value(), Some("hello"));
    }

    #[test]
    fn string_handles_escapes() {
        let stream = CharStream::new();
        feed(&stream, r#""a\"b\\c\n""#);
        let mut s = JsonStringStream::new();
        s.parse(&stream).unwrap();
        assert_eq!(s.value(), Some("a\"b\\c\n"));
    }

    #[test]
    fn string_stays_unfinished_until_closing_quote_arrives() {
        let stream = CharStream::new();
        feed(&stream, "\"partial");
        let mut s = JsonStringStream::new();
        s.parse(&stream).unwrap();
        assert!(!s.finished());
        feed(&stream, "\"");
        s.parse(&stream).unwrap();
        assert!(s.finished());
        assert_eq!(s.value(), Some("partial"));
    }

    #[test]
    fn number_parses_leaving_terminator() {
        let stream = CharStream::new();
        feed(&stream, "42,");
        let mut n = JsonNumberStream::new();
        n.parse(&stream).unwrap();
        assert!(n.finished());
        assert_eq!(n.value(), Some(42.0));
        assert_eq!(stream.peek(), Some(','));
    }

    #[test]
    fn number_bare_at_eof_stays_unfinished() {
        let stream = CharStream::new();
        feed(&stream, "-");
        stream.close();
        let mut n = JsonNumberStream::new();
        n.parse(&stream).unwrap();
        assert!(!n.finished());
    }

    #[test]
    fn number_invalid_text_is_parse_error() {
        let stream = CharStream::new();
        feed(&stream, "-,");
        let mut n = JsonNumberStream::new();
        let err = n.parse(&stream).unwrap_err();
        assert!(matches!(err, JsonStreamError::InvalidNumber { .. }));
    }

    #[test]
    fn array_parses_mixed_values() {
        let stream = CharStream::new();
        feed(&stream, r#"[1,"two",3]"#);
        let mut a = JsonArrayStream::new();
        a.parse(&stream).unwrap();
        assert!(a.finished());
        assert_eq!(
            a.to_json().unwrap(),
            serde_json::json!([1.0, "two", 3.0])
        );
    }

    #[test]
    fn array_empty() {
        let stream = CharStream::new();
        feed(&stream, "[]");
        let mut a = JsonArrayStream::new();
        a.parse(&stream).unwrap();
        assert!(a.finished());
        assert_eq!(a.to_json().unwrap(), serde_json::json!([]));
    }

    #[test]
    fn object_parses_nested_structure() {
        let stream = CharStream::new();
        feed(&stream, r#"{"a":1,"b":{"c":[2,3]}}"#);
        let mut o = JsonObjectStream::new();
        o.parse(&stream).unwrap();
        assert!(o.finished());
        assert_eq!(
            o.to_json().unwrap(),
            serde_json::json!({"a": 1.0, "b": {"c": [2.0, 3.0]}})
        );
    }

    #[test]
    fn object_parses_flat_structure() {
        let stream = CharStream::new();
        feed(&stream, r#"{"a":1,"b":"two"}"#);
        let mut o = JsonObjectStream::new();
        o.parse(&stream).unwrap();
        assert!(o.finished());
        assert_eq!(
            o.to_json().unwrap(),
            serde_json::json!({"a": 1.0, "b": "two"})
        );
    }

    #[test]
    fn object_empty() {
        let stream = CharStream::new();
        feed(&stream, "{}");
        let mut o = JsonObjectStream::new();
        o.parse(&stream).unwrap();
        assert!(o.finished());
        assert_eq!(o.to_json().unwrap(), serde_json::json!({}));
    }

    #[test]
    fn object_get_resolves_once_key_arrives() {
        let stream = CharStream::new();
        feed(&stream, r#"{"A":"B"}"#);
        let mut o = JsonObjectStream::new();
        o.parse(&stream).unwrap();
        assert!(o.finished());
        let value = o.get("A").unwrap();
        assert_eq!(value.to_json().unwrap(), serde_json::json!("B"));
    }

    #[test]
    fn streamed_object_arrives_incrementally() {
        let stream = CharStream::new();
        let mut o = JsonObjectStream::new();
        feed(&stream, "{\"A\":\"");
        o.parse(&stream).unwrap();
        assert!(!o.finished());
        assert!(o.get("A").is_none());
        feed(&stream, "B");
        o.parse(&stream).unwrap();
        assert!(!o.finished());
        feed(&stream, "\"}");
        o.parse(&stream).unwrap();
        assert!(o.finished());
        assert_eq!(o.get("A").unwrap().to_json().unwrap(), serde_json::json!("B"));
    }

    #[test]
    fn parse_is_idempotent_once_finished() {
        let stream = CharStream::new();
        feed(&stream, r#"{"a":1}"#);
        let mut o = JsonObjectStream::new();
        o.parse(&stream).unwrap();
        assert!(o.finished());
        let before = o.to_json();
        o.parse(&stream).unwrap();
        assert_eq!(o.to_json(), before);
    }

    #[test]
    fn get_value_stream_rejects_reserved_literals() {
        let stream = CharStream::new();
        feed(&stream, "true");
        let err = get_value_stream(&stream).unwrap_err();
        assert!(matches!(err, JsonStreamError::Unsupported { byte: 't' }));
    }
}
