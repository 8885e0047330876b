//! Restricted reader for legacy pickled metadata
//!
//! Early deployments persisted metadata as Python pickles (protocols
//! 0 through 2). A pickle stream can encode instructions that import
//! modules and invoke callables, so a stored payload must never reach a
//! general unpickler. This reader is a small stack machine that accepts
//! only literal node kinds: none, booleans, integers, floats, strings,
//! tuples, lists, and dicts, plus the mark/memo bookkeeping those need.
//! Any opcode that can reconstruct or invoke an object fails with
//! [`PickleError::Unsafe`] before taking effect.
//!
//! The top-level value must be a dict of string keys to string or
//! integer values. Bytes after the terminating STOP are ignored; a
//! hostile payload spliced before the STOP is still caught because the
//! machine scans every opcode up to it.

use onfile_common::types::{MetaValue, Metadata};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PickleError {
    /// The stream contains an opcode capable of importing or invoking code
    #[error("potentially unsafe pickle opcode 0x{0:02x}")]
    Unsafe(u8),

    #[error("malformed pickle: {0}")]
    Malformed(&'static str),
}

impl PickleError {
    /// True when the payload was rejected as unsafe rather than malformed
    #[must_use]
    pub const fn is_unsafe(&self) -> bool {
        matches!(self, Self::Unsafe(_))
    }
}

/// A decoded literal value
#[derive(Clone, Debug, PartialEq)]
enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
}

/// Decode a legacy pickled metadata record.
///
/// Accepts pickle protocols 0 through 2 and returns the record as a
/// [`Metadata`] map. Fails closed on anything that is not a flat
/// mapping of literals.
pub fn loads(data: &[u8]) -> Result<Metadata, PickleError> {
    let value = Machine::new(data).run()?;
    into_metadata(value)
}

fn into_metadata(value: Value) -> Result<Metadata, PickleError> {
    let Value::Dict(pairs) = value else {
        return Err(PickleError::Malformed("top-level value is not a dict"));
    };
    let mut record = Metadata::new();
    for (key, val) in pairs {
        let key = into_string(key).ok_or(PickleError::Malformed("non-string dict key"))?;
        let val = match val {
            Value::Int(n) => MetaValue::Int(n),
            Value::Bool(b) => MetaValue::Int(i64::from(b)),
            other => into_string(other)
                .map(MetaValue::Str)
                .ok_or(PickleError::Malformed("unsupported dict value kind"))?,
        };
        record.insert(key, val);
    }
    Ok(record)
}

fn into_string(value: Value) -> Option<String> {
    match value {
        Value::Str(s) => Some(s),
        Value::Bytes(b) => String::from_utf8(b).ok(),
        _ => None,
    }
}

struct Machine<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<usize, Value>,
}

impl<'a> Machine<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<Value, PickleError> {
        loop {
            let op = self.byte()?;
            match op {
                // protocol bookkeeping
                0x80 => {
                    let version = self.byte()?;
                    if version > 5 {
                        return Err(PickleError::Malformed("unknown protocol version"));
                    }
                }
                0x95 => {
                    // FRAME: length prefix only, no payload semantics
                    self.take(8)?;
                }
                b'.' => {
                    return self
                        .stack
                        .pop()
                        .ok_or(PickleError::Malformed("STOP on empty stack"));
                }

                // mark and plain stack ops
                b'(' => self.marks.push(self.stack.len()),
                b'0' => {
                    self.pop()?;
                }
                b'1' => {
                    self.pop_mark()?;
                }
                b'2' => {
                    let top = self.top()?.clone();
                    self.stack.push(top);
                }

                // scalars
                b'N' => self.stack.push(Value::None),
                0x88 => self.stack.push(Value::Bool(true)),
                0x89 => self.stack.push(Value::Bool(false)),
                b'I' => {
                    let line = self.line()?;
                    let value = match line {
                        b"01" => Value::Bool(true),
                        b"00" => Value::Bool(false),
                        _ => Value::Int(parse_int(line)?),
                    };
                    self.stack.push(value);
                }
                b'J' => {
                    let raw = self.take(4)?;
                    let n = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                    self.stack.push(Value::Int(i64::from(n)));
                }
                b'K' => {
                    let n = self.byte()?;
                    self.stack.push(Value::Int(i64::from(n)));
                }
                b'M' => {
                    let raw = self.take(2)?;
                    let n = u16::from_le_bytes([raw[0], raw[1]]);
                    self.stack.push(Value::Int(i64::from(n)));
                }
                b'L' => {
                    let mut line = self.line()?;
                    if line.last() == Some(&b'L') {
                        line = &line[..line.len() - 1];
                    }
                    let n = parse_int(line)?;
                    self.stack.push(Value::Int(n));
                }
                0x8a => {
                    let len = self.byte()? as usize;
                    let n = self.long_le(len)?;
                    self.stack.push(Value::Int(n));
                }
                0x8b => {
                    let raw = self.take(4)?;
                    let len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
                    let n = self.long_le(len)?;
                    self.stack.push(Value::Int(n));
                }
                b'F' => {
                    let line = self.line()?;
                    let text = std::str::from_utf8(line)
                        .map_err(|_| PickleError::Malformed("non-ascii float"))?;
                    let n: f64 = text
                        .parse()
                        .map_err(|_| PickleError::Malformed("bad float literal"))?;
                    self.stack.push(Value::Float(n));
                }
                b'G' => {
                    let raw = self.take(8)?;
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(raw);
                    self.stack.push(Value::Float(f64::from_be_bytes(bytes)));
                }

                // strings
                b'S' => {
                    let line = self.line()?;
                    self.stack.push(parse_repr_string(line)?);
                }
                b'T' => {
                    let raw = self.take(4)?;
                    let len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
                    let bytes = self.take(len)?.to_vec();
                    self.stack.push(Value::Bytes(bytes));
                }
                b'U' => {
                    let len = self.byte()? as usize;
                    let bytes = self.take(len)?.to_vec();
                    self.stack.push(Value::Bytes(bytes));
                }
                b'V' => {
                    let line = self.line()?.to_vec();
                    self.stack.push(Value::Str(parse_raw_unicode_escape(&line)?));
                }
                b'X' => {
                    let raw = self.take(4)?;
                    let len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
                    let text = String::from_utf8(self.take(len)?.to_vec())
                        .map_err(|_| PickleError::Malformed("invalid utf-8 string"))?;
                    self.stack.push(Value::Str(text));
                }

                // containers
                b')' => self.stack.push(Value::Tuple(Vec::new())),
                b't' => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Tuple(items));
                }
                0x85 => {
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a]));
                }
                0x86 => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a, b]));
                }
                0x87 => {
                    let c = self.pop()?;
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a, b, c]));
                }
                b']' => self.stack.push(Value::List(Vec::new())),
                b'l' => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::List(items));
                }
                b'a' => {
                    let item = self.pop()?;
                    self.top_list()?.push(item);
                }
                b'e' => {
                    let items = self.pop_mark()?;
                    self.top_list()?.extend(items);
                }
                b'}' => self.stack.push(Value::Dict(Vec::new())),
                b'd' => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Dict(pair_up(items)?));
                }
                b's' => {
                    let val = self.pop()?;
                    let key = self.pop()?;
                    self.top_dict()?.push((key, val));
                }
                b'u' => {
                    let items = self.pop_mark()?;
                    let pairs = pair_up(items)?;
                    self.top_dict()?.extend(pairs);
                }

                // memo
                b'p' => {
                    let index = parse_usize(self.line()?)?;
                    self.memo_put(index)?;
                }
                b'q' => {
                    let index = self.byte()? as usize;
                    self.memo_put(index)?;
                }
                b'r' => {
                    let raw = self.take(4)?;
                    let index = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
                    self.memo_put(index)?;
                }
                b'g' => {
                    let index = parse_usize(self.line()?)?;
                    self.memo_get(index)?;
                }
                b'h' => {
                    let index = self.byte()? as usize;
                    self.memo_get(index)?;
                }
                b'j' => {
                    let raw = self.take(4)?;
                    let index = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
                    self.memo_get(index)?;
                }

                // anything that can name, build, or call an object
                b'c' | 0x93 | b'R' | b'b' | b'i' | b'o' | 0x81 | 0x92 | 0x82 | 0x83 | 0x84
                | b'P' | b'Q' => return Err(PickleError::Unsafe(op)),

                _ => return Err(PickleError::Malformed("unrecognized opcode")),
            }
        }
    }

    fn byte(&mut self) -> Result<u8, PickleError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(PickleError::Malformed("truncated stream"))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], PickleError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(PickleError::Malformed("truncated stream"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn line(&mut self) -> Result<&'a [u8], PickleError> {
        let rest = &self.data[self.pos..];
        let newline = rest
            .iter()
            .position(|b| *b == b'\n')
            .ok_or(PickleError::Malformed("unterminated line"))?;
        self.pos += newline + 1;
        Ok(&rest[..newline])
    }

    fn pop(&mut self) -> Result<Value, PickleError> {
        if self.stack.len() <= self.marks.last().copied().unwrap_or(0) {
            return Err(PickleError::Malformed("pop across mark"));
        }
        self.stack
            .pop()
            .ok_or(PickleError::Malformed("pop on empty stack"))
    }

    fn top(&mut self) -> Result<&mut Value, PickleError> {
        self.stack
            .last_mut()
            .ok_or(PickleError::Malformed("empty stack"))
    }

    fn top_list(&mut self) -> Result<&mut Vec<Value>, PickleError> {
        match self.top()? {
            Value::List(items) => Ok(items),
            _ => Err(PickleError::Malformed("expected list on stack")),
        }
    }

    fn top_dict(&mut self) -> Result<&mut Vec<(Value, Value)>, PickleError> {
        match self.top()? {
            Value::Dict(pairs) => Ok(pairs),
            _ => Err(PickleError::Malformed("expected dict on stack")),
        }
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>, PickleError> {
        let mark = self
            .marks
            .pop()
            .ok_or(PickleError::Malformed("no mark on stack"))?;
        Ok(self.stack.split_off(mark))
    }

    fn memo_put(&mut self, index: usize) -> Result<(), PickleError> {
        let top = self.top()?.clone();
        self.memo.insert(index, top);
        Ok(())
    }

    fn memo_get(&mut self, index: usize) -> Result<(), PickleError> {
        let value = self
            .memo
            .get(&index)
            .cloned()
            .ok_or(PickleError::Malformed("memo index out of range"))?;
        self.stack.push(value);
        Ok(())
    }

    fn long_le(&mut self, len: usize) -> Result<i64, PickleError> {
        if len > 8 {
            return Err(PickleError::Malformed("long literal too large"));
        }
        let raw = self.take(len)?;
        if raw.is_empty() {
            return Ok(0);
        }
        let negative = raw[raw.len() - 1] & 0x80 != 0;
        let fill = if negative { 0xff } else { 0x00 };
        let mut bytes = [fill; 8];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(i64::from_le_bytes(bytes))
    }
}

fn pair_up(items: Vec<Value>) -> Result<Vec<(Value, Value)>, PickleError> {
    if items.len() % 2 != 0 {
        return Err(PickleError::Malformed("odd number of dict items"));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(key), Some(val)) = (iter.next(), iter.next()) {
        pairs.push((key, val));
    }
    Ok(pairs)
}

fn parse_int(line: &[u8]) -> Result<i64, PickleError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(PickleError::Malformed("bad integer literal"))
}

fn parse_usize(line: &[u8]) -> Result<usize, PickleError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(PickleError::Malformed("bad memo index"))
}

/// Parse a protocol-0 STRING line: a repr-quoted ascii string
fn parse_repr_string(line: &[u8]) -> Result<Value, PickleError> {
    if line.len() < 2 {
        return Err(PickleError::Malformed("short string literal"));
    }
    let quote = line[0];
    if (quote != b'\'' && quote != b'"') || line[line.len() - 1] != quote {
        return Err(PickleError::Malformed("unquoted string literal"));
    }
    let body = &line[1..line.len() - 1];
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        let b = body[i];
        if b != b'\\' {
            out.push(b);
            i += 1;
            continue;
        }
        let esc = body
            .get(i + 1)
            .ok_or(PickleError::Malformed("dangling escape"))?;
        match esc {
            b'\\' | b'\'' | b'"' => out.push(*esc),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'x' => {
                let hex = body
                    .get(i + 2..i + 4)
                    .ok_or(PickleError::Malformed("short hex escape"))?;
                let text = std::str::from_utf8(hex)
                    .map_err(|_| PickleError::Malformed("bad hex escape"))?;
                let value = u8::from_str_radix(text, 16)
                    .map_err(|_| PickleError::Malformed("bad hex escape"))?;
                out.push(value);
                i += 2;
            }
            _ => return Err(PickleError::Malformed("unknown string escape")),
        }
        i += 2;
    }
    Ok(Value::Bytes(out))
}

/// Parse a protocol-0 UNICODE line: raw-unicode-escape with \uXXXX
fn parse_raw_unicode_escape(line: &[u8]) -> Result<String, PickleError> {
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        if line[i] == b'\\' && line.get(i + 1) == Some(&b'u') {
            let hex = line
                .get(i + 2..i + 6)
                .ok_or(PickleError::Malformed("short unicode escape"))?;
            let text = std::str::from_utf8(hex)
                .map_err(|_| PickleError::Malformed("bad unicode escape"))?;
            let code = u32::from_str_radix(text, 16)
                .map_err(|_| PickleError::Malformed("bad unicode escape"))?;
            out.push(char::from_u32(code).ok_or(PickleError::Malformed("bad unicode escape"))?);
            i += 6;
        } else {
            out.push(char::from(line[i]));
            i += 1;
        }
    }
    Ok(out)
}
