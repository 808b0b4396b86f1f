//! A push-style streaming JSON emitter.
//!
//! Dumps routinely exceed RAM, so nothing is buffered into a tree: every
//! call writes through immediately. A small container stack keeps the
//! key/value/array discipline honest; calling out of order is a programmer
//! error and panics. Scalar encoding (string escaping, number formatting)
//! is delegated to `serde_json`.

use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

enum Frame {
    Object { first: bool, expect_value: bool },
    Array { first: bool },
}

/// A streaming JSON writer over any [`Write`] sink.
pub struct JsonWriter<W: Write> {
    out: W,
    stack: Vec<Frame>,
}

impl<W: Write> JsonWriter<W> {
    /// Wrap a sink.
    pub fn new(out: W) -> Self {
        JsonWriter {
            out,
            stack: Vec::new(),
        }
    }

    /// Unwrap the sink.
    pub fn into_inner(self) -> W {
        assert!(self.stack.is_empty(), "structured writer: unbalanced containers");
        self.out
    }

    /// Direct access to the sink, for raw trailing output.
    pub fn out_mut(&mut self) -> &mut W {
        &mut self.out
    }

    fn before_value(&mut self) -> io::Result<()> {
        match self.stack.last_mut() {
            Some(Frame::Object { expect_value, .. }) => {
                assert!(*expect_value, "structured writer: value without a key");
                *expect_value = false;
                Ok(())
            }
            Some(Frame::Array { first }) => {
                if *first {
                    *first = false;
                    Ok(())
                } else {
                    self.out.write_all(b",")
                }
            }
            None => Ok(()),
        }
    }

    fn scalar<T: Serialize>(&mut self, v: &T) -> io::Result<()> {
        self.before_value()?;
        serde_json::to_writer(&mut self.out, v).map_err(io::Error::other)
    }

    /// Emit `null`.
    pub fn null(&mut self) -> io::Result<()> {
        self.scalar(&())
    }

    /// Emit a boolean.
    pub fn bool(&mut self, v: bool) -> io::Result<()> {
        self.scalar(&v)
    }

    /// Emit a signed integer.
    pub fn int64(&mut self, v: i64) -> io::Result<()> {
        self.scalar(&v)
    }

    /// Emit an unsigned integer.
    pub fn uint64(&mut self, v: u64) -> io::Result<()> {
        self.scalar(&v)
    }

    /// Emit a finite double. Non-finite values have no JSON form; callers
    /// map them to strings first.
    pub fn double(&mut self, v: f64) -> io::Result<()> {
        assert!(v.is_finite(), "structured writer: non-finite double");
        self.scalar(&v)
    }

    /// Emit a string.
    pub fn string(&mut self, v: &str) -> io::Result<()> {
        self.scalar(&v)
    }

    /// Emit an object key.
    pub fn key(&mut self, k: &str) -> io::Result<()> {
        match self.stack.last_mut() {
            Some(Frame::Object { first, expect_value }) => {
                assert!(!*expect_value, "structured writer: key in value position");
                if *first {
                    *first = false;
                } else {
                    self.out.write_all(b",")?;
                }
                *expect_value = true;
            }
            _ => panic!("structured writer: key outside an object"),
        }
        serde_json::to_writer(&mut self.out, k).map_err(io::Error::other)?;
        self.out.write_all(b":")
    }

    /// Open an object.
    pub fn start_object(&mut self) -> io::Result<()> {
        self.before_value()?;
        self.stack.push(Frame::Object {
            first: true,
            expect_value: false,
        });
        self.out.write_all(b"{")
    }

    /// Close the current object.
    pub fn end_object(&mut self) -> io::Result<()> {
        match self.stack.pop() {
            Some(Frame::Object { expect_value, .. }) => {
                assert!(!expect_value, "structured writer: dangling key");
            }
            _ => panic!("structured writer: end_object outside an object"),
        }
        self.out.write_all(b"}")
    }

    /// Open an array.
    pub fn start_array(&mut self) -> io::Result<()> {
        self.before_value()?;
        self.stack.push(Frame::Array { first: true });
        self.out.write_all(b"[")
    }

    /// Close the current array.
    pub fn end_array(&mut self) -> io::Result<()> {
        match self.stack.pop() {
            Some(Frame::Array { .. }) => {}
            _ => panic!("structured writer: end_array outside an array"),
        }
        self.out.write_all(b"]")
    }

    /// Open the whole-tool root: `{"sstables":{`.
    pub fn start_stream(&mut self) -> io::Result<()> {
        self.start_object()?;
        self.key("sstables")?;
        self.start_object()
    }

    /// Close the whole-tool root.
    pub fn end_stream(&mut self) -> io::Result<()> {
        self.end_object()?;
        self.end_object()
    }

    /// Emit the per-sstable key: its path, or `"anonymous"` for a merged
    /// stream.
    pub fn sstable_key(&mut self, sst: Option<&Path>) -> io::Result<()> {
        match sst {
            Some(path) => self.key(&path.display().to_string()),
            None => self.key("anonymous"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(f: impl FnOnce(&mut JsonWriter<&mut Vec<u8>>)) -> String {
        let mut buf = Vec::new();
        let mut w = JsonWriter::new(&mut buf);
        f(&mut w);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn nested_containers_balance_commas() {
        let out = capture(|w| {
            w.start_object().unwrap();
            w.key("a").unwrap();
            w.start_array().unwrap();
            w.int64(1).unwrap();
            w.int64(-2).unwrap();
            w.end_array().unwrap();
            w.key("b").unwrap();
            w.string("x\"y").unwrap();
            w.end_object().unwrap();
        });
        assert_eq!(out, r#"{"a":[1,-2],"b":"x\"y"}"#);
    }

    #[test]
    fn stream_wrapper_shape() {
        let out = capture(|w| {
            w.start_stream().unwrap();
            w.sstable_key(None).unwrap();
            w.start_array().unwrap();
            w.end_array().unwrap();
            w.end_stream().unwrap();
        });
        assert_eq!(out, r#"{"sstables":{"anonymous":[]}}"#);
    }

    #[test]
    #[should_panic(expected = "value without a key")]
    fn value_in_key_position_panics() {
        let mut buf = Vec::new();
        let mut w = JsonWriter::new(&mut buf);
        w.start_object().unwrap();
        let _ = w.int64(1);
    }
}
