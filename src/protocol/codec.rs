//! Primitive wire value encoding.
//!
//! Every request argument and response field is built from a handful of primitives:
//!
//! - boolean: one byte, `0` or `1`.
//! - integer: zig-zag folded, then written as an unsigned base-128 varint, least
//!   significant group first. At most [`MAX_VARINT_LEN`] bytes.
//! - string: varint byte count followed by one byte per character (Latin-1).
//! - buffer: same framing as a string, opaque payload.
//! - packed value: a buffer whose bytes were produced by an external value packer.
//! - list: varint element count followed by the elements.
//!
//! Decoding goes through the [`Reader`] trait so the same code reads from an in-memory
//! slice ([`SliceReader`]) or straight from a connection's
//! [`ProtocolTransport`](super::ProtocolTransport).
use std::io;

use thiserror::Error;

/// Longest possible encoding of a 64-bit value.
pub const MAX_VARINT_LEN: usize = 10;

/// Upper bound for a decoded string/buffer length or list count.
pub const MAX_LENGTH: usize = 1 << 24;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("truncated message, {needed} more bytes expected")]
    Truncated { needed: usize },
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),
    #[error("variable length integer overflows 64 bits")]
    VarintOverflow,
    #[error("invalid length {0}")]
    InvalidLength(i64),
    #[error("invalid {what} value {value}")]
    InvalidValue { what: &'static str, value: i64 },
    #[error("codec io error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Errors caused by the byte channel rather than by a malformed value. A
    /// connection cannot recover from these.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CodecError::Truncated { .. } | CodecError::Io(_))
    }
}

pub fn zigzag(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

pub fn unzigzag(u: u64) -> i64 {
    ((u >> 1) as i64) ^ -((u & 1) as i64)
}

/// Strings travel one byte per character.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Source of wire bytes.
pub trait Reader {
    /// Consumes the next `n` bytes. The returned slice is only valid until the next
    /// read; callers that need the bytes longer must copy them.
    fn take(&mut self, n: usize) -> Result<&[u8], CodecError>;

    fn get_byte(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn get_bool(&mut self) -> Result<bool, CodecError> {
        match self.get_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(CodecError::InvalidBool(b)),
        }
    }

    fn get_uint(&mut self) -> Result<u64, CodecError> {
        let mut value = 0_u64;
        let mut shift = 0;
        loop {
            let b = self.get_byte()?;
            // The tenth group only has room for the top bit.
            if shift == 63 && b > 1 {
                return Err(CodecError::VarintOverflow);
            }
            value |= u64::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn get_int(&mut self) -> Result<i64, CodecError> {
        Ok(unzigzag(self.get_uint()?))
    }

    /// 32-bit values travel as 64-bit values and are truncated on the way in.
    fn get_i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.get_int()? as i32)
    }

    fn get_len(&mut self) -> Result<usize, CodecError> {
        let n = self.get_int()?;
        match usize::try_from(n) {
            Ok(len) if len <= MAX_LENGTH => Ok(len),
            _ => Err(CodecError::InvalidLength(n)),
        }
    }

    /// Borrowed view of a length-prefixed buffer.
    fn get_buf_ref(&mut self) -> Result<&[u8], CodecError> {
        let n = self.get_len()?;
        self.take(n)
    }

    fn get_buf(&mut self) -> Result<Vec<u8>, CodecError> {
        Ok(self.get_buf_ref()?.to_vec())
    }

    fn get_str(&mut self) -> Result<String, CodecError> {
        Ok(latin1(self.get_buf_ref()?))
    }

    fn get_packed(&mut self) -> Result<Vec<u8>, CodecError> {
        self.get_buf()
    }

    fn get_strs(&mut self) -> Result<Vec<String>, CodecError> {
        let n = self.get_len()?;
        (0..n).map(|_| self.get_str()).collect()
    }

    fn get_ints(&mut self) -> Result<Vec<i64>, CodecError> {
        let n = self.get_len()?;
        (0..n).map(|_| self.get_int()).collect()
    }

    fn get_str_lists(&mut self) -> Result<Vec<Vec<String>>, CodecError> {
        let n = self.get_len()?;
        (0..n).map(|_| self.get_strs()).collect()
    }
}

/// Reads wire values out of a byte slice.
#[derive(Debug)]
pub struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

impl Reader for SliceReader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], CodecError> {
        let available = self.remaining();
        if available < n {
            return Err(CodecError::Truncated {
                needed: n - available,
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..start + n])
    }
}

/// Accumulates encoded wire values.
#[derive(Debug, Default, Clone)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn put_byte(&mut self, b: u8) {
        self.buf.push(b);
    }

    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_bool(&mut self, b: bool) {
        self.buf.push(u8::from(b));
    }

    pub fn put_uint(&mut self, mut u: u64) {
        while u >= 0x80 {
            self.buf.push((u as u8) | 0x80);
            u >>= 7;
        }
        self.buf.push(u as u8);
    }

    pub fn put_int(&mut self, n: i64) {
        self.put_uint(zigzag(n));
    }

    pub fn put_buf(&mut self, bytes: &[u8]) {
        self.put_int(bytes.len() as i64);
        self.buf.extend_from_slice(bytes);
    }

    /// Characters outside Latin-1 cannot be represented and are sent as `?`.
    pub fn put_str(&mut self, s: &str) {
        let n = s.chars().count();
        self.put_int(n as i64);
        self.buf.extend(s.chars().map(|c| u8::try_from(c).unwrap_or(b'?')));
    }

    pub fn put_packed(&mut self, packed: &[u8]) {
        self.put_buf(packed);
    }

    pub fn put_strs<S: AsRef<str>>(&mut self, list: &[S]) {
        self.put_int(list.len() as i64);
        for s in list {
            self.put_str(s.as_ref());
        }
    }

    pub fn put_ints(&mut self, list: &[i64]) {
        self.put_int(list.len() as i64);
        for n in list {
            self.put_int(*n);
        }
    }

    pub fn put_str_lists<S: AsRef<str>>(&mut self, lists: &[Vec<S>]) {
        self.put_int(lists.len() as i64);
        for list in lists {
            self.put_strs(list);
        }
    }
}
