//! RESP2 framing: a pull parser over a byte buffer plus the encoders that
//! produce wire-exact bytes back out. `decode` is the single dispatch point;
//! `FrameReader` wraps it for sockets that deliver partial frames across
//! reads.

use std::io::Read;

use bytes::Bytes;

use crate::error::RedisError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(Bytes),
    SimpleError(Bytes),
    Integer(i64),
    BulkString(Option<Bytes>),
    Array(Vec<RespValue>),
    /// A bulk-string-shaped frame with no trailing CRLF: the RDB payload sent
    /// immediately after a master's `+FULLRESYNC` simple string.
    RdbBulk(Bytes),
}

impl RespValue {
    pub fn bulk(s: impl Into<Vec<u8>>) -> RespValue {
        RespValue::BulkString(Some(Bytes::from(s.into())))
    }

    pub fn simple(s: impl Into<Vec<u8>>) -> RespValue {
        RespValue::SimpleString(Bytes::from(s.into()))
    }

    pub fn error(s: impl Into<Vec<u8>>) -> RespValue {
        RespValue::SimpleError(Bytes::from(s.into()))
    }

    pub fn null_bulk() -> RespValue {
        RespValue::BulkString(None)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                out.push(b'+');
                out.extend_from_slice(s);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::SimpleError(s) => {
                out.push(b'-');
                out.extend_from_slice(s);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                out.push(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::BulkString(None) => out.extend_from_slice(b"$-1\r\n"),
            RespValue::BulkString(Some(b)) => {
                out.push(b'$');
                out.extend_from_slice(b.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(b);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Array(items) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode_into(out);
                }
            }
            RespValue::RdbBulk(b) => {
                out.push(b'$');
                out.extend_from_slice(b.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(b);
            }
        }
    }
}

/// A classified top-level RESP value, as produced by `parse_cmd`.
#[derive(Debug, Clone)]
pub enum Frame {
    Command(Vec<RespValue>),
    FullResync(Bytes),
    RdbSnapshot(Bytes),
    NoOp(Bytes),
}

/// Decode failure distinguishing "need more bytes" from "this is malformed".
/// A live socket reader retries on `Incomplete`; anything else closes the
/// connection, since framing is irrecoverable mid-frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Incomplete,
    Invalid(String),
}

impl From<DecodeError> for RedisError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Incomplete => RedisError::Protocol("unexpected end of input".into()),
            DecodeError::Invalid(msg) => RedisError::Protocol(msg),
        }
    }
}

fn find_crlf(buf: &[u8], start: usize) -> Option<usize> {
    if start >= buf.len() {
        return None;
    }
    buf[start..].windows(2).position(|w| w == b"\r\n").map(|i| start + i)
}

fn read_line(buf: &[u8], start: usize) -> Result<(&[u8], usize), DecodeError> {
    match find_crlf(buf, start) {
        Some(idx) => Ok((&buf[start..idx], idx + 2)),
        None => Err(DecodeError::Incomplete),
    }
}

fn parse_i64(line: &[u8], what: &str) -> Result<i64, DecodeError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| DecodeError::Invalid(format!("invalid {}", what)))
}

/// `decode(buf, pos) -> (value, new_pos)`. Dispatches on the leading byte.
pub fn decode(buf: &[u8], pos: usize) -> Result<(RespValue, usize), DecodeError> {
    if pos >= buf.len() {
        return Err(DecodeError::Incomplete);
    }
    match buf[pos] {
        b'+' => {
            let (line, np) = read_line(buf, pos + 1)?;
            Ok((RespValue::SimpleString(Bytes::copy_from_slice(line)), np))
        }
        b'-' => {
            let (line, np) = read_line(buf, pos + 1)?;
            Ok((RespValue::SimpleError(Bytes::copy_from_slice(line)), np))
        }
        b':' => {
            let (line, np) = read_line(buf, pos + 1)?;
            let n = parse_i64(line, "integer")?;
            Ok((RespValue::Integer(n), np))
        }
        b'$' => {
            let (line, np) = read_line(buf, pos + 1)?;
            let len = parse_i64(line, "bulk length")?;
            if len < 0 {
                return Ok((RespValue::BulkString(None), np));
            }
            let len = len as usize;
            if np + len > buf.len() {
                return Err(DecodeError::Incomplete);
            }
            let data = Bytes::copy_from_slice(&buf[np..np + len]);
            let after = np + len;
            if after + 2 <= buf.len() && &buf[after..after + 2] == b"\r\n" {
                Ok((RespValue::BulkString(Some(data)), after + 2))
            } else if after < buf.len() {
                // Not followed by CRLF: this is the no-trailer RDB bulk frame.
                Ok((RespValue::RdbBulk(data), after))
            } else {
                Err(DecodeError::Incomplete)
            }
        }
        b'*' => {
            let (line, np) = read_line(buf, pos + 1)?;
            let count = parse_i64(line, "array length")?;
            if count < 0 {
                return Ok((RespValue::Array(Vec::new()), np));
            }
            let mut items = Vec::with_capacity(count as usize);
            let mut cur = np;
            for _ in 0..count {
                let (v, next) = decode(buf, cur)?;
                items.push(v);
                cur = next;
            }
            Ok((RespValue::Array(items), cur))
        }
        other => Err(DecodeError::Invalid(format!(
            "invalid lead byte '{}'",
            other as char
        ))),
    }
}

fn classify(value: RespValue, raw: &[u8]) -> Frame {
    match value {
        RespValue::Array(items) => Frame::Command(items),
        RespValue::SimpleString(payload) => Frame::FullResync(payload),
        RespValue::RdbBulk(payload) => Frame::RdbSnapshot(payload),
        _ => Frame::NoOp(Bytes::copy_from_slice(raw)),
    }
}

/// Repeatedly decode a buffer assumed to hold only complete frames.
pub fn parse_cmd(bytes: &[u8]) -> Result<Vec<Frame>, RedisError> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let (value, next) = decode(bytes, pos)?;
        frames.push(classify(value, &bytes[pos..next]));
        pos = next;
    }
    Ok(frames)
}

/// Pulls one frame at a time off a blocking `Read`, buffering partial reads.
/// Returns the frame plus the exact byte length of its raw encoding (used by
/// the replica to track `master_repl_offset`).
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
    pos: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        FrameReader {
            reader,
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Access to the underlying reader for out-of-band writes (e.g. sending
    /// handshake commands on the same socket this struct reads replies
    /// from).
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Returns `Ok(None)` on clean EOF with no partial frame pending.
    pub fn next_frame(&mut self) -> Result<Option<(Frame, usize)>, RedisError> {
        let mut chunk = [0u8; 4096];
        loop {
            match decode(&self.buf, self.pos) {
                Ok((value, next)) => {
                    let raw_len = next - self.pos;
                    let frame = classify(value, &self.buf[self.pos..next]);
                    self.pos = next;
                    if self.pos == self.buf.len() {
                        self.buf.clear();
                        self.pos = 0;
                    } else if self.pos > 4096 {
                        self.buf.drain(0..self.pos);
                        self.pos = 0;
                    }
                    return Ok(Some((frame, raw_len)));
                }
                Err(DecodeError::Invalid(msg)) => return Err(RedisError::Protocol(msg)),
                Err(DecodeError::Incomplete) => {
                    let n = self.reader.read(&mut chunk)?;
                    if n == 0 {
                        return Ok(None);
                    }
                    self.buf.extend_from_slice(&chunk[..n]);
                }
            }
        }
    }

    /// Reads a `$<len>\r\n<bytes>` frame with no trailing CRLF directly,
    /// bypassing the bulk/rdb-bulk disambiguation in `decode` — used once,
    /// right after a replica sees `+FULLRESYNC`, where the frame boundary is
    /// known unambiguously from context.
    pub fn read_rdb_bulk(&mut self) -> Result<Bytes, RedisError> {
        loop {
            if let Some(idx) = find_crlf(&self.buf, self.pos) {
                if self.buf.get(self.pos) == Some(&b'$') {
                    let len: usize = std::str::from_utf8(&self.buf[self.pos + 1..idx])
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| RedisError::Protocol("invalid rdb bulk length".into()))?;
                    let start = idx + 2;
                    let end = start + len;
                    if end <= self.buf.len() {
                        let data = Bytes::copy_from_slice(&self.buf[start..end]);
                        self.pos = end;
                        if self.pos == self.buf.len() {
                            self.buf.clear();
                            self.pos = 0;
                        }
                        return Ok(data);
                    }
                } else {
                    return Err(RedisError::Protocol("expected rdb bulk frame".into()));
                }
            }
            let mut chunk = [0u8; 4096];
            let n = self.reader.read(&mut chunk)?;
            if n == 0 {
                return Err(RedisError::Protocol("eof before rdb payload".into()));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}
