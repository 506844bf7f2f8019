//! RDB snapshot reader, used both to seed the store at boot and to produce
//! the bulk payload a master sends after `+FULLRESYNC`. Decodes owned
//! entries via `Result` rather than panicking on a short or malformed
//! read, and handles the resize-hint and bare-opcode-as-value-type
//! records alongside the expiry/aux/selectdb opcodes.

use base64::engine::general_purpose;
use base64::Engine;
use bytes::Bytes;

use crate::error::RedisError;

const OP_EOF: u8 = 0xFF;
const OP_SELECTDB: u8 = 0xFE;
const OP_EXPIRE_SEC: u8 = 0xFD;
const OP_EXPIRE_MS: u8 = 0xFC;
const OP_RESIZEDB: u8 = 0xFB;
const OP_AUX: u8 = 0xFA;

const VALUE_STRING: u8 = 0x00;

/// A minimal valid empty RDB image, embedded so the server can boot or
/// answer PSYNC even when no snapshot file is configured.
const EMPTY_RDB_BASE64: &str =
    "UkVESVMwMDEx+glyZWRpcy12ZXIFNy4yLjD6CnJlZGlzLWJpdHPAQPoFY3RpbWXCbQi8ZfoIdXNlZC1tZW3CsMQQAPoIYW9mLWJhc2XAAP/wbjv+wP9aog==";

pub fn empty_rdb() -> Bytes {
    Bytes::from(
        general_purpose::STANDARD
            .decode(EMPTY_RDB_BASE64)
            .expect("embedded empty RDB is valid base64"),
    )
}

/// One decoded key, ready to seed the store. `expires_at_ms` is an absolute
/// epoch-millisecond timestamp, or `None` for keys with no TTL.
pub struct RdbEntry {
    pub key: String,
    pub value: Bytes,
    pub expires_at_ms: Option<u64>,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn byte(&mut self) -> Result<u8, RedisError> {
        let b = *self.buf.get(self.pos).ok_or_else(eof)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RedisError> {
        let end = self.pos.checked_add(n).ok_or_else(eof)?;
        let slice = self.buf.get(self.pos..end).ok_or_else(eof)?;
        self.pos = end;
        Ok(slice)
    }

    fn u32_le(&mut self) -> Result<u32, RedisError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u32_be(&mut self) -> Result<u32, RedisError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64_le(&mut self) -> Result<u64, RedisError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Returns either a byte count (tags `00`/`01`/`10`) or, for tag `11`,
    /// the decimal-ASCII rendering of an encoded integer — callers that
    /// treat this length-prefixed value as a string get the integer's
    /// digits, not its raw bytes.
    fn length_or_int_string(&mut self) -> Result<Length, RedisError> {
        let first = self.byte()?;
        match first >> 6 {
            0b00 => Ok(Length::Count((first & 0x3F) as usize)),
            0b01 => {
                let second = self.byte()?;
                Ok(Length::Count((((first & 0x3F) as usize) << 8) | second as usize))
            }
            0b10 => Ok(Length::Count(self.u32_be()? as usize)),
            0b11 => match first & 0x3F {
                0 => {
                    let v = self.byte()? as i8;
                    Ok(Length::IntString(v.to_string()))
                }
                1 => {
                    let b = self.take(2)?;
                    let v = i16::from_le_bytes([b[0], b[1]]);
                    Ok(Length::IntString(v.to_string()))
                }
                2 => {
                    let b = self.take(4)?;
                    let v = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                    Ok(Length::IntString(v.to_string()))
                }
                _ => Err(RedisError::Rdb("LZF-compressed strings are not supported".into())),
            },
            _ => unreachable!("2 bits"),
        }
    }

    fn length(&mut self) -> Result<usize, RedisError> {
        match self.length_or_int_string()? {
            Length::Count(n) => Ok(n),
            Length::IntString(s) => Ok(s.len()),
        }
    }

    fn string(&mut self) -> Result<Bytes, RedisError> {
        match self.length_or_int_string()? {
            Length::Count(n) => Ok(Bytes::copy_from_slice(self.take(n)?)),
            Length::IntString(s) => Ok(Bytes::from(s.into_bytes())),
        }
    }

    fn value(&mut self, value_type: u8) -> Result<Bytes, RedisError> {
        match value_type {
            VALUE_STRING => self.string(),
            _ => Ok(Bytes::new()),
        }
    }
}

enum Length {
    Count(usize),
    IntString(String),
}

fn eof() -> RedisError {
    RedisError::Rdb("unexpected end of file".into())
}

fn parse_inner(buf: &[u8]) -> Result<Vec<RdbEntry>, RedisError> {
    if buf.len() < 9 || &buf[0..5] != b"REDIS" {
        return Err(RedisError::Rdb("missing REDIS magic".into()));
    }
    std::str::from_utf8(&buf[5..9])
        .ok()
        .filter(|v| v.chars().all(|c| c.is_ascii_digit()))
        .ok_or_else(|| RedisError::Rdb("invalid version field".into()))?;

    let mut r = Reader { buf, pos: 9 };
    let mut entries = Vec::new();

    loop {
        let opcode = match r.byte() {
            Ok(b) => b,
            Err(_) => break, // truncated trailer, treat as EOF
        };
        match opcode {
            OP_EOF => break,
            OP_SELECTDB => {
                r.length()?;
            }
            OP_RESIZEDB => {
                r.length()?;
                r.length()?;
            }
            OP_AUX => {
                r.string()?;
                r.string()?;
            }
            OP_EXPIRE_SEC => {
                let secs = r.u32_le()?;
                let value_type = r.byte()?;
                let key = r.string()?;
                let value = r.value(value_type)?;
                entries.push(RdbEntry {
                    key: String::from_utf8_lossy(&key).into_owned(),
                    value,
                    expires_at_ms: Some(secs as u64 * 1000),
                });
            }
            OP_EXPIRE_MS => {
                let ms = r.u64_le()?;
                let value_type = r.byte()?;
                let key = r.string()?;
                let value = r.value(value_type)?;
                entries.push(RdbEntry {
                    key: String::from_utf8_lossy(&key).into_owned(),
                    value,
                    expires_at_ms: Some(ms),
                });
            }
            value_type => {
                let key = r.string()?;
                let value = r.value(value_type)?;
                entries.push(RdbEntry {
                    key: String::from_utf8_lossy(&key).into_owned(),
                    value,
                    expires_at_ms: None,
                });
            }
        }
    }

    Ok(entries)
}

/// Parse a full RDB image. On any failure the caller should fall back to an
/// empty store rather than abort startup.
pub fn parse(buf: &[u8]) -> Result<Vec<RdbEntry>, RedisError> {
    parse_inner(buf)
}
