//! Stream-ID ordering, validation and generation (spec.md section 4.4),
//! plus the append-only log backing a stream-typed key. Grounded on
//! `examples/yyin-dev-codecrafters-redis/src/stream.rs`'s `EntryId`: a
//! derived-`Ord` pair gives lexicographic `(ms, seq)` comparison for free,
//! and a `BTreeMap` gives range queries without a linear scan.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::RedisError;

pub const STREAM_ID_TOO_SMALL_ERROR: &str = "ERR The ID specified in XADD must be greater than 0-0";
pub const STREAM_ID_NOT_GREATER_ERROR: &str =
    "ERR The ID specified in XADD is equal or smaller than the target stream top item";
pub const XOP_ON_NON_STREAM_ERROR: &str =
    "WRONGTYPE Operation against a key holding the wrong kind of value";
const INVALID_ID_FORMAT: &str = "Invalid stream ID specified as stream command argument";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };

    pub fn render(&self) -> String {
        format!("{}-{}", self.ms, self.seq)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

fn bad_format() -> RedisError {
    RedisError::Validation(INVALID_ID_FORMAT.into())
}

/// Implements both the validation and generation halves of spec.md section
/// 4.4 in one pass: compute the candidate id from `spec` given the stream's
/// current last id, then check it is strictly greater than that last id
/// (and not the `0-0` sentinel).
pub fn generate_id(spec: &str, last: Option<StreamId>) -> Result<StreamId, RedisError> {
    let id = if spec == "*" {
        let ms = now_ms();
        let seq = match last {
            Some(l) if l.ms == ms => l.seq + 1,
            _ => 0,
        };
        StreamId { ms, seq }
    } else {
        let (ms_part, seq_part) = spec.split_once('-').ok_or_else(bad_format)?;
        let ms: u64 = ms_part.parse().map_err(|_| bad_format())?;
        if seq_part == "*" {
            let seq = match last {
                Some(l) if l.ms == ms => l.seq + 1,
                _ => {
                    if ms == 0 {
                        1
                    } else {
                        0
                    }
                }
            };
            StreamId { ms, seq }
        } else {
            let seq: u64 = seq_part.parse().map_err(|_| bad_format())?;
            StreamId { ms, seq }
        }
    };

    if id == StreamId::ZERO {
        return Err(RedisError::Stream(STREAM_ID_TOO_SMALL_ERROR.into()));
    }
    if let Some(l) = last {
        if id <= l {
            return Err(RedisError::Stream(STREAM_ID_NOT_GREATER_ERROR.into()));
        }
    }
    Ok(id)
}

/// Normalize an XRANGE `start` bound per spec.md section 4.4: `"-"` is the
/// first possible id, a bare `<ms>` means `<ms>-0`.
pub fn normalize_start(s: &str) -> Result<StreamId, RedisError> {
    if s == "-" {
        return Ok(StreamId { ms: 0, seq: 1 });
    }
    if let Some((ms, seq)) = s.split_once('-') {
        return Ok(StreamId {
            ms: ms.parse().map_err(|_| bad_format())?,
            seq: seq.parse().map_err(|_| bad_format())?,
        });
    }
    Ok(StreamId {
        ms: s.parse().map_err(|_| bad_format())?,
        seq: 0,
    })
}

/// Normalize an XRANGE `end` bound. `"+"` resolves to the stream's last id
/// (or the `(2^32-1, 2^32-1)` ceiling if the stream is empty); a bare `<ms>`
/// means `<ms>-(2^32-1)`.
pub fn normalize_end(s: &str, last: Option<StreamId>) -> Result<StreamId, RedisError> {
    const MAX32: u64 = u32::MAX as u64;
    if s == "+" {
        return Ok(last.unwrap_or(StreamId { ms: MAX32, seq: MAX32 }));
    }
    if let Some((ms, seq)) = s.split_once('-') {
        return Ok(StreamId {
            ms: ms.parse().map_err(|_| bad_format())?,
            seq: seq.parse().map_err(|_| bad_format())?,
        });
    }
    Ok(StreamId {
        ms: s.parse().map_err(|_| bad_format())?,
        seq: MAX32,
    })
}

type Fields = Vec<(String, String)>;

#[derive(Default)]
struct Inner {
    entries: BTreeMap<StreamId, Fields>,
}

/// The append-only log for one stream-typed key. Cheaply cloneable; all
/// clones share the same underlying entries behind a mutex.
#[derive(Clone)]
pub struct StreamLog {
    inner: Arc<Mutex<Inner>>,
}

impl StreamLog {
    pub fn new() -> Self {
        StreamLog {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn last_id(&self) -> Option<StreamId> {
        self.inner.lock().unwrap().entries.keys().next_back().copied()
    }

    /// Validate, generate and append an id for `spec` atomically under one
    /// lock acquisition (spec.md section 4.4's XADD).
    pub fn append_auto(&self, spec: &str, fields: Fields) -> Result<StreamId, RedisError> {
        let mut inner = self.inner.lock().unwrap();
        let last = inner.entries.keys().next_back().copied();
        let id = generate_id(spec, last)?;
        inner.entries.insert(id, fields);
        Ok(id)
    }

    pub fn range(&self, start: StreamId, end: StreamId) -> Vec<(StreamId, Fields)> {
        if start > end {
            return Vec::new();
        }
        self.inner
            .lock()
            .unwrap()
            .entries
            .range(start..=end)
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    pub fn after(&self, after: StreamId) -> Vec<(StreamId, Fields)> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .range((Bound::Excluded(after), Bound::Unbounded))
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }
}
