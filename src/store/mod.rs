//! The in-memory store: string values with TTL plus stream-typed values,
//! behind a `DashMap`. Blocking XREAD is implemented with per-key
//! `crossbeam_channel` waiters notified on XADD instead of a busy poll loop.

pub mod stream;

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;

use crate::error::RedisError;
use stream::{StreamId, StreamLog};

#[derive(Clone)]
pub enum Entry {
    Str {
        bytes: Bytes,
        expires_at: Option<Instant>,
    },
    Stream(StreamLog),
}

pub struct Db {
    data: DashMap<String, Entry>,
    waiters: DashMap<String, Vec<Sender<()>>>,
}

impl Db {
    pub fn new() -> Self {
        Db {
            data: DashMap::new(),
            waiters: DashMap::new(),
        }
    }

    pub fn set(&self, key: &str, value: Bytes, expire_in: Option<Duration>) {
        let expires_at = expire_in.map(|d| Instant::now() + d);
        self.data.insert(
            key.to_string(),
            Entry::Str {
                bytes: value,
                expires_at,
            },
        );
    }

    /// Seed a key directly from the RDB loader, which carries an absolute
    /// expiry in epoch milliseconds rather than a relative duration.
    pub fn load_string(&self, key: String, value: Bytes, expires_at_epoch_ms: Option<u64>) {
        let expires_at = expires_at_epoch_ms.map(|epoch_ms| {
            let now_epoch_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_millis() as u64;
            let remaining = epoch_ms.saturating_sub(now_epoch_ms);
            Instant::now() + Duration::from_millis(remaining)
        });
        self.data.insert(key, Entry::Str { bytes: value, expires_at });
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        match self.data.get(key) {
            Some(entry) => match &*entry {
                Entry::Str { bytes, expires_at } => {
                    if let Some(at) = expires_at {
                        if Instant::now() >= *at {
                            drop(entry);
                            self.data.remove(key);
                            return None;
                        }
                    }
                    Some(bytes.clone())
                }
                Entry::Stream(_) => None,
            },
            None => None,
        }
    }

    pub fn del(&self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn kind(&self, key: &str) -> &'static str {
        match self.data.get(key) {
            Some(e) => match &*e {
                Entry::Str { .. } => "string",
                Entry::Stream(_) => "stream",
            },
            None => "none",
        }
    }

    /// All live keys matching a glob pattern.
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        self.data
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| glob_match(pattern, k))
            .collect()
    }

    /// Proactive sweep over all keys; not required on the hot path, since
    /// `get` already expires lazily on access.
    pub fn expire_sweep(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .data
            .iter()
            .filter_map(|e| match e.value() {
                Entry::Str { expires_at: Some(at), .. } if now >= *at => Some(e.key().clone()),
                _ => None,
            })
            .collect();
        for k in expired {
            self.data.remove(&k);
        }
    }

    pub fn xadd(&self, key: &str, id_spec: &str, fields: Vec<(String, String)>) -> Result<StreamId, RedisError> {
        let log = match self.data.entry(key.to_string()) {
            MapEntry::Occupied(occ) => match occ.get() {
                Entry::Stream(log) => log.clone(),
                Entry::Str { .. } => {
                    return Err(RedisError::Stream(stream::STREAM_ID_NOT_GREATER_ERROR.into()))
                }
            },
            MapEntry::Vacant(vac) => {
                let log = StreamLog::new();
                vac.insert(Entry::Stream(log.clone()));
                log
            }
        };
        let id = log.append_auto(id_spec, fields)?;
        self.notify(key);
        Ok(id)
    }

    pub fn xrange(
        &self,
        key: &str,
        start: &str,
        end: &str,
    ) -> Result<Vec<(StreamId, Vec<(String, String)>)>, RedisError> {
        match self.data.get(key) {
            Some(e) => match &*e {
                Entry::Stream(log) => {
                    let last = log.last_id();
                    let start_id = stream::normalize_start(start)?;
                    let end_id = stream::normalize_end(end, last)?;
                    Ok(log.range(start_id, end_id))
                }
                Entry::Str { .. } => Err(RedisError::Stream(stream::XOP_ON_NON_STREAM_ERROR.into())),
            },
            None => Ok(Vec::new()),
        }
    }

    /// Resolve a literal `$` id for a stream to the last id present right
    /// now, or `0-0` if the stream is empty or absent.
    pub fn resolve_dollar(&self, key: &str) -> StreamId {
        match self.data.get(key) {
            Some(e) => match &*e {
                Entry::Stream(log) => log.last_id().unwrap_or(StreamId::ZERO),
                Entry::Str { .. } => StreamId::ZERO,
            },
            None => StreamId::ZERO,
        }
    }

    /// One non-blocking pass over every `(key, after-id)` pair. Every
    /// requested key is represented in the result, even with an empty entry
    /// list, so the caller can tell "this stream had nothing new" apart from
    /// "this key wasn't requested" — per spec.md section 4.4, a response
    /// where *any* stream has zero entries at return time is the null bulk
    /// string as a whole, not a partial array with that stream dropped.
    pub fn xread_once(
        &self,
        keys: &[String],
        after: &[StreamId],
    ) -> Result<Vec<(String, Vec<(StreamId, Vec<(String, String)>)>)>, RedisError> {
        let mut out = Vec::new();
        for (key, id) in keys.iter().zip(after) {
            match self.data.get(key) {
                Some(e) => match &*e {
                    Entry::Stream(log) => out.push((key.clone(), log.after(*id))),
                    Entry::Str { .. } => {
                        return Err(RedisError::Stream(stream::XOP_ON_NON_STREAM_ERROR.into()))
                    }
                },
                None => out.push((key.clone(), Vec::new())),
            }
        }
        Ok(out)
    }

    fn notify(&self, key: &str) {
        if let Some((_, txs)) = self.waiters.remove(key) {
            for tx in txs {
                let _ = tx.send(());
            }
        }
    }

    /// Register interest in a key growing, for blocking XREAD. Deliberately
    /// does not create the key: a client may block on a stream that does
    /// not exist yet.
    pub fn subscribe(&self, key: &str) -> Receiver<()> {
        let (tx, rx) = unbounded();
        self.waiters.entry(key.to_string()).or_default().push(tx);
        rx
    }
}

/// Redis-style `KEYS` glob matching: `*` matches any run of characters, `?`
/// matches exactly one, `[...]` matches a character class, and `\` escapes
/// the next character literally.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_inner(&p, &t)
}

fn glob_match_inner(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => glob_match_inner(&p[1..], t) || (!t.is_empty() && glob_match_inner(p, &t[1..])),
        Some('?') => !t.is_empty() && glob_match_inner(&p[1..], &t[1..]),
        Some('[') => {
            let Some(close) = p.iter().position(|&c| c == ']') else {
                return !t.is_empty() && p[0] == t[0] && glob_match_inner(&p[1..], &t[1..]);
            };
            if t.is_empty() {
                return false;
            }
            let (negate, class_start) = if p.get(1) == Some(&'^') { (true, 2) } else { (false, 1) };
            let class = &p[class_start..close];
            let hit = char_in_class(class, t[0]);
            if hit != negate {
                glob_match_inner(&p[close + 1..], &t[1..])
            } else {
                false
            }
        }
        Some('\\') if p.len() > 1 => !t.is_empty() && p[1] == t[0] && glob_match_inner(&p[2..], &t[1..]),
        Some(&c) => !t.is_empty() && c == t[0] && glob_match_inner(&p[1..], &t[1..]),
    }
}

fn char_in_class(class: &[char], c: char) -> bool {
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == '-' {
            if class[i] <= c && c <= class[i + 2] {
                return true;
            }
            i += 3;
        } else {
            if class[i] == c {
                return true;
            }
            i += 1;
        }
    }
    false
}
