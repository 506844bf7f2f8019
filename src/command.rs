//! Command model: parse a RESP array into a typed `Command` (spec.md
//! section 4.5), then `execute` it against a `(store, replication)` context.
//! A tagged union with one `execute` method resolves the "abstract command
//! base with dynamic dispatch" REDESIGN FLAG in spec.md section 9 — no
//! trait objects, one `match`.

use bytes::Bytes;

use crate::conn::SharedStream;
use crate::config::Config;
use crate::error::RedisError;
use crate::replication::ReplicationState;
use crate::resp::RespValue;
use crate::store::stream::StreamId;
use crate::store::Db;

/// What this execution is happening on behalf of: a regular client
/// connection (which gets replies and can become a PSYNC follower), or the
/// replica applying bytes straight off the master link (which gets no
/// reply except for REPLCONF GETACK, per spec.md section 4.5).
pub enum Caller<'a> {
    Client(&'a SharedStream),
    ReplicaLink,
}

pub struct ExecCtx<'a> {
    pub db: &'a Db,
    pub config: &'a Config,
    pub repl: &'a ReplicationState,
    pub caller: Caller<'a>,
    /// Bytes consumed so far from the master link, reported back on
    /// `REPLCONF GETACK`. Distinct from `repl.offset()`, which tracks bytes
    /// *this* node has propagated to *its own* followers. Unused (and
    /// irrelevant) for plain client connections.
    pub link_offset: i64,
}

#[derive(Debug)]
pub enum Reply {
    Value(RespValue),
    /// The handler already wrote its own bytes directly to the socket
    /// (PSYNC's FULLRESYNC+RDB, REPLCONF GETACK's reply-then-continue).
    AlreadySent,
    /// No reply at all — a replicated command applied on a replica link,
    /// other than REPLCONF GETACK.
    None,
}

pub enum Command {
    Ping,
    Echo(Bytes),
    Set { key: String, value: Bytes, px: Option<u64>, raw: Bytes },
    Get { key: String },
    CommandDoc,
    Info,
    ConfigGet { param: String },
    Keys { pattern: String },
    Type { key: String },
    XAdd { key: String, id: String, fields: Vec<(String, String)> },
    XRange { key: String, start: String, end: String },
    XRead { block: Option<u64>, keys: Vec<String>, ids: Vec<String> },
    ReplConfListeningPort(String),
    ReplConfCapa,
    ReplConfAck(u64),
    ReplConfGetAck { raw: Bytes },
    Psync,
    Wait { numreplicas: u64, timeout_ms: u64 },
    Unknown(String),
}

fn bulk_str(v: &RespValue) -> Result<String, RedisError> {
    match v {
        RespValue::BulkString(Some(b)) => Ok(String::from_utf8_lossy(b).into_owned()),
        RespValue::SimpleString(b) => Ok(String::from_utf8_lossy(b).into_owned()),
        _ => Err(RedisError::Validation("expected a bulk string argument".into())),
    }
}

fn arity(items: &[RespValue], at_least: usize) -> Result<(), RedisError> {
    if items.len() < at_least {
        Err(RedisError::Validation("wrong number of arguments".into()))
    } else {
        Ok(())
    }
}

impl Command {
    pub fn parse(items: &[RespValue], raw: Bytes) -> Result<Command, RedisError> {
        arity(items, 1)?;
        let name = bulk_str(&items[0])?.to_ascii_uppercase();
        let args: Vec<String> = items[1..]
            .iter()
            .map(bulk_str)
            .collect::<Result<_, _>>()?;

        match name.as_str() {
            "PING" => Ok(Command::Ping),
            "ECHO" => {
                arity(items, 2)?;
                Ok(Command::Echo(Bytes::from(args[0].clone().into_bytes())))
            }
            "SET" => {
                if args.len() < 2 {
                    return Err(RedisError::Validation("wrong number of arguments for 'set' command".into()));
                }
                let mut px = None;
                if args.len() >= 4 && args[2].eq_ignore_ascii_case("PX") {
                    px = Some(
                        args[3]
                            .parse::<u64>()
                            .map_err(|_| RedisError::Validation("value is not an integer or out of range".into()))?,
                    );
                } else if args.len() > 2 {
                    return Err(RedisError::Validation("syntax error".into()));
                }
                Ok(Command::Set {
                    key: args[0].clone(),
                    value: Bytes::from(args[1].clone().into_bytes()),
                    px,
                    raw,
                })
            }
            "GET" => {
                arity(items, 2)?;
                Ok(Command::Get { key: args[0].clone() })
            }
            "COMMAND" => Ok(Command::CommandDoc),
            "INFO" => Ok(Command::Info),
            "CONFIG" => {
                arity(items, 3)?;
                if !args[0].eq_ignore_ascii_case("GET") {
                    return Err(RedisError::Validation(format!("unknown CONFIG subcommand '{}'", args[0])));
                }
                Ok(Command::ConfigGet { param: args[1].to_ascii_lowercase() })
            }
            "KEYS" => {
                arity(items, 2)?;
                Ok(Command::Keys { pattern: args[0].clone() })
            }
            "TYPE" => {
                arity(items, 2)?;
                Ok(Command::Type { key: args[0].clone() })
            }
            "XADD" => {
                if args.len() < 3 || (args.len() - 2) % 2 != 0 {
                    return Err(RedisError::Validation("wrong number of arguments for 'xadd' command".into()));
                }
                let key = args[0].clone();
                let id = args[1].clone();
                let mut fields = Vec::new();
                let mut i = 2;
                while i < args.len() {
                    fields.push((args[i].clone(), args[i + 1].clone()));
                    i += 2;
                }
                Ok(Command::XAdd { key, id, fields })
            }
            "XRANGE" => {
                arity(items, 4)?;
                Ok(Command::XRange {
                    key: args[0].clone(),
                    start: args[1].clone(),
                    end: args[2].clone(),
                })
            }
            "XREAD" => parse_xread(&args),
            "REPLCONF" => {
                arity(items, 2)?;
                match args[0].to_ascii_lowercase().as_str() {
                    "listening-port" => {
                        arity(items, 3)?;
                        Ok(Command::ReplConfListeningPort(args[1].clone()))
                    }
                    "capa" => Ok(Command::ReplConfCapa),
                    "getack" => Ok(Command::ReplConfGetAck { raw }),
                    "ack" => {
                        arity(items, 3)?;
                        let offset = args[1]
                            .parse::<u64>()
                            .map_err(|_| RedisError::Validation("invalid ACK offset".into()))?;
                        Ok(Command::ReplConfAck(offset))
                    }
                    other => Err(RedisError::Validation(format!("unknown REPLCONF subcommand '{}'", other))),
                }
            }
            "PSYNC" => Ok(Command::Psync),
            "WAIT" => {
                arity(items, 3)?;
                let numreplicas = args[0]
                    .parse::<u64>()
                    .map_err(|_| RedisError::Validation("value is not an integer or out of range".into()))?;
                let timeout_ms = args[1]
                    .parse::<u64>()
                    .map_err(|_| RedisError::Validation("value is not an integer or out of range".into()))?;
                Ok(Command::Wait { numreplicas, timeout_ms })
            }
            other => Ok(Command::Unknown(other.to_string())),
        }
    }
}

fn parse_xread(args: &[String]) -> Result<Command, RedisError> {
    let streams_pos = args
        .iter()
        .position(|a| a.eq_ignore_ascii_case("STREAMS"))
        .ok_or_else(|| RedisError::Validation("syntax error".into()))?;

    let mut block = None;
    let mut i = 0;
    while i < streams_pos {
        if args[i].eq_ignore_ascii_case("BLOCK") && i + 1 < streams_pos {
            block = Some(
                args[i + 1]
                    .parse::<u64>()
                    .map_err(|_| RedisError::Validation("syntax error in BLOCK parameter".into()))?,
            );
            i += 2;
        } else {
            return Err(RedisError::Validation("syntax error in XREAD command".into()));
        }
    }

    let remaining = &args[streams_pos + 1..];
    if remaining.is_empty() || remaining.len() % 2 != 0 {
        return Err(RedisError::Validation("wrong number of arguments for 'xread' command".into()));
    }
    let mid = remaining.len() / 2;
    Ok(Command::XRead {
        block,
        keys: remaining[..mid].to_vec(),
        ids: remaining[mid..].to_vec(),
    })
}

fn render_entries(entries: &[(StreamId, Vec<(String, String)>)]) -> RespValue {
    RespValue::Array(
        entries
            .iter()
            .map(|(id, fields)| {
                let mut flat = Vec::with_capacity(fields.len() * 2);
                for (k, v) in fields {
                    flat.push(RespValue::bulk(k.clone()));
                    flat.push(RespValue::bulk(v.clone()));
                }
                RespValue::Array(vec![RespValue::bulk(id.render()), RespValue::Array(flat)])
            })
            .collect(),
    )
}

fn parse_explicit_id(s: &str) -> Result<StreamId, RedisError> {
    let (ms, seq) = s
        .split_once('-')
        .ok_or_else(|| RedisError::Validation("Invalid stream ID specified as stream command argument".into()))?;
    Ok(StreamId {
        ms: ms
            .parse()
            .map_err(|_| RedisError::Validation("Invalid stream ID specified as stream command argument".into()))?,
        seq: seq
            .parse()
            .map_err(|_| RedisError::Validation("Invalid stream ID specified as stream command argument".into()))?,
    })
}

impl Command {
    pub fn execute(&self, ctx: &ExecCtx) -> Result<Reply, RedisError> {
        match self {
            Command::Ping => Ok(Reply::Value(RespValue::simple("PONG"))),
            Command::Echo(data) => Ok(Reply::Value(RespValue::BulkString(Some(data.clone())))),
            Command::Set { key, value, px, raw } => {
                let expire_in = px.map(std::time::Duration::from_millis);
                ctx.db.set(key, value.clone(), expire_in);
                ctx.repl.propagate(raw);
                Ok(Reply::Value(RespValue::simple("OK")))
            }
            Command::Get { key } => Ok(Reply::Value(RespValue::BulkString(ctx.db.get(key)))),
            Command::CommandDoc => Ok(Reply::Value(RespValue::simple("OK"))),
            Command::Info => {
                let role = if ctx.config.is_replica() { "slave" } else { "master" };
                let info = format!(
                    "role:{}\nconnected_slaves:{}\nmaster_replid:{}\nmaster_repl_offset:{}\n",
                    role,
                    ctx.repl.follower_count(),
                    ctx.repl.replid(),
                    ctx.repl.offset(),
                );
                Ok(Reply::Value(RespValue::bulk(info)))
            }
            Command::ConfigGet { param } => match param.as_str() {
                "dir" => Ok(Reply::Value(RespValue::Array(vec![
                    RespValue::bulk("dir"),
                    RespValue::bulk(ctx.config.dir.clone()),
                ]))),
                "dbfilename" => Ok(Reply::Value(RespValue::Array(vec![
                    RespValue::bulk("dbfilename"),
                    RespValue::bulk(ctx.config.dbfilename.clone()),
                ]))),
                _ => Ok(Reply::Value(RespValue::Array(Vec::new()))),
            },
            Command::Keys { pattern } => {
                let keys = ctx.db.keys(pattern);
                Ok(Reply::Value(RespValue::Array(
                    keys.into_iter().map(RespValue::bulk).collect(),
                )))
            }
            Command::Type { key } => Ok(Reply::Value(RespValue::simple(ctx.db.kind(key)))),
            Command::XAdd { key, id, fields } => {
                let new_id = ctx.db.xadd(key, id, fields.clone())?;
                Ok(Reply::Value(RespValue::bulk(new_id.render())))
            }
            Command::XRange { key, start, end } => {
                let entries = ctx.db.xrange(key, start, end)?;
                Ok(Reply::Value(render_entries(&entries)))
            }
            Command::XRead { block, keys, ids } => execute_xread(ctx, *block, keys, ids),
            Command::ReplConfListeningPort(_port) => {
                if let Caller::Client(stream) = &ctx.caller {
                    ctx.repl.add_follower((*stream).clone());
                }
                Ok(Reply::Value(RespValue::simple("OK")))
            }
            Command::ReplConfCapa => Ok(Reply::Value(RespValue::simple("OK"))),
            Command::ReplConfAck(_offset) => {
                ctx.repl.record_ack();
                Ok(Reply::None)
            }
            Command::ReplConfGetAck { raw } => {
                // Forwarded down a replication sub-chain, if this node also
                // has followers of its own.
                ctx.repl.propagate(raw);
                let offset = match ctx.caller {
                    Caller::ReplicaLink => ctx.link_offset,
                    Caller::Client(_) => ctx.repl.offset(),
                };
                Ok(Reply::Value(RespValue::Array(vec![
                    RespValue::bulk("REPLCONF"),
                    RespValue::bulk("ACK"),
                    RespValue::bulk(offset.to_string()),
                ])))
            }
            Command::Psync => match &ctx.caller {
                Caller::Client(stream) => {
                    let header = format!("+FULLRESYNC {} {}\r\n", ctx.repl.replid(), ctx.repl.offset());
                    stream.write_all(header.as_bytes())?;
                    let rdb = crate::rdb::empty_rdb();
                    let mut framed = format!("${}\r\n", rdb.len()).into_bytes();
                    framed.extend_from_slice(&rdb);
                    stream.write_all(&framed)?;
                    ctx.repl.add_follower((*stream).clone());
                    Ok(Reply::AlreadySent)
                }
                Caller::ReplicaLink => Err(RedisError::Protocol("PSYNC received on replica link".into())),
            },
            Command::Wait { numreplicas, timeout_ms } => {
                let acks = ctx.repl.wait(*numreplicas, *timeout_ms);
                Ok(Reply::Value(RespValue::Integer(acks)))
            }
            Command::Unknown(name) => Ok(Reply::Value(RespValue::error(format!("NOOP unknown command '{}'", name)))),
        }
    }
}

fn execute_xread(ctx: &ExecCtx, block: Option<u64>, keys: &[String], ids: &[String]) -> Result<Reply, RedisError> {
    let resolved: Vec<StreamId> = keys
        .iter()
        .zip(ids)
        .map(|(key, id)| {
            if id == "$" {
                Ok(ctx.db.resolve_dollar(key))
            } else {
                parse_explicit_id(id)
            }
        })
        .collect::<Result<_, _>>()?;

    let render = |result: Vec<(String, Vec<(StreamId, Vec<(String, String)>)>)>| {
        RespValue::Array(
            result
                .into_iter()
                .map(|(key, entries)| RespValue::Array(vec![RespValue::bulk(key), render_entries(&entries)]))
                .collect(),
        )
    };

    // Per spec.md section 4.4: if *any* requested stream has zero entries at
    // return time, the overall response is the null bulk string, not a
    // partial array with that stream dropped.
    let any_stream_empty = |result: &[(String, Vec<(StreamId, Vec<(String, String)>)>)]| {
        result.iter().any(|(_, entries)| entries.is_empty())
    };

    match block {
        None => {
            let result = ctx.db.xread_once(keys, &resolved)?;
            if any_stream_empty(&result) {
                Ok(Reply::Value(RespValue::null_bulk()))
            } else {
                Ok(Reply::Value(render(result)))
            }
        }
        Some(0) => {
            // Subscribe before the first check so an XADD landing between it
            // and the wait still wakes us (the sender is already
            // registered). Every key keeps its one live registration across
            // iterations: `notify` drains and fires the waiters for whichever
            // key actually grew, so only that key's receiver needs replacing
            // before the next wait — re-subscribing keys that didn't fire
            // would pile up dead senders in `Db::waiters` on every spurious
            // wakeup of a multi-stream XREAD.
            let mut receivers: Vec<_> = keys.iter().map(|k| ctx.db.subscribe(k)).collect();
            loop {
                let result = ctx.db.xread_once(keys, &resolved)?;
                if !any_stream_empty(&result) {
                    return Ok(Reply::Value(render(result)));
                }
                let mut select = crossbeam_channel::Select::new();
                for r in &receivers {
                    select.recv(r);
                }
                let fired = select.ready();
                receivers[fired] = ctx.db.subscribe(&keys[fired]);
            }
        }
        Some(ms) => {
            std::thread::sleep(std::time::Duration::from_millis(ms));
            let result = ctx.db.xread_once(keys, &resolved)?;
            if any_stream_empty(&result) {
                Ok(Reply::Value(RespValue::null_bulk()))
            } else {
                Ok(Reply::Value(render(result)))
            }
        }
    }
}
