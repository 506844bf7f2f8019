//! Replica role: connect out to a master, perform the handshake, then apply
//! the replicated command stream (spec.md section 4.6). Grounded on
//! `redis/mod.rs::init_replica`'s command/expected-reply list, replaced
//! with an explicit state machine and the shared `FrameReader`/`Command`
//! pipeline instead of a byte-buffer peek loop.

use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;

use bytes::Bytes;

use crate::command::{Caller, Command, ExecCtx, Reply};
use crate::config::Config;
use crate::conn::SharedStream;
use crate::error::RedisError;
use crate::rdb::RdbEntry;
use crate::replication::ReplicationState;
use crate::resp::{Frame, FrameReader, RespValue};
use crate::store::Db;

#[derive(Debug, PartialEq, Eq)]
enum HandshakeState {
    Init,
    PingSent,
    ReplConf1Sent,
    ReplConf2Sent,
    PsyncSent,
    FullResyncSeen,
    Streaming,
}

fn send_command(stream: &mut TcpStream, parts: &[&str]) -> Result<(), RedisError> {
    let value = RespValue::Array(parts.iter().map(|p| RespValue::bulk(*p)).collect());
    stream.write_all(&value.encode())?;
    Ok(())
}

fn expect_simple_reply(reader: &mut FrameReader<&mut TcpStream>, expect_prefix: &str) -> Result<(), RedisError> {
    match reader.next_frame()? {
        Some((Frame::FullResync(payload), _)) if payload.starts_with(expect_prefix.as_bytes()) => Ok(()),
        Some((frame, _)) => Err(RedisError::Protocol(format!(
            "unexpected reply during handshake: {:?}",
            frame
        ))),
        None => Err(RedisError::Protocol("master closed connection during handshake".into())),
    }
}

/// Connects to the configured master, performs the PING/REPLCONF/PSYNC
/// handshake, loads the RDB snapshot into `db`, then applies the replicated
/// command stream forever. Runs on its own thread; never returns on success.
pub fn run(config: Arc<Config>, db: Arc<Db>, repl: Arc<ReplicationState>) -> Result<(), RedisError> {
    let (host, port) = config
        .replicaof
        .clone()
        .expect("replica::run called without --replicaof configured");

    let mut stream = TcpStream::connect((host.as_str(), port))?;
    let port_str = config.port.to_string();

    let mut state = HandshakeState::Init;
    {
        let mut reader = FrameReader::new(&mut stream);
        while state != HandshakeState::FullResyncSeen {
            match state {
                HandshakeState::Init => {
                    send_command(reader_inner(&mut reader), &["PING"])?;
                    state = HandshakeState::PingSent;
                }
                HandshakeState::PingSent => {
                    expect_simple_reply(&mut reader, "PONG")?;
                    send_command(reader_inner(&mut reader), &["REPLCONF", "listening-port", &port_str])?;
                    state = HandshakeState::ReplConf1Sent;
                }
                HandshakeState::ReplConf1Sent => {
                    expect_simple_reply(&mut reader, "OK")?;
                    send_command(reader_inner(&mut reader), &["REPLCONF", "capa", "psync2"])?;
                    state = HandshakeState::ReplConf2Sent;
                }
                HandshakeState::ReplConf2Sent => {
                    expect_simple_reply(&mut reader, "OK")?;
                    send_command(reader_inner(&mut reader), &["PSYNC", "?", "-1"])?;
                    state = HandshakeState::PsyncSent;
                }
                HandshakeState::PsyncSent => {
                    match reader.next_frame()? {
                        Some((Frame::FullResync(payload), _)) => {
                            apply_fullresync(&repl, &payload);
                            state = HandshakeState::FullResyncSeen;
                        }
                        Some((frame, _)) => {
                            return Err(RedisError::Protocol(format!("expected +FULLRESYNC, got {:?}", frame)))
                        }
                        None => return Err(RedisError::Protocol("master closed connection before FULLRESYNC".into())),
                    }
                }
                HandshakeState::FullResyncSeen | HandshakeState::Streaming => unreachable!(),
            }
        }

        let rdb_bytes = reader.read_rdb_bulk()?;
        match crate::rdb::parse(&rdb_bytes) {
            Ok(entries) => seed_store(&db, entries),
            Err(e) => eprintln!("[replica] failed to parse master's RDB snapshot, starting empty: {}", e),
        }
    }

    println!("[replica] handshake complete, streaming from {}:{}", host, port);
    stream_loop(stream, config, db, repl)
}

/// Parse `"FULLRESYNC <replid> <offset>"` and update the replica's
/// replication state (spec.md section 3: replid is `"?"` until updated on
/// FULLRESYNC; `master_repl_offset` starts counting from the offset the
/// master reports, not from zero).
fn apply_fullresync(repl: &ReplicationState, payload: &Bytes) {
    let text = String::from_utf8_lossy(payload);
    let mut parts = text.split_whitespace();
    parts.next(); // "FULLRESYNC"
    if let Some(replid) = parts.next() {
        repl.set_replid(replid.to_string());
    }
    if let Some(offset) = parts.next().and_then(|s| s.parse::<i64>().ok()) {
        repl.set_offset(offset);
    }
}

fn reader_inner<'a>(reader: &'a mut FrameReader<&mut TcpStream>) -> &'a mut TcpStream {
    // FrameReader owns the `&mut TcpStream` it was built with; writes go
    // through a fresh reborrow since FrameReader only reads.
    &mut *reader.inner_mut()
}

fn seed_store(db: &Db, entries: Vec<RdbEntry>) {
    for entry in entries {
        db.load_string(entry.key, entry.value, entry.expires_at_ms);
    }
}

fn stream_loop(stream: TcpStream, config: Arc<Config>, db: Arc<Db>, repl: Arc<ReplicationState>) -> Result<(), RedisError> {
    let write_half = SharedStream::new(stream.try_clone()?);
    let mut reader = FrameReader::new(stream);
    let mut offset: i64 = repl.offset();

    loop {
        match reader.next_frame()? {
            None => {
                println!("[replica] master connection closed");
                return Ok(());
            }
            Some((Frame::Command(items), raw_len)) => {
                offset = repl.add_offset(raw_len as i64);
                let cmd = Command::parse(&items, Bytes::new())?;
                let ctx = ExecCtx {
                    db: &db,
                    config: &config,
                    repl: &repl,
                    caller: Caller::ReplicaLink,
                    link_offset: offset,
                };
                match cmd.execute(&ctx) {
                    Ok(Reply::Value(v)) if matches!(cmd, Command::ReplConfGetAck { .. }) => {
                        write_half.write_all(&v.encode())?;
                    }
                    Ok(_) => {}
                    Err(e) => eprintln!("[replica] error applying replicated command: {}", e),
                }
            }
            Some((other, raw_len)) => {
                offset = repl.add_offset(raw_len as i64);
                eprintln!("[replica] ignoring unexpected frame on master link: {:?}", other);
            }
        }
    }
}
