//! Client-facing TCP server: one thread per connection (spec.md section
//! 4.5), reading frames with `FrameReader` and dispatching through
//! `Command`. Grounded on `client_handler.rs::start`'s accept-buffer-dispatch
//! shape, replacing its byte-buffer-parsed-in-place loop with the pull
//! parser and replacing its `RedisCommand`/`RedisResponse` pair with
//! `Command`/`Reply`.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;

use crate::command::{Caller, Command, ExecCtx, Reply};
use crate::config::Config;
use crate::conn::SharedStream;
use crate::replication::ReplicationState;
use crate::resp::Frame;
use crate::store::Db;

pub fn run(config: Arc<Config>, db: Arc<Db>, repl: Arc<ReplicationState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.port))?;
    println!("listening on 0.0.0.0:{}", config.port);
    run_with_listener(listener, config, db, repl)
}

/// Accept loop over an already-bound listener, split out from [`run`] so
/// tests can bind an ephemeral port (`127.0.0.1:0`) instead of a fixed one.
pub fn run_with_listener(
    listener: TcpListener,
    config: Arc<Config>,
    db: Arc<Db>,
    repl: Arc<ReplicationState>,
) -> std::io::Result<()> {
    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                let config = Arc::clone(&config);
                let db = Arc::clone(&db);
                let repl = Arc::clone(&repl);
                thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, config, db, repl) {
                        eprintln!("[server] connection error: {}", e);
                    }
                });
            }
            Err(e) => eprintln!("[server] accept error: {}", e),
        }
    }
    Ok(())
}

fn handle_connection(stream: TcpStream, config: Arc<Config>, db: Arc<Db>, repl: Arc<ReplicationState>) -> std::io::Result<()> {
    let peer = stream.peer_addr()?;
    println!("[server] accepted connection from {}", peer);

    let shared = SharedStream::new(stream.try_clone()?);
    let mut reader = crate::resp::FrameReader::new(stream);

    loop {
        let frame = match reader.next_frame() {
            Ok(Some((frame, _))) => frame,
            Ok(None) => {
                println!("[server] connection from {} closed", peer);
                return Ok(());
            }
            Err(e) => {
                eprintln!("[server] protocol error from {}: {}", peer, e);
                return Ok(());
            }
        };

        let items = match frame {
            Frame::Command(items) => items,
            other => {
                eprintln!("[server] ignoring non-command frame from {}: {:?}", peer, other);
                continue;
            }
        };

        let cmd = match Command::parse(&items, encode_raw(&items)) {
            Ok(cmd) => cmd,
            Err(e) => {
                shared.write_all(&crate::resp::RespValue::error(e.reply_text()).encode())?;
                continue;
            }
        };

        let ctx = ExecCtx {
            db: &db,
            config: &config,
            repl: &repl,
            caller: Caller::Client(&shared),
            link_offset: 0,
        };

        match cmd.execute(&ctx) {
            Ok(Reply::Value(v)) => shared.write_all(&v.encode())?,
            Ok(Reply::AlreadySent) => {
                // PSYNC: the handler already wrote FULLRESYNC + RDB and
                // registered this connection as a follower. Hand off to a
                // loop that just keeps the socket open for propagated
                // writes and inbound REPLCONF ACKs.
                return follower_loop(reader, repl, peer);
            }
            Ok(Reply::None) => {}
            Err(e) => {
                shared.write_all(&crate::resp::RespValue::error(e.reply_text()).encode())?;
            }
        }
    }
}

/// After PSYNC, the connection is driven by the replication layer pushing
/// writes; this thread just keeps draining REPLCONF ACK frames so the
/// socket's read side doesn't back up, and exits when the follower hangs
/// up.
fn follower_loop(
    mut reader: crate::resp::FrameReader<TcpStream>,
    repl: Arc<ReplicationState>,
    peer: std::net::SocketAddr,
) -> std::io::Result<()> {
    loop {
        match reader.next_frame() {
            Ok(Some((Frame::Command(items), _))) => {
                if let Ok(Command::ReplConfAck(_)) = Command::parse(&items, Bytes::new()) {
                    repl.record_ack();
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                println!("[server] follower {} disconnected", peer);
                return Ok(());
            }
            Err(e) => {
                eprintln!("[server] follower {} protocol error: {}", peer, e);
                return Ok(());
            }
        }
    }
}

fn encode_raw(items: &[crate::resp::RespValue]) -> Bytes {
    Bytes::from(crate::resp::RespValue::Array(items.to_vec()).encode())
}
