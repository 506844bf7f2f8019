//! Shared test helpers: spin up a real `redikv` server on an ephemeral
//! loopback port, and read RESP replies off a plain `TcpStream`. Using real
//! sockets instead of a hand-rolled mock keeps these tests exercising the
//! actual accept-loop/thread-per-connection path from `server.rs`.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use redikv::config::Config;
use redikv::replication::ReplicationState;
use redikv::store::Db;

pub fn test_config() -> Config {
    Config {
        port: 0,
        dir: ".".into(),
        dbfilename: "dump.rdb".into(),
        replicaof: None,
    }
}

/// Binds an ephemeral port, starts the accept loop on a background thread,
/// and returns the port clients should connect to.
pub fn spawn_server(db: Arc<Db>, repl: Arc<ReplicationState>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().unwrap().port();
    let config = Arc::new(Config { port, ..test_config() });
    thread::spawn(move || {
        redikv::server::run_with_listener(listener, config, db, repl).unwrap();
    });
    port
}

pub fn connect(port: u16) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)) {
            return stream;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("could not connect to test server on port {port}");
}

/// Reads exactly one RESP reply's worth of bytes off the stream. Good enough
/// for these tests' single-frame replies; blocks until at least one byte of
/// a complete frame has arrived, with a generous read timeout.
pub fn read_reply(stream: &mut TcpStream) -> String {
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).expect("read reply");
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

pub fn send(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).unwrap();
}
