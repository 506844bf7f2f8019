//! Replication (spec.md section 4.6): propagation fidelity and WAIT/ACK
//! coordination, driven over real sockets — a "client" connection and a
//! "follower" connection (registered via PSYNC) against the same server.

mod utils;

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use redikv::replication::ReplicationState;
use redikv::store::Db;
use utils::{connect, read_reply, send, spawn_server};

/// Registers `stream` as a follower via the PSYNC handshake and discards the
/// FULLRESYNC simple string + RDB bulk that precede the replicated stream.
fn psync_as_follower(stream: &mut std::net::TcpStream) {
    send(stream, b"*3\r\n$5\r\nPSYNC\r\n$1\r\n?\r\n$2\r\n-1\r\n");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).expect("read FULLRESYNC + RDB");
    let text = String::from_utf8_lossy(&buf[..n]);
    assert!(text.starts_with("+FULLRESYNC"));
}

#[test]
fn set_is_propagated_verbatim_to_every_follower() {
    let db = Arc::new(Db::new());
    let repl = Arc::new(ReplicationState::new_master());
    let port = spawn_server(db, repl);

    let mut follower = connect(port);
    psync_as_follower(&mut follower);

    let mut client = connect(port);
    let set_bytes: &[u8] = b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";
    send(&mut client, set_bytes);
    assert_eq!(read_reply(&mut client), "+OK\r\n");

    follower.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 256];
    let n = follower.read(&mut buf).expect("read propagated SET");
    assert_eq!(&buf[..n], set_bytes);
}

#[test]
fn wait_returns_ack_count_once_the_follower_responds() {
    let db = Arc::new(Db::new());
    let repl = Arc::new(ReplicationState::new_master());
    let port = spawn_server(db, repl);

    let mut follower = connect(port);
    psync_as_follower(&mut follower);

    let mut client = connect(port);
    send(&mut client, b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\n123\r\n");
    assert_eq!(read_reply(&mut client), "+OK\r\n");

    // Drain the propagated SET off the follower socket before it sees GETACK.
    follower.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 256];
    follower.read(&mut buf).unwrap();

    send(&mut client, b"*3\r\n$4\r\nWAIT\r\n$1\r\n1\r\n$3\r\n500\r\n");

    // The follower should have received a GETACK broadcast by now; reply ACK.
    let n = follower.read(&mut buf).expect("read GETACK broadcast");
    assert!(String::from_utf8_lossy(&buf[..n]).contains("GETACK"));
    send(&mut follower, b"*3\r\n$8\r\nREPLCONF\r\n$3\r\nACK\r\n$2\r\n31\r\n");

    assert_eq!(read_reply(&mut client), ":1\r\n");
}

#[test]
fn wait_times_out_to_zero_with_no_followers() {
    let db = Arc::new(Db::new());
    let repl = Arc::new(ReplicationState::new_master());
    let port = spawn_server(db, repl);

    let mut client = connect(port);
    send(&mut client, b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\n123\r\n");
    assert_eq!(read_reply(&mut client), "+OK\r\n");

    send(&mut client, b"*3\r\n$4\r\nWAIT\r\n$1\r\n1\r\n$2\r\n50\r\n");
    let start = std::time::Instant::now();
    assert_eq!(read_reply(&mut client), ":0\r\n");
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn info_reports_master_role_and_replid() {
    let db = Arc::new(Db::new());
    let repl = Arc::new(ReplicationState::new_master());
    let port = spawn_server(db, repl);
    let mut client = connect(port);
    send(&mut client, b"*1\r\n$4\r\nINFO\r\n");
    let reply = read_reply(&mut client);
    assert!(reply.contains("role:master"));
    assert!(reply.contains("master_replid:"));
}
