//! End-to-end scenarios from spec.md section 8: concurrent clients talking
//! RESP over real sockets to the thread-per-connection server.

mod utils;

use std::sync::Arc;

use redikv::replication::ReplicationState;
use redikv::store::Db;
use utils::{connect, read_reply, send, spawn_server};

#[test]
fn ping_replies_pong() {
    let port = spawn_server(Arc::new(Db::new()), Arc::new(ReplicationState::new_master()));
    let mut client = connect(port);
    send(&mut client, b"*1\r\n$4\r\nPING\r\n");
    assert_eq!(read_reply(&mut client), "+PONG\r\n");
}

#[test]
fn set_then_get_round_trips() {
    let port = spawn_server(Arc::new(Db::new()), Arc::new(ReplicationState::new_master()));
    let mut client = connect(port);
    send(&mut client, b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
    assert_eq!(read_reply(&mut client), "+OK\r\n");
    send(&mut client, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
    assert_eq!(read_reply(&mut client), "$3\r\nbar\r\n");
}

#[test]
fn set_with_px_expires() {
    let port = spawn_server(Arc::new(Db::new()), Arc::new(ReplicationState::new_master()));
    let mut client = connect(port);
    send(&mut client, b"*5\r\n$3\r\nSET\r\n$1\r\nx\r\n$1\r\n1\r\n$2\r\nPX\r\n$3\r\n100\r\n");
    assert_eq!(read_reply(&mut client), "+OK\r\n");
    std::thread::sleep(std::time::Duration::from_millis(200));
    send(&mut client, b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n");
    assert_eq!(read_reply(&mut client), "$-1\r\n");
}

#[test]
fn concurrent_clients_see_each_others_writes() {
    let db = Arc::new(Db::new());
    let repl = Arc::new(ReplicationState::new_master());
    let port = spawn_server(db, repl);

    let handles: Vec<_> = (0..3)
        .map(|i| {
            std::thread::spawn(move || {
                let mut client = connect(port);
                let key = format!("key{i}");
                let value = format!("value{i}");
                let set = format!(
                    "*3\r\n$3\r\nSET\r\n${}\r\n{}\r\n${}\r\n{}\r\n",
                    key.len(),
                    key,
                    value.len(),
                    value
                );
                send(&mut client, set.as_bytes());
                assert_eq!(read_reply(&mut client), "+OK\r\n");

                let get = format!("*2\r\n$3\r\nGET\r\n${}\r\n{}\r\n", key.len(), key);
                send(&mut client, get.as_bytes());
                let expect = format!("${}\r\n{}\r\n", value.len(), value);
                assert_eq!(read_reply(&mut client), expect);
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn unknown_command_is_a_noop_error() {
    let port = spawn_server(Arc::new(Db::new()), Arc::new(ReplicationState::new_master()));
    let mut client = connect(port);
    send(&mut client, b"*1\r\n$4\r\nFAKE\r\n");
    let reply = read_reply(&mut client);
    assert!(reply.starts_with('-'));
    assert!(reply.contains("NOOP"));
}
