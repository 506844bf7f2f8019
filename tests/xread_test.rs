//! XREAD semantics (spec.md section 4.4): `$` resolution, multi-stream
//! reads, non-blocking nil vs. populated results, and the protocol-level
//! blocking path over a real socket.

mod utils;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use redikv::replication::ReplicationState;
use redikv::store::stream::StreamId;
use redikv::store::Db;
use utils::{connect, read_reply, send, spawn_server};

fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[test]
fn dollar_resolves_to_the_last_id_at_call_time() {
    let db = Db::new();
    db.xadd("mystream", "1-0", fields(&[])).unwrap();
    db.xadd("mystream", "2-0", fields(&[])).unwrap();
    assert_eq!(db.resolve_dollar("mystream"), StreamId { ms: 2, seq: 0 });
}

#[test]
fn dollar_on_empty_or_absent_stream_is_the_sentinel() {
    let db = Db::new();
    assert_eq!(db.resolve_dollar("absent"), StreamId::ZERO);
}

#[test]
fn xread_once_reports_one_entry_list_per_requested_key() {
    let db = Db::new();
    db.xadd("stream1", "1-0", fields(&[("field1", "value1")])).unwrap();
    db.xadd("stream2", "1-0", fields(&[("field1", "value2")])).unwrap();

    let keys = vec!["stream1".to_string(), "stream2".to_string()];

    let both = db
        .xread_once(&keys, &[StreamId::ZERO, StreamId::ZERO])
        .unwrap();
    assert_eq!(both.len(), 2);
    assert_eq!(both[0].0, "stream1");
    assert_eq!(both[0].1[0].1, fields(&[("field1", "value1")]));
    assert_eq!(both[1].0, "stream2");

    // stream2 has nothing after 1-0: the key is still represented, with an
    // empty entry list, so the caller can tell this apart from "not
    // requested" and fold the whole response to the null bulk (spec.md
    // section 4.4).
    let one_empty = db
        .xread_once(&keys, &[StreamId::ZERO, StreamId { ms: 1, seq: 0 }])
        .unwrap();
    assert_eq!(one_empty.len(), 2);
    assert_eq!(one_empty[0].0, "stream1");
    assert!(!one_empty[0].1.is_empty());
    assert_eq!(one_empty[1].0, "stream2");
    assert!(one_empty[1].1.is_empty());

    let none = db
        .xread_once(&keys, &[StreamId { ms: 1, seq: 0 }, StreamId { ms: 1, seq: 0 }])
        .unwrap();
    assert_eq!(none.len(), 2);
    assert!(none.iter().all(|(_, entries)| entries.is_empty()));
}

#[test]
fn xread_against_a_string_key_is_wrong_type() {
    let db = Db::new();
    db.set("k", bytes::Bytes::from_static(b"v"), None);
    let err = db.xread_once(&["k".to_string()], &[StreamId::ZERO]).unwrap_err();
    assert!(matches!(err, redikv::error::RedisError::Stream(_)));
}

#[test]
fn xread_is_null_bulk_when_any_requested_stream_has_nothing_new() {
    use redikv::command::{Caller, Command, ExecCtx, Reply};
    use redikv::config::Config;
    use redikv::replication::ReplicationState;
    use redikv::resp::RespValue;

    let db = Db::new();
    db.xadd("s1", "1-0", fields(&[("a", "1")])).unwrap();
    db.xadd("s1", "2-0", fields(&[("a", "2")])).unwrap();
    db.xadd("s2", "9-9", fields(&[("b", "1")])).unwrap();

    let config = Config { port: 6379, dir: ".".into(), dbfilename: "dump.rdb".into(), replicaof: None };
    let repl = ReplicationState::new_master();
    let ctx = ExecCtx { db: &db, config: &config, repl: &repl, caller: Caller::ReplicaLink, link_offset: 0 };

    // s1 has grown past "0-0"; s2 has nothing after its own last id "9-9".
    let cmd = Command::XRead {
        block: None,
        keys: vec!["s1".into(), "s2".into()],
        ids: vec!["0-0".into(), "9-9".into()],
    };
    let reply = cmd.execute(&ctx).unwrap();
    assert!(matches!(reply, Reply::Value(RespValue::BulkString(None))));
}

#[test]
fn blocking_xread_over_a_socket_sees_data_added_after_the_call() {
    let db = Arc::new(Db::new());
    db.xadd("mystream", "*", fields(&[("field1", "old_value")])).unwrap();
    let port = spawn_server(Arc::clone(&db), Arc::new(ReplicationState::new_master()));
    let mut client = connect(port);

    let db_writer = Arc::clone(&db);
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        db_writer.xadd("mystream", "*", fields(&[("field1", "new_value")])).unwrap();
    });

    send(
        &mut client,
        b"*6\r\n$5\r\nXREAD\r\n$5\r\nBLOCK\r\n$4\r\n1000\r\n$7\r\nSTREAMS\r\n$8\r\nmystream\r\n$1\r\n$\r\n",
    );
    let start = Instant::now();
    let response = read_reply(&mut client);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(response.contains("mystream"));
    assert!(response.contains("new_value"));
    assert!(!response.contains("old_value"));
}

#[test]
fn non_blocking_xread_with_dollar_id_is_nil() {
    let port = spawn_server(Arc::new(Db::new()), Arc::new(ReplicationState::new_master()));
    let mut client = connect(port);
    send(&mut client, b"*4\r\n$5\r\nXREAD\r\n$7\r\nSTREAMS\r\n$8\r\nmystream\r\n$1\r\n$\r\n");
    assert_eq!(read_reply(&mut client), "$-1\r\n");
}

#[test]
fn blocking_xread_times_out_to_nil() {
    let port = spawn_server(Arc::new(Db::new()), Arc::new(ReplicationState::new_master()));
    let mut client = connect(port);
    send(
        &mut client,
        b"*6\r\n$5\r\nXREAD\r\n$5\r\nBLOCK\r\n$3\r\n100\r\n$7\r\nSTREAMS\r\n$8\r\nmystream\r\n$1\r\n$\r\n",
    );
    let start = Instant::now();
    let response = read_reply(&mut client);
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(response, "$-1\r\n");
}
