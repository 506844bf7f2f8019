//! Exercises the RDB reader against a snapshot file on disk, the same path
//! `main.rs::load_rdb` takes at startup (spec.md section 6's "Persisted
//! state").

use std::io::Write;

use redikv::store::Db;

#[test]
fn keys_from_a_snapshot_file_are_queryable_after_loading() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.rdb");

    let mut buf = Vec::new();
    buf.extend_from_slice(b"REDIS0011");
    buf.push(0xFC); // expiry in ms
    buf.extend_from_slice(&4_102_444_800_000u64.to_le_bytes()); // far future
    buf.push(0x00); // string
    buf.push(3);
    buf.extend_from_slice(b"foo");
    buf.push(3);
    buf.extend_from_slice(b"bar");
    buf.push(0x00); // no-expiry string
    buf.push(3);
    buf.extend_from_slice(b"baz");
    buf.push(3);
    buf.extend_from_slice(b"qux");
    buf.push(0xFF);
    buf.extend_from_slice(&[0u8; 8]);

    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&buf).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let entries = redikv::rdb::parse(&bytes).unwrap();
    assert_eq!(entries.len(), 2);

    let db = Db::new();
    for entry in entries {
        db.load_string(entry.key, entry.value, entry.expires_at_ms);
    }

    assert_eq!(db.get("foo"), Some(bytes::Bytes::from_static(b"bar")));
    assert_eq!(db.get("baz"), Some(bytes::Bytes::from_static(b"qux")));
    assert_eq!(db.get("missing"), None);
}

#[test]
fn a_missing_or_corrupt_file_falls_back_to_an_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("does-not-exist.rdb");
    assert!(std::fs::read(&path).is_err());

    let garbage = b"not an rdb file at all";
    assert!(redikv::rdb::parse(garbage).is_err());
}
