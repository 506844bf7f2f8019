use std::fs;
use std::sync::Arc;

use redikv::config::Config;
use redikv::rdb;
use redikv::replica;
use redikv::replication::ReplicationState;
use redikv::server;
use redikv::store::Db;

fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_args());
    let db = Arc::new(Db::new());
    let repl = Arc::new(if config.is_replica() {
        ReplicationState::new_replica()
    } else {
        ReplicationState::new_master()
    });

    load_rdb(&config, &db);

    if config.is_replica() {
        let config = Arc::clone(&config);
        let db = Arc::clone(&db);
        let repl = Arc::clone(&repl);
        std::thread::spawn(move || {
            if let Err(e) = replica::run(config, db, repl) {
                eprintln!("[replica] connection to master failed: {}", e);
                std::process::exit(1);
            }
        });
    }

    server::run(config, db, repl)?;
    Ok(())
}

/// Seed the store from the configured RDB file. Per spec.md section 4.2, any
/// failure to read or parse it falls back to an empty store rather than
/// aborting startup.
fn load_rdb(config: &Config, db: &Db) {
    let path = config.rdb_path();
    let bytes = match fs::read(&path) {
        Ok(b) => b,
        Err(_) => {
            println!("no RDB file at {}, starting with an empty dataset", path.display());
            return;
        }
    };
    match rdb::parse(&bytes) {
        Ok(entries) => {
            println!("loaded {} keys from {}", entries.len(), path.display());
            for entry in entries {
                db.load_string(entry.key, entry.value, entry.expires_at_ms);
            }
        }
        Err(e) => {
            eprintln!("failed to parse {}, starting with an empty dataset: {}", path.display(), e);
        }
    }
}
