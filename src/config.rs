//! Runtime configuration (spec.md section 4.7): CLI flags via `clap`,
//! grounded on `examples/yyin-dev-codecrafters-redis/src/main.rs`'s `Cli`
//! struct rather than the teacher's hand-rolled `RedisConfig::new()`, which
//! never actually reads `std::env::args`.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(long, default_value_t = 6379)]
    port: u16,

    #[arg(long = "replicaof", value_names = &["MASTER_HOST", "MASTER_PORT"], num_args = 2)]
    replicaof: Option<Vec<String>>,

    #[arg(long, default_value = "./rdb")]
    dir: String,

    #[arg(long, default_value = "dump.rdb")]
    dbfilename: String,
}

pub struct Config {
    pub port: u16,
    pub dir: String,
    pub dbfilename: String,
    pub replicaof: Option<(String, u16)>,
}

impl Config {
    pub fn from_args() -> Self {
        let cli = Cli::parse();
        let replicaof = cli.replicaof.map(|parts| {
            let port = parts[1]
                .parse()
                .unwrap_or_else(|_| panic!("--replicaof port must be numeric, got '{}'", parts[1]));
            (parts[0].clone(), port)
        });
        Config {
            port: cli.port,
            dir: cli.dir,
            dbfilename: cli.dbfilename,
            replicaof,
        }
    }

    pub fn is_replica(&self) -> bool {
        self.replicaof.is_some()
    }

    pub fn rdb_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.dir).join(&self.dbfilename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_master() {
        let config = Config {
            port: 6379,
            dir: ".".into(),
            dbfilename: "dump.rdb".into(),
            replicaof: None,
        };
        assert!(!config.is_replica());
    }
}
