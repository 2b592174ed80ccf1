use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use skizze_manager::{ManagerOptions, MIN_SAVE_THRESHOLD};

pub const DEFAULT_PORT: u16 = 3596;

/// Config of the skizze server. Every flag falls back to its SKZ_ environment
/// variable, then to the default.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Parser)]
#[clap(about, version, author)]
pub struct Config {
    /// directory of the domain metadata store
    #[clap(long, env = "SKZ_INFO_DIR", default_value = "~/.skizze/info")]
    pub info_dir: String,

    /// directory of the domain state blobs
    #[clap(long, env = "SKZ_DATA_DIR", default_value = "~/.skizze/data")]
    pub data_dir: String,

    #[clap(long, default_value = "0.0.0.0")]
    pub host: String,

    #[clap(short, long, env = "SKZ_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// seconds between two flushes of dirty domains, at least 3
    #[clap(long, env = "SKZ_SAVE_THRESHOLD_SECS", default_value_t = 3)]
    pub save_threshold_secs: u64,

    /// maximum number of domains held in memory, 0 for unbounded
    #[clap(long, env = "SKZ_CACHE_CAPACITY", default_value_t = 0)]
    pub cache_capacity: usize,

    /// estimated bytes of sketches held in memory, 0 for unbounded
    #[clap(long, env = "SKZ_CACHE_BYTES", default_value_t = 0)]
    pub cache_bytes: usize,

    #[clap(short, long)]
    pub debug: bool,
}

impl Config {
    pub fn info_path(&self) -> PathBuf {
        expand_home(&self.info_dir)
    }

    pub fn data_path(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    pub fn save_threshold(&self) -> Duration {
        Duration::from_secs(self.save_threshold_secs).max(MIN_SAVE_THRESHOLD)
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions::new(self.save_threshold(), self.cache_capacity)
            .with_cache_bytes(self.cache_bytes)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host.trim(), self.port).parse()
    }
}

/// expand_home replaces a leading `~/` with the home directory of the user.
/// Paths are kept as they are when HOME is unknown.
pub fn expand_home(path: &str) -> PathBuf {
    let path = path.trim();
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use clap::Parser;

    use crate::config::{expand_home, Config, DEFAULT_PORT};

    #[test]
    fn test_flags() {
        let config = Config::parse_from([
            "skizze",
            "--info-dir",
            "/var/lib/skizze/info",
            "--data-dir",
            "/var/lib/skizze/data",
            "-p",
            "7596",
            "--save-threshold-secs",
            "1",
            "--cache-capacity",
            "64",
            "--cache-bytes",
            "1048576",
        ]);

        assert_eq!(config.info_path(), PathBuf::from("/var/lib/skizze/info"));
        assert_eq!(config.data_path(), PathBuf::from("/var/lib/skizze/data"));
        assert_eq!(config.port, 7596);
        assert_eq!(config.save_threshold(), Duration::from_secs(3));

        let opts = config.manager_options();
        assert_eq!(opts.save_threshold(), Duration::from_secs(3));
        assert_eq!(opts.cache_capacity(), 64);
        assert_eq!(opts.cache_bytes(), 1 << 20);
        assert_eq!(config.listen_addr().unwrap().port(), 7596);
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["skizze", "--save-threshold-secs", "10"]);
        // the environment may override the rest
        assert_eq!(config.save_threshold(), Duration::from_secs(10));
        if std::env::var_os("SKZ_PORT").is_none() {
            assert_eq!(config.port, DEFAULT_PORT);
        }
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/tmp/x"), PathBuf::from("/tmp/x"));
        assert_eq!(expand_home(" rel/x "), PathBuf::from("rel/x"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expand_home("~/.skizze"), PathBuf::from(home).join(".skizze"));
        }
    }
}
