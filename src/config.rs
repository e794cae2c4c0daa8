use crate::errors::*;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File name used when the configured path is a directory
pub const DEFAULT_FILE_NAME: &str = "rpkv.db";

/// Stale bytes allowed in the log before a put triggers compaction
pub const DEFAULT_COMPACTION_THRESHOLD: u64 = 1024 * 1024;

/// Settings used to open a store.
///
/// `Config::default()` points at `./rpkv.db`, syncs every put and compacts
/// once a megabyte of overwritten records has piled up.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Backing file, or a directory that will hold `rpkv.db`
    pub path: PathBuf,
    /// Call `sync_data` before acknowledging a put
    pub sync_writes: bool,
    /// 0 disables automatic compaction
    pub compaction_threshold: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            path: Path::new(".").join(DEFAULT_FILE_NAME),
            sync_writes: true,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }
}

impl Config {
    pub fn new<P: Into<PathBuf>>(path: P) -> Config {
        Config {
            path: path.into(),
            ..Config::default()
        }
    }

    /// Build a config from `RPKV_PATH`, `RPKV_SYNC_WRITES` and
    /// `RPKV_COMPACTION_THRESHOLD`, falling back to the defaults.
    pub fn from_env() -> Result<Config> {
        let mut config = Config::default();
        if let Some(path) = env::var_os("RPKV_PATH") {
            if !path.is_empty() {
                config.path = PathBuf::from(path);
            }
        }
        if let Some(sync) = read_var::<bool>("RPKV_SYNC_WRITES")? {
            config.sync_writes = sync;
        }
        if let Some(threshold) = read_var::<u64>("RPKV_COMPACTION_THRESHOLD")? {
            config.compaction_threshold = threshold;
        }
        Ok(config)
    }

    pub fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Config {
        self.path = path.into();
        self
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Config {
        self.sync_writes = sync_writes;
        self
    }

    pub fn with_compaction_threshold(mut self, threshold: u64) -> Config {
        self.compaction_threshold = threshold;
        self
    }

    /// The log file this config resolves to. A path naming an existing
    /// directory, or ending with a separator, gets `rpkv.db` appended.
    pub fn log_path(&self) -> PathBuf {
        let names_dir = self
            .path
            .as_os_str()
            .to_string_lossy()
            .ends_with(std::path::is_separator);
        if names_dir || self.path.is_dir() {
            self.path.join(DEFAULT_FILE_NAME)
        } else {
            self.path.clone()
        }
    }
}

fn read_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| KvsError::Config(format!("{} has an invalid value: {:?}", name, raw))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => {
            Err(KvsError::Config(format!("{} is not valid unicode", name)))
        }
    }
}
