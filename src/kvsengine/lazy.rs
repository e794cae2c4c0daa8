use crate::config::Config;
use crate::errors::*;
use crate::kvsengine::*;
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use tracing::debug;

/// A store that opens its log on first use.
///
/// The first call to `locate`, `get` or `put` opens the log; concurrent
/// first calls wait for that single initialization. If opening fails the
/// call returns [`KvsError::Initialization`] and the handle stays
/// uninitialized, so no operation ever runs without a log behind it and
/// the next call tries again.
pub struct LazyKvStore {
    config: Config,
    store: OnceCell<KvStore>,
}

impl LazyKvStore {
    pub fn new(config: Config) -> LazyKvStore {
        LazyKvStore {
            config,
            store: OnceCell::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.store.get().is_some()
    }

    /// The opened store, opening it if needed
    pub fn store(&self) -> Result<&KvStore> {
        self.store.get_or_try_init(|| {
            debug!("Initializing store from {:?}", self.config);
            KvStore::open_with(self.config.clone())
        })
    }
}

impl Default for LazyKvStore {
    fn default() -> LazyKvStore {
        LazyKvStore::new(Config::default())
    }
}

impl KvsEngine for LazyKvStore {
    fn locate(&self) -> Result<PathBuf> {
        Ok(self.store()?.locate().to_path_buf())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.store()?.get(key)
    }

    fn put(&self, key: String, value: String) -> Result<()> {
        self.store()?.put(key, value)
    }
}
