pub use crate::Result;
use std::path::PathBuf;

/// KvStore
pub mod kvstore;
/// LazyKvStore
pub mod lazy;
mod record;

pub use kvstore::KvStore;
pub use lazy::LazyKvStore;

/// KvsEngine trait shared by the eager and the lazily opened store.
///
/// Every method takes `&self`: one engine is built at startup and shared
/// between request handlers, usually behind an `Arc`.
pub trait KvsEngine: Send + Sync {
    /// Path of the log file backing the store
    fn locate(&self) -> Result<PathBuf>;

    /// `Ok(None)` when the key was never written
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Returns once the record is on disk
    fn put(&self, key: String, value: String) -> Result<()>;
}
