pub mod config;
pub mod errors;
pub mod kvsengine;

pub use config::Config;
pub use errors::{KvsError, Result};
pub use kvsengine::{KvStore, KvsEngine, LazyKvStore};
