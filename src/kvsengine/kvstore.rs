use crate::config::Config;
use crate::errors::*;
use crate::kvsengine::record::{self, KvIndex, KvRecord};
use crate::kvsengine::*;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Append side of the log. Only touched with the writer lock held, which
/// serializes puts and compaction.
struct LogWriter {
    file: File,
    /// Length of the committed log; the next record lands here
    offset: u64,
    stale_bytes: u64,
    /// After a failed automatic compaction, wait until stale bytes pass this
    compact_after: u64,
    /// Set when a failed append could not be rolled back
    poisoned: bool,
}

/// What readers need: the index and a handle to read records through.
/// Both are swapped together by compaction.
struct IndexState {
    index: HashMap<String, KvIndex>,
    reader: File,
}

/// Main structure that holds our key/value store.
///
/// Everything lives in one append-only log file. An in-memory index maps
/// each key to the offset and length of its latest record. Puts append to
/// the log and only then publish the new offset in the index, so a reader
/// never sees an entry for bytes that are not on disk yet.
///
/// Gets share a read lock on the index and read through positional reads,
/// so they never wait on each other.
pub struct KvStore {
    path: PathBuf,
    config: Config,
    writer: Mutex<LogWriter>,
    state: RwLock<IndexState>,
}

impl KvStore {
    /// Open the store at `path` with default settings.
    /// See [`KvStore::open_with`].
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<KvStore> {
        KvStore::open_with(Config::new(path))
    }

    /// Open (or create) the log the config points at and rebuild the index
    /// by replaying it. A torn record at the end of the log, left by a
    /// crash in the middle of an append, is cut off.
    ///
    /// Any failure is reported as [`KvsError::Initialization`].
    pub fn open_with(config: Config) -> Result<KvStore> {
        let path = config.log_path();
        KvStore::load(path.clone(), config).map_err(|err| {
            error!("Could not open store at {}: {}", path.display(), err);
            KvsError::Initialization {
                path,
                source: Box::new(err),
            }
        })
    }

    fn load(path: PathBuf, config: Config) -> Result<KvStore> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let reader = File::open(&path)?;
        let file_len = file.metadata()?.len();

        let replay = record::replay(&reader, file_len)?;
        if replay.valid_len < file_len {
            warn!(
                "Truncating {} bytes of corrupt tail from {}",
                file_len - replay.valid_len,
                path.display()
            );
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        if file_len == 0 {
            // Fresh log: make its directory entry durable too
            sync_parent_dir(&path);
        }
        info!(
            "Store opened at {} with {} keys ({} stale bytes)",
            path.display(),
            replay.index.len(),
            replay.stale_bytes
        );

        Ok(KvStore {
            path,
            config,
            writer: Mutex::new(LogWriter {
                file,
                offset: replay.valid_len,
                stale_bytes: replay.stale_bytes,
                compact_after: 0,
                poisoned: false,
            }),
            state: RwLock::new(IndexState {
                index: replay.index,
                reader,
            }),
        })
    }

    /// Path of the log file
    pub fn locate(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let state = self.state.read();
        match state.index.get(key) {
            Some(idx) => {
                let record = record::read_record(&state.reader, *idx)?;
                if record.key != key {
                    error!(
                        "Index for {:?} points at a record for {:?}",
                        key, record.key
                    );
                    return Err(KvsError::CorruptRecord { offset: idx.offset });
                }
                Ok(Some(record.value))
            }
            None => {
                debug!("No index record was found for {:?}", key);
                Ok(None)
            }
        }
    }

    /// Append the record, flush it, then point the index at it. On failure
    /// the log is cut back to its previous length and the index is left
    /// untouched.
    pub fn put(&self, key: String, value: String) -> Result<()> {
        let record = KvRecord::new(key, value);
        let bytes = record.encode()?;

        let mut writer = self.writer.lock();
        if writer.poisoned {
            return Err(KvsError::LogPoisoned {
                path: self.path.clone(),
            });
        }

        let offset = writer.offset;
        if let Err(source) = self.append(&mut writer.file, &bytes) {
            error!("Write at offset {} failed: {}", offset, source);
            self.rollback(&mut writer);
            return Err(KvsError::Write {
                path: self.path.clone(),
                source,
            });
        }
        writer.offset += bytes.len() as u64;

        let length = bytes.len() as u64;
        let previous = {
            let mut state = self.state.write();
            state.index.insert(record.key, KvIndex { offset, length })
        };
        if let Some(old) = previous {
            writer.stale_bytes += old.length;
        }

        let threshold = self.config.compaction_threshold;
        if threshold > 0 && writer.stale_bytes > threshold.max(writer.compact_after) {
            // The put itself is committed whatever happens here
            if let Err(err) = self.compact_locked(&mut writer) {
                writer.compact_after = writer.stale_bytes + threshold;
                warn!(
                    "Automatic compaction failed, next attempt past {} stale bytes: {}",
                    writer.compact_after, err
                );
            }
        }
        Ok(())
    }

    fn append(&self, file: &mut File, bytes: &[u8]) -> io::Result<()> {
        file.write_all(bytes)?;
        if self.config.sync_writes {
            file.sync_data()?;
        }
        Ok(())
    }

    fn rollback(&self, writer: &mut LogWriter) {
        match writer.file.set_len(writer.offset) {
            Ok(()) => debug!("Log rolled back to {} bytes", writer.offset),
            Err(err) => {
                error!(
                    "Could not roll back {} to {} bytes, refusing further writes: {}",
                    self.path.display(),
                    writer.offset,
                    err
                );
                writer.poisoned = true;
            }
        }
    }

    /// Rewrite the log keeping only the latest record of every key.
    ///
    /// Puts wait for the compaction to finish. Gets keep running against
    /// the old log until the new one is swapped in.
    pub fn compact(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        if writer.poisoned {
            return Err(KvsError::LogPoisoned {
                path: self.path.clone(),
            });
        }
        self.compact_locked(&mut writer)
    }

    fn compact_locked(&self, writer: &mut LogWriter) -> Result<()> {
        let compact_path = compaction_path(&self.path);
        let copied = self.write_compacted(&compact_path);
        let (new_index, new_len) = match copied {
            Ok(copied) => copied,
            Err(err) => {
                let _ = fs::remove_file(&compact_path);
                return Err(err);
            }
        };

        let mut state = self.state.write();
        if let Err(err) = fs::rename(&compact_path, &self.path) {
            let _ = fs::remove_file(&compact_path);
            return Err(err.into());
        }
        // From here the old handles point at an unlinked file
        let reopened = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .and_then(|file| Ok((file, File::open(&self.path)?)));
        let (file, reader) = match reopened {
            Ok(handles) => handles,
            Err(err) => {
                error!("Could not reopen {} after compaction: {}", self.path.display(), err);
                writer.poisoned = true;
                return Err(err.into());
            }
        };
        sync_parent_dir(&self.path);

        info!(
            "Compacted {}: {} -> {} bytes",
            self.path.display(),
            writer.offset,
            new_len
        );
        state.index = new_index;
        state.reader = reader;
        writer.file = file;
        writer.offset = new_len;
        writer.stale_bytes = 0;
        writer.compact_after = 0;
        Ok(())
    }

    /// Copy every live record into `target`, in log order
    fn write_compacted(&self, target: &Path) -> Result<(HashMap<String, KvIndex>, u64)> {
        let mut out = BufWriter::new(
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(target)?,
        );

        let state = self.state.read();
        let mut live: Vec<(&String, &KvIndex)> = state.index.iter().collect();
        live.sort_by_key(|(_, idx)| idx.offset);

        let mut new_index = HashMap::with_capacity(live.len());
        let mut pos: u64 = 0;
        let mut buf = Vec::new();
        for (key, idx) in live {
            buf.resize(idx.length as usize, 0);
            record::read_exact_at(&state.reader, &mut buf, idx.offset)?;
            out.write_all(&buf)?;
            new_index.insert(
                key.clone(),
                KvIndex {
                    offset: pos,
                    length: idx.length,
                },
            );
            pos += idx.length;
        }
        out.flush()?;
        out.get_ref().sync_all()?;
        Ok((new_index, pos))
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.state.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes in the log taken by overwritten records
    pub fn stale_bytes(&self) -> u64 {
        self.writer.lock().stale_bytes
    }
}

impl KvsEngine for KvStore {
    fn locate(&self) -> Result<PathBuf> {
        Ok(self.path.clone())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        KvStore::get(self, key)
    }

    fn put(&self, key: String, value: String) -> Result<()> {
        KvStore::put(self, key, value)
    }
}

fn compaction_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".compact");
    PathBuf::from(name)
}

/// Make the rename itself durable. Best effort: not every platform lets
/// us open a directory.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if let Err(err) = File::open(parent).and_then(|dir| dir.sync_all()) {
        debug!("Could not sync {}: {}", parent.display(), err);
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}
