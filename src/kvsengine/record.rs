use crate::errors::*;
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Seek, SeekFrom};
use tracing::{debug, warn};

/// Width of the key and value length prefixes
const LENGTH_PREFIX: u64 = 8;

/// One entry of the log: |key len (u64 LE)|key|value len (u64 LE)|value|
#[derive(Deserialize, Serialize, Debug, PartialEq)]
pub(crate) struct KvRecord {
    pub key: String,
    pub value: String,
}

impl KvRecord {
    pub fn new(key: String, value: String) -> KvRecord {
        KvRecord { key, value }
    }

    pub fn encoded_len(&self) -> u64 {
        2 * LENGTH_PREFIX + self.key.len() as u64 + self.value.len() as u64
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(codec().serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<KvRecord> {
        Ok(codec().deserialize(bytes)?)
    }
}

/// Where a record lives in the log
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct KvIndex {
    pub offset: u64,
    pub length: u64,
}

/// Outcome of scanning a log from the start
#[derive(Debug)]
pub(crate) struct Replay {
    pub index: HashMap<String, KvIndex>,
    /// Length of the well-formed prefix of the log
    pub valid_len: u64,
    /// Bytes held by records that a later record overrides
    pub stale_bytes: u64,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

/// Rebuild the index from the first `file_len` bytes of `file`.
///
/// Later records win over earlier ones with the same key. Scanning stops
/// at the first record that does not decode (short read, length running
/// past the end of the file, invalid utf-8); everything from there on is
/// reported as not valid. Real read errors are returned.
pub(crate) fn replay(mut file: &File, file_len: u64) -> Result<Replay> {
    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(file);
    let mut index: HashMap<String, KvIndex> = HashMap::new();
    let mut pos: u64 = 0;
    let mut stale_bytes: u64 = 0;

    while pos < file_len {
        // The limit keeps a garbage length prefix from allocating past the file
        let decoded = codec()
            .with_limit(file_len - pos)
            .deserialize_from::<_, KvRecord>(&mut reader);
        match decoded {
            Ok(record) => {
                let length = record.encoded_len();
                if let Some(old) = index.insert(record.key, KvIndex { offset: pos, length }) {
                    stale_bytes += old.length;
                }
                pos += length;
            }
            Err(err) => match *err {
                bincode::ErrorKind::Io(io_err) if io_err.kind() != io::ErrorKind::UnexpectedEof => {
                    return Err(KvsError::Io(io_err));
                }
                other => {
                    warn!(
                        "Corrupt record at offset {} ({}), dropping {} trailing bytes",
                        pos,
                        other,
                        file_len - pos
                    );
                    break;
                }
            },
        }
    }

    debug!("Replay done: {} keys, {} valid bytes", index.len(), pos);
    Ok(Replay {
        index,
        valid_len: pos,
        stale_bytes,
    })
}

/// Read and decode the record `idx` points at
pub(crate) fn read_record(file: &File, idx: KvIndex) -> Result<KvRecord> {
    let mut buf = vec![0u8; idx.length as usize];
    read_exact_at(file, &mut buf, idx.offset)?;
    KvRecord::decode(&buf).map_err(|err| {
        warn!("Record at offset {} does not decode: {}", idx.offset, err);
        KvsError::CorruptRecord { offset: idx.offset }
    })
}

/// Positional read that leaves the file cursor alone, so readers can share
/// one handle.
#[cfg(unix)]
pub(crate) fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
pub(crate) fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
