//! Write-ahead log for fact records.
//!
//! Every store mutation is appended here before it becomes visible in the
//! in-memory index. On open the log is replayed; a torn or corrupted tail is
//! dropped and replay stops at the last intact entry.
//!
//! Frames are written straight to the file. A failed append is cut back to
//! the length before it started, so a write reported as failed never
//! reappears on replay.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec frame]
//! [ENTRY 2: codec frame]
//! ...
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::fact::{Fact, FactId, Scope};
use crate::storage::traits::Retirement;

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The mutation being logged.
    pub kind: WalEntryKind,
}

/// The mutation carried by a WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WalEntryKind {
    /// A version appended through a successful conditional put.
    Put {
        /// The appended version.
        record: Fact,
    },
    /// A head marked invalid or superseded in place.
    Retire {
        /// Scope of the lineage.
        scope: Scope,
        /// Lineage whose head was retired.
        fact_id: FactId,
        /// The mark applied.
        retirement: Retirement,
    },
    /// A lineage removed entirely.
    Purge {
        /// Scope of the lineage.
        scope: Scope,
        /// Removed lineage.
        fact_id: FactId,
    },
    /// A record copied verbatim by compaction.
    Restore {
        /// The record, pointers included.
        record: Fact,
    },
}

fn lock_err() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned WAL lock")
}

/// Destination for WAL frames.
trait FrameSink: Write {
    fn sync(&mut self) -> IoResult<()>;
    fn truncate(&mut self, len: u64) -> IoResult<()>;
}

impl FrameSink for File {
    fn sync(&mut self) -> IoResult<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> IoResult<()> {
        self.set_len(len)
    }
}

/// A failed append, and whether the sink was cut back to its prior length.
#[derive(Debug)]
struct AppendFailure {
    error: IoError,
    rolled_back: bool,
}

/// Appends one frame to a sink currently `len` bytes long. Returns the new length.
fn append_frame<S: FrameSink>(
    sink: &mut S,
    len: u64,
    frame: &[u8],
    sync: bool,
) -> Result<u64, AppendFailure> {
    let written = sink
        .write_all(frame)
        .and_then(|()| if sync { sink.sync() } else { Ok(()) });
    match written {
        Ok(()) => Ok(len + frame.len() as u64),
        Err(error) => {
            let rolled_back = match sink.truncate(len) {
                Ok(()) => true,
                Err(cut) => {
                    warn!(len, error = %cut, "could not roll back partial WAL frame");
                    false
                }
            };
            Err(AppendFailure { error, rolled_back })
        }
    }
}

struct WalState {
    file: File,
    /// Length of the intact log.
    len: u64,
    sequence: u64,
    /// Set when a failed append could not be rolled back.
    broken: bool,
}

/// Append-only write-ahead log. Thread-safe via an internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    state: Mutex<WalState>,
    sync_on_write: bool,
}

impl WriteAheadLog {
    /// Open or create a WAL file, positioning after the last intact entry.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let needs_header = !path.exists() || fs::metadata(path)?.len() == 0;
        if needs_header {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
        }

        let (sequence, valid_len) = Self::scan_valid(path)?;
        let file = OpenOptions::new().write(true).open(path)?;
        if file.metadata()?.len() > valid_len {
            warn!(
                path = %path.display(),
                valid_len,
                "truncating corrupted WAL tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        drop(file);

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(WalState {
                file,
                len: valid_len,
                sequence,
                broken: false,
            }),
            sync_on_write,
        })
    }

    fn lock(&self) -> IoResult<MutexGuard<'_, WalState>> {
        self.state.lock().map_err(|_| lock_err())
    }

    /// Append an entry. Returns the sequence number assigned to it.
    ///
    /// A failed entry is cut back out of the log; if that cut fails, later
    /// appends are refused until the log is reopened.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut state = self.lock()?;
        if state.broken {
            return Err(IoError::new(
                ErrorKind::Other,
                "WAL tail could not be rolled back; reopen the store",
            ));
        }
        let sequence = state.sequence + 1;
        let encoded = codec::encode(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
        })?;

        let len = state.len;
        match append_frame(&mut state.file, len, &encoded, self.sync_on_write) {
            Ok(new_len) => {
                state.len = new_len;
                state.sequence = sequence;
                Ok(sequence)
            }
            Err(failure) => {
                state.broken = !failure.rolled_back;
                warn!(
                    path = %self.path.display(),
                    sequence,
                    error = %failure.error,
                    "WAL append failed"
                );
                Err(failure.error)
            }
        }
    }

    /// Iterate over every intact entry, in order.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Sequence number of the last appended entry.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.lock()?.sequence)
    }

    /// WAL file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(self.lock()?.len)
    }

    /// Atomically replace the log with the given entries.
    ///
    /// Writes a sibling file, fsyncs it, and renames it over the log, so a
    /// crash leaves either the old or the new log intact.
    pub fn rewrite(&self, entries: impl IntoIterator<Item = WalEntryKind>) -> IoResult<u64> {
        let mut state = self.lock()?;

        let tmp_path = self.path.with_extension("wal.compact");
        let mut sequence = 0u64;
        {
            let mut tmp = BufWriter::new(
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&tmp_path)?,
            );
            codec::write_header(&mut tmp)?;
            for kind in entries {
                sequence += 1;
                tmp.write_all(&codec::encode(&WalEntry {
                    sequence,
                    timestamp: Utc::now(),
                    kind,
                })?)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        state.len = file.metadata()?.len();
        state.file = file;
        state.sequence = sequence;
        state.broken = false;
        Ok(sequence)
    }

    /// Returns (last sequence, byte length of the intact prefix).
    fn scan_valid(path: &Path) -> IoResult<(u64, u64)> {
        let mut iter = WalIterator::new(path)?;
        let mut last_seq = 0;
        let mut valid_len = iter.position()?;
        while let Some(entry) = iter.next() {
            match entry {
                Ok(entry) => {
                    last_seq = entry.sequence;
                    valid_len = iter.position()?;
                }
                Err(e) => {
                    warn!(
                        sequence = last_seq + 1,
                        error = %e,
                        "WAL corruption detected; replay stops here"
                    );
                    break;
                }
            }
        }
        Ok((last_seq, valid_len))
    }
}

/// Iterator over WAL entries.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        Ok(Self { reader, file_size })
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }

        // A truncated final frame surfaces as UnexpectedEof; callers treat
        // any error as the end of the intact prefix.
        Some(codec::decode(&mut self.reader))
    }
}
