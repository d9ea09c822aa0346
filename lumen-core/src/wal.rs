//! Write-ahead log: binary record format, append discipline, and crash recovery.
//!
//! On-disk record format (little-endian, per record):
//!   magic (4) = "VKV1" | op (1) | key_len (4) | val_len (4) | expires_at_ms (8)
//!   | key (key_len) | value (val_len) | crc32 (4, IEEE, over everything above)
//!
//! `val_len` MUST be zero for `Del`/`Expire`; `append` rejects a nonzero one, `decode`
//! tolerates (and ignores) one for forward compatibility.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32Hasher;
use thiserror::Error;
use tracing::{info, warn};

const MAGIC: [u8; 4] = *b"VKV1";
const HEADER_LEN: usize = 4 + 1 + 4 + 4 + 8;
const CRC_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("DEL/EXPIRE records must carry an empty value (got {0} bytes)")]
    NonZeroValueLen(u32),

    #[error("WAL writer lock poisoned; the process may be in an inconsistent state")]
    LockPoisoned,
}

impl<T> From<PoisonError<T>> for WalError {
    fn from(_: PoisonError<T>) -> Self {
        WalError::LockPoisoned
    }
}

/// The three mutation kinds the WAL can durably record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Set = 1,
    Del = 2,
    Expire = 3,
}

impl Op {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Op::Set),
            2 => Some(Op::Del),
            3 => Some(Op::Expire),
            _ => None,
        }
    }
}

/// A single logical mutation, as it appears on the wire and on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub op: Op,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub expires_at_ms: i64,
}

impl WalRecord {
    pub fn set(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, expires_at_ms: i64) -> Self {
        Self {
            op: Op::Set,
            key: key.into(),
            value: value.into(),
            expires_at_ms,
        }
    }

    pub fn del(key: impl Into<Vec<u8>>) -> Self {
        Self {
            op: Op::Del,
            key: key.into(),
            value: Vec::new(),
            expires_at_ms: 0,
        }
    }

    pub fn expire(key: impl Into<Vec<u8>>, expires_at_ms: i64) -> Self {
        Self {
            op: Op::Expire,
            key: key.into(),
            value: Vec::new(),
            expires_at_ms,
        }
    }
}

/// Encode a single record to its on-disk byte representation.
pub fn encode(record: &WalRecord) -> Result<Vec<u8>, WalError> {
    if !matches!(record.op, Op::Set) && !record.value.is_empty() {
        return Err(WalError::NonZeroValueLen(record.value.len() as u32));
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + record.key.len() + record.value.len() + CRC_LEN);
    buf.extend_from_slice(&MAGIC);
    buf.push(record.op as u8);
    buf.write_u32::<LittleEndian>(record.key.len() as u32)?;
    buf.write_u32::<LittleEndian>(record.value.len() as u32)?;
    buf.write_i64::<LittleEndian>(record.expires_at_ms)?;
    buf.extend_from_slice(&record.key);
    buf.extend_from_slice(&record.value);

    let crc = {
        let mut hasher = Crc32Hasher::new();
        hasher.update(&buf);
        hasher.finalize()
    };
    buf.write_u32::<LittleEndian>(crc)?;

    Ok(buf)
}

/// Outcome of attempting to decode one record from a stream positioned at a record boundary.
pub enum DecodeOutcome {
    /// A complete, checksum-valid record, and the number of bytes it occupied.
    Record(WalRecord, u64),
    /// Clean end of file: nothing more to read, no partial bytes consumed.
    Eof,
    /// A record began but the file ended, or its checksum didn't match — the signature of a
    /// crash-induced torn write. Replay stops here; the caller decides whether to truncate.
    Corrupt,
}

/// Decode exactly one record from `r`, which must be positioned at a record boundary.
///
/// This is the primitive both file replay and the `Decode(Encode(r)) == r` unit tests build on.
pub fn decode_one<R: Read>(r: &mut R) -> io::Result<DecodeOutcome> {
    let mut magic = [0u8; 4];
    match read_fill(r, &mut magic)? {
        0 => return Ok(DecodeOutcome::Eof),
        n if n < magic.len() => return Ok(DecodeOutcome::Corrupt),
        _ => {}
    }
    if magic != MAGIC {
        return Ok(DecodeOutcome::Corrupt);
    }

    let mut rest = [0u8; HEADER_LEN - 4];
    if read_fill(r, &mut rest)? < rest.len() {
        return Ok(DecodeOutcome::Corrupt);
    }
    let mut header_cursor = io::Cursor::new(&rest[..]);
    let op_byte = header_cursor.read_u8()?;
    let key_len = header_cursor.read_u32::<LittleEndian>()?;
    let val_len = header_cursor.read_u32::<LittleEndian>()?;
    let expires_at_ms = header_cursor.read_i64::<LittleEndian>()?;

    let op = match Op::from_byte(op_byte) {
        Some(op) => op,
        None => return Ok(DecodeOutcome::Corrupt),
    };

    let mut key = vec![0u8; key_len as usize];
    if read_fill(r, &mut key)? < key.len() {
        return Ok(DecodeOutcome::Corrupt);
    }
    let mut value = vec![0u8; val_len as usize];
    if read_fill(r, &mut value)? < value.len() {
        return Ok(DecodeOutcome::Corrupt);
    }
    let mut crc_bytes = [0u8; CRC_LEN];
    if read_fill(r, &mut crc_bytes)? < crc_bytes.len() {
        return Ok(DecodeOutcome::Corrupt);
    }
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let computed_crc = {
        let mut hasher = Crc32Hasher::new();
        hasher.update(&magic);
        hasher.update(&[op_byte]);
        hasher.update(&rest[1..]);
        hasher.update(&key);
        hasher.update(&value);
        hasher.finalize()
    };
    if computed_crc != stored_crc {
        return Ok(DecodeOutcome::Corrupt);
    }

    // DEL/EXPIRE carrying a value is tolerated and ignored on decode (forward-compat, §9).
    let value = if matches!(op, Op::Del | Op::Expire) {
        Vec::new()
    } else {
        value
    };

    let total_len = (HEADER_LEN + key.len() + val_len as usize + CRC_LEN) as u64;
    Ok(DecodeOutcome::Record(
        WalRecord {
            op,
            key,
            value,
            expires_at_ms,
        },
        total_len,
    ))
}

/// `Read::read` can return short reads even short of EOF; loop until full, EOF, or error.
fn read_fill<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Result of folding a WAL file's records into a fresh table.
pub struct ReplayResult {
    pub records: Vec<WalRecord>,
    /// Byte offset of the first corrupt/truncated record, or the file length if the whole
    /// file decoded cleanly. Truncating the file to this length drops any torn tail.
    pub valid_len: u64,
    pub truncated_tail: bool,
}

/// Read every record from `path` in file order. Missing file is success with an empty result.
/// The first corrupt or truncated record ends replay successfully; everything before it stands.
pub fn replay(path: &Path) -> Result<ReplayResult, WalError> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(ReplayResult {
                records: Vec::new(),
                valid_len: 0,
                truncated_tail: false,
            });
        }
        Err(e) => return Err(WalError::Io(e)),
    };

    let mut records = Vec::new();
    let mut offset: u64 = 0;
    let mut truncated_tail = false;

    loop {
        match decode_one(&mut file)? {
            DecodeOutcome::Record(record, len) => {
                offset += len;
                records.push(record);
            }
            DecodeOutcome::Eof => break,
            DecodeOutcome::Corrupt => {
                warn!(
                    path = %path.display(),
                    offset,
                    "WAL record truncated or corrupt; stopping replay here"
                );
                truncated_tail = true;
                break;
            }
        }
    }

    info!(
        path = %path.display(),
        count = records.len(),
        valid_len = offset,
        "WAL replay complete"
    );

    Ok(ReplayResult {
        records,
        valid_len: offset,
        truncated_tail,
    })
}

/// Append-only WAL file: a single writer behind an internal lock.
#[derive(Debug)]
pub struct WriteAheadLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
    fsync_on_append: bool,
}

impl WriteAheadLog {
    /// Open (or create) the WAL at `path` in append mode.
    pub fn open(path: impl Into<PathBuf>, fsync_on_append: bool) -> Result<Self, WalError> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        info!(path = %path.display(), fsync_on_append, "WAL opened for append");

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path,
            fsync_on_append,
        })
    }

    /// Append one record. Durably on disk when `fsync_on_append` is set; otherwise merely in
    /// the OS page cache once this returns.
    pub fn append(&self, record: &WalRecord) -> Result<(), WalError> {
        let bytes = encode(record)?;

        let mut writer = self.writer.lock()?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        if self.fsync_on_append {
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Flush buffered bytes and close the underlying file handle.
    pub fn close(self) -> Result<(), WalError> {
        let mut writer = self.writer.lock()?;
        writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Truncate the WAL file at `path` to `len` bytes, dropping any torn tail left by a prior
/// crash. A no-op if the file is already exactly that long (the common, clean-shutdown case).
pub fn truncate_to(path: &Path, len: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)
}
