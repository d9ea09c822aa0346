//! Storage engine: coordinates the memtable, the WAL, request stats, and the clock, and
//! implements the command dispatcher.
//!
//! Write path:  WAL append  →  memtable mutate  (durable before visible)
//! Read path:   memtable only

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::memtable::{LockPoisoned, MemTable};
use crate::protocol::{Request, Response};
use crate::stats::Stats;
use crate::wal::{self, Op as WalOp, WalError, WalRecord, WriteAheadLog};

const WAL_FILE_NAME: &str = "wal.log";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    #[error("internal lock was poisoned; the process may be in an inconsistent state")]
    LockPoisoned,
}

impl From<LockPoisoned> for EngineError {
    fn from(_: LockPoisoned) -> Self {
        EngineError::LockPoisoned
    }
}

/// Thread-safe key-value engine backed by a WAL.
///
/// Cloning an `Engine` is cheap — every clone shares the same storage state.
#[derive(Clone)]
pub struct Engine {
    memtable: Arc<MemTable>,
    wal: Arc<WriteAheadLog>,
    stats: Arc<Stats>,
    clock: Arc<dyn Clock>,
    data_dir: Arc<PathBuf>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Open the engine rooted at `data_dir` using the real system clock.
    ///
    /// 1. Creates the directory if absent.
    /// 2. Replays the WAL to rebuild the memtable, truncating any torn tail left by a crash.
    /// 3. Opens the WAL in append mode, ready for new writes.
    pub fn open(data_dir: impl Into<PathBuf>, fsync_on_append: bool) -> Result<Self, EngineError> {
        Self::open_with_clock(data_dir, fsync_on_append, Arc::new(SystemClock))
    }

    /// As `open`, but with an injectable clock — the seam tests use to drive TTL expiry.
    pub fn open_with_clock(
        data_dir: impl Into<PathBuf>,
        fsync_on_append: bool,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir).map_err(WalError::Io)?;

        let wal_path = wal_path(&data_dir);
        let replay_result = wal::replay(&wal_path)?;

        let memtable = MemTable::new();
        let now = clock.now_ms();
        for record in &replay_result.records {
            apply_record(&memtable, record, now)?;
        }

        if replay_result.truncated_tail {
            wal::truncate_to(&wal_path, replay_result.valid_len).map_err(WalError::Io)?;
        }

        info!(
            data_dir = %data_dir.display(),
            records = replay_result.records.len(),
            truncated_tail = replay_result.truncated_tail,
            "engine initialized"
        );

        let wal = WriteAheadLog::open(&wal_path, fsync_on_append)?;

        Ok(Self {
            memtable: Arc::new(memtable),
            wal: Arc::new(wal),
            stats: Arc::new(Stats::new()),
            clock,
            data_dir: Arc::new(data_dir),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Dispatch one request against this engine's collaborators.
    ///
    /// For mutating commands the WAL append happens, and either succeeds fully (and is
    /// fsynced, if configured) or the memtable is left untouched and an `ERR` comes back.
    pub fn dispatch(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Ok,

            Request::Get { key } => {
                let now = self.clock.now_ms();
                match self.memtable.get(&key, now) {
                    Ok(value) => {
                        self.stats.record_get(value.is_some());
                        match value {
                            Some(v) => Response::Value(v),
                            None => Response::NotFound,
                        }
                    }
                    Err(e) => self.lock_error(e),
                }
            }

            Request::Set { key, value } => {
                self.apply_mutation(WalRecord::set(key.clone(), value.clone(), 0), || {
                    self.memtable.set(&key, &value, 0)?;
                    self.stats.record_set();
                    Ok(Response::Ok)
                })
            }

            Request::SetEx {
                key,
                ttl_secs,
                value,
            } => {
                let expires_at = expiry_from_ttl(self.clock.now_ms(), ttl_secs);
                self.apply_mutation(
                    WalRecord::set(key.clone(), value.clone(), expires_at),
                    || {
                        self.memtable.set(&key, &value, expires_at)?;
                        self.stats.record_set();
                        Ok(Response::Ok)
                    },
                )
            }

            Request::Del { key } => self.apply_mutation(WalRecord::del(key.clone()), || {
                let existed = self.memtable.del(&key)?;
                self.stats.record_del();
                Ok(Response::Int(existed as i64))
            }),

            Request::Exists { key } => {
                let now = self.clock.now_ms();
                match self.memtable.exists(&key, now) {
                    Ok(exists) => Response::Int(exists as i64),
                    Err(e) => self.lock_error(e),
                }
            }

            Request::Expire { key, ttl_secs } => {
                let now = self.clock.now_ms();
                let expires_at = expiry_from_ttl(now, ttl_secs);
                self.apply_mutation(WalRecord::expire(key.clone(), expires_at), || {
                    let ok = self.memtable.expire(&key, expires_at, now)?;
                    Ok(Response::Int(ok as i64))
                })
            }

            Request::Keys { prefix } => {
                let now = self.clock.now_ms();
                match self.memtable.keys(&prefix, now) {
                    Ok(keys) => {
                        let items = keys
                            .into_iter()
                            .map(|k| String::from_utf8_lossy(&k).into_owned())
                            .collect();
                        Response::Array(items)
                    }
                    Err(e) => self.lock_error(e),
                }
            }

            Request::Stats => {
                let items = self
                    .stats
                    .snapshot()
                    .into_iter()
                    .map(|(name, count)| format!("{name} {count}"))
                    .collect();
                Response::Array(items)
            }
        }
    }

    /// WAL-append-then-mutate, the crash-consistency contract every mutating command shares.
    /// On WAL-append failure, or on a poisoned memtable lock, the memtable mutation never runs
    /// (or its error is reported instead), `errors` is bumped, and the client sees
    /// `ERR <reason>`.
    fn apply_mutation(
        &self,
        record: WalRecord,
        on_success: impl FnOnce() -> Result<Response, LockPoisoned>,
    ) -> Response {
        debug!(op = ?record.op, key = %String::from_utf8_lossy(&record.key), "dispatch mutation");
        match self.wal.append(&record) {
            Ok(()) => match on_success() {
                Ok(resp) => resp,
                Err(e) => self.lock_error(e),
            },
            Err(e) => {
                self.stats.record_error();
                Response::err(e.to_string())
            }
        }
    }

    fn lock_error(&self, e: LockPoisoned) -> Response {
        self.stats.record_error();
        Response::err(e.to_string())
    }
}

fn wal_path(data_dir: &Path) -> PathBuf {
    data_dir.join(WAL_FILE_NAME)
}

fn expiry_from_ttl(now_ms: i64, ttl_secs: i64) -> i64 {
    now_ms.saturating_add(ttl_secs.saturating_mul(1000))
}

fn apply_record(memtable: &MemTable, record: &WalRecord, now_ms: i64) -> Result<(), EngineError> {
    match record.op {
        WalOp::Set => memtable.set(&record.key, &record.value, record.expires_at_ms)?,
        WalOp::Del => {
            memtable.del(&record.key)?;
        }
        WalOp::Expire => {
            memtable.expire(&record.key, record.expires_at_ms, now_ms)?;
        }
    }
    Ok(())
}
