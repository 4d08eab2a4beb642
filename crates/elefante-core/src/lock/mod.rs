//! Transaction-scoped write lock
//!
//! A single `{data_dir}/write.lock` file coordinates writers across
//! cooperating processes. Read operations acquire nothing. The protocol is
//! crash-safe: a holder record older than the stale threshold, or whose pid
//! is no longer alive on this host, is eligible for steal. Steals are
//! serialized through the filesystem's exclusive-create primitive; a lost
//! race backs off and retries until the caller's deadline.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// HOLDER RECORD
// ============================================================================

/// Contents of the lock file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockHolder {
    pub pid: u32,
    pub host: String,
    /// Acquisition (or last heartbeat) time, epoch milliseconds
    pub ts_ms: i64,
    /// Random token identifying this acquisition
    pub token: String,
}

impl LockHolder {
    fn new_for_this_process() -> Self {
        Self {
            pid: std::process::id(),
            host: hostname(),
            ts_ms: Utc::now().timestamp_millis(),
            // 128 random bits from two v4 uuids' random halves
            token: format!("{:x}", Uuid::new_v4().as_u128()),
        }
    }

    /// Age of this record relative to now
    fn age(&self) -> Duration {
        let delta_ms = Utc::now().timestamp_millis() - self.ts_ms;
        Duration::from_millis(delta_ms.max(0) as u64)
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

/// Whether `pid` is alive on this host
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // Signal 0 probes existence without delivering anything. EPERM still
    // means the process exists.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // Without a liveness probe, rely on the stale timestamp alone
    true
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Lock acquisition failure
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// A live holder retained the lock past our deadline
    #[error("write lock held by pid {} on {} since {}", .holder.pid, .holder.host, .holder.ts_ms)]
    Unavailable {
        /// The holder observed at deadline expiry
        holder: LockHolder,
    },
    #[error("lock io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type LockResult<T> = std::result::Result<T, LockError>;

// ============================================================================
// LOCK MANAGER
// ============================================================================

/// Manages the write-lock file for one data directory
#[derive(Debug, Clone)]
pub struct LockManager {
    path: PathBuf,
    stale_after: Duration,
    default_timeout: Duration,
}

/// A held write lock; releases on drop
#[must_use = "dropping the guard releases the write lock"]
#[derive(Debug)]
pub struct WriteGuard {
    manager: LockManager,
    token: String,
    released: bool,
}

const ACQUIRE_BACKOFF: Duration = Duration::from_millis(50);

impl LockManager {
    pub fn new(path: PathBuf, stale_after: Duration, default_timeout: Duration) -> Self {
        Self {
            path,
            stale_after,
            default_timeout,
        }
    }

    /// Read the current holder record, if the lock file exists and parses.
    /// A malformed file reads as `None` (treated as stale by acquisition).
    pub fn current_holder(&self) -> Option<LockHolder> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Whether a live, fresh holder currently owns the lock
    pub fn is_locked(&self) -> bool {
        match self.current_holder() {
            Some(holder) => holder.age() < self.stale_after && pid_alive(holder.pid),
            None => self.path.exists(),
        }
    }

    /// Acquire the write lock with the default deadline
    pub fn acquire(&self) -> LockResult<WriteGuard> {
        self.acquire_with_timeout(self.default_timeout)
    }

    /// Acquire the write lock, waiting up to `timeout`.
    ///
    /// Returns the observed holder in the error payload on expiry.
    pub fn acquire_with_timeout(&self, timeout: Duration) -> LockResult<WriteGuard> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_acquire()? {
                Some(guard) => return Ok(guard),
                None => {
                    if Instant::now() >= deadline {
                        let holder = self.current_holder().unwrap_or(LockHolder {
                            pid: 0,
                            host: String::new(),
                            ts_ms: 0,
                            token: String::new(),
                        });
                        return Err(LockError::Unavailable { holder });
                    }
                    std::thread::sleep(ACQUIRE_BACKOFF);
                }
            }
        }
    }

    /// One acquisition attempt. `Ok(None)` means a live holder owns the lock.
    fn try_acquire(&self) -> LockResult<Option<WriteGuard>> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Fast path: exclusive create
        match self.create_exclusive() {
            Ok(guard) => return Ok(Some(guard)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        // The file exists: stale, dead, or live holder?
        let holder = self.current_holder();
        let reclaimable = match &holder {
            None => true, // malformed
            Some(h) => h.age() >= self.stale_after || !pid_alive(h.pid),
        };
        if !reclaimable {
            return Ok(None);
        }

        if let Some(h) = &holder {
            tracing::warn!(
                pid = h.pid,
                age_ms = h.age().as_millis() as u64,
                "stealing stale write lock"
            );
        } else {
            tracing::warn!("stealing malformed write lock file");
        }

        // Steal: remove then race on exclusive create. Losing the race is
        // fine; the caller backs off and re-evaluates the new holder.
        let _ = std::fs::remove_file(&self.path);
        match self.create_exclusive() {
            Ok(guard) => Ok(Some(guard)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn create_exclusive(&self) -> std::io::Result<WriteGuard> {
        let holder = LockHolder::new_for_this_process();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        file.write_all(serde_json::to_string(&holder)?.as_bytes())?;
        file.sync_all()?;
        Ok(WriteGuard {
            manager: self.clone(),
            token: holder.token,
            released: false,
        })
    }

    fn release(&self, token: &str) {
        match self.current_holder() {
            Some(holder) if holder.token == token => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    tracing::warn!("failed to remove write lock: {}", e);
                }
            }
            Some(holder) => {
                // We were stolen from; the new holder is authoritative
                tracing::warn!(
                    new_pid = holder.pid,
                    "write lock was stolen during our transaction; leaving it in place"
                );
            }
            None => {}
        }
    }
}

impl WriteGuard {
    /// Refresh the holder timestamp. Optional: intended for the rare write
    /// transaction that outlives the stale budget.
    pub fn heartbeat(&self) -> LockResult<()> {
        let Some(mut holder) = self.manager.current_holder() else {
            return Ok(());
        };
        if holder.token != self.token {
            return Ok(());
        }
        holder.ts_ms = Utc::now().timestamp_millis();
        let tmp = self.manager.path.with_extension("lock.tmp");
        std::fs::write(&tmp, serde_json::to_string(&holder)?)?;
        std::fs::rename(&tmp, &self.manager.path)?;
        Ok(())
    }

    /// Release explicitly (drop does the same)
    pub fn release(mut self) {
        self.manager.release(&self.token);
        self.released = true;
    }
}

impl From<serde_json::Error> for LockError {
    fn from(e: serde_json::Error) -> Self {
        LockError::Io(std::io::Error::other(e))
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if !self.released {
            self.manager.release(&self.token);
            self.released = true;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
