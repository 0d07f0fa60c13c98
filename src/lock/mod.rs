//! Exclusive folder locks shared between processes
//!
//! A lock is a marker file next to the data it protects. At most one holder
//! owns a marker at any time; acquisition is a single atomic filesystem step,
//! so two processes racing for the same folder cannot both succeed.
//!
//! ## Lock lifecycle
//!
//! ```text
//! free ──try_acquire──> building ──seal──> sealed
//!   ^                      │  ^               │
//!   │                      │  └────unseal─────┤
//!   └───────release────────┴──────────────────┘
//!   ^                      │
//!   └──reclaim (stale)─────┘   holder died or exceeded stale_after
//! ```
//!
//! [`LockProvider`] is the seam: the definition of an experimental dataset
//! only talks to the trait, and [`FileLockProvider`] is the default
//! implementation.

mod file;
mod sentinel;

pub use file::FileLockProvider;
pub use sentinel::{LockSentinel, LockState};

use std::fmt;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Default polling interval of blocking acquisition.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How contention is handled when acquiring a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum LockMode {
    /// Fail with [`Error::AlreadyLocked`] immediately.
    #[default]
    FailFast,
    /// Retry until `timeout` has elapsed, then fail with
    /// [`Error::LockTimeout`].
    Blocking {
        /// Upper bound on the wait.
        #[serde(with = "duration_secs")]
        timeout: Duration,
        /// Delay between attempts.
        #[serde(with = "duration_secs", default = "default_poll")]
        poll_interval: Duration,
    },
}

impl LockMode {
    /// Blocking mode with the default polling interval.
    #[must_use]
    pub const fn blocking(timeout: Duration) -> Self {
        Self::Blocking {
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

const fn default_poll() -> Duration {
    DEFAULT_POLL_INTERVAL
}

/// State of a lock marker as seen by one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// No marker.
    Unlocked,
    /// Held by this provider.
    HeldByUs(LockSentinel),
    /// Held by another live holder.
    HeldByOther(LockSentinel),
    /// Marker left behind by a holder that may be reclaimed.
    Stale(LockSentinel),
}

impl LockStatus {
    /// True if someone legitimately holds the lock.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        matches!(self, Self::HeldByUs(_) | Self::HeldByOther(_))
    }

    /// The marker contents, if there is a marker.
    #[must_use]
    pub const fn sentinel(&self) -> Option<&LockSentinel> {
        match self {
            Self::Unlocked => None,
            Self::HeldByUs(s) | Self::HeldByOther(s) | Self::Stale(s) => Some(s),
        }
    }

    /// True if another live holder is still building behind this lock.
    #[must_use]
    pub fn blocks_readers(&self) -> bool {
        matches!(self, Self::HeldByOther(s) if s.state == LockState::Building)
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlocked => f.write_str("unlocked"),
            Self::HeldByUs(s) => write!(f, "held by this process ({:?})", s.state),
            Self::HeldByOther(s) => write!(f, "held by {} ({:?})", s.describe(), s.state),
            Self::Stale(s) => write!(f, "stale, left by {}", s.describe()),
        }
    }
}

/// Capability to take and give back exclusive locks keyed by a marker path.
///
/// Every method may be called concurrently from several processes on the
/// same path. Implementations must make "check absent, then mark present"
/// a single atomic step.
pub trait LockProvider: fmt::Debug + Send + Sync {
    /// Take the lock without waiting.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyLocked`] if another holder (or this provider) has it.
    fn try_acquire(&self, path: &Path, holder: &str) -> Result<LockSentinel>;

    /// Give the lock back.
    ///
    /// # Errors
    ///
    /// [`Error::NotLocked`] if this provider does not hold it.
    fn release(&self, path: &Path) -> Result<()>;

    /// Whether this provider currently holds the lock.
    fn holds(&self, path: &Path) -> bool;

    /// Inspect the marker.
    ///
    /// # Errors
    ///
    /// Returns an I/O or JSON error if the marker cannot be read.
    fn status(&self, path: &Path) -> Result<LockStatus>;

    /// Turn a held building lock into a sealed one.
    ///
    /// # Errors
    ///
    /// [`Error::NotLocked`] if this provider does not hold it.
    fn seal(&self, path: &Path) -> Result<LockSentinel>;

    /// Turn a held sealed lock back into a building one, so readers wait
    /// while the folder is rewritten.
    ///
    /// # Errors
    ///
    /// [`Error::NotLocked`] if this provider does not hold it.
    fn unseal(&self, path: &Path) -> Result<LockSentinel>;

    /// Remove the marker whoever holds it. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the marker cannot be removed.
    fn force_release(&self, path: &Path) -> Result<bool>;

    /// Retry [`try_acquire`](Self::try_acquire) until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// [`Error::LockTimeout`] once the deadline passes, or any
    /// non-contention error from `try_acquire`.
    fn acquire_with_timeout(
        &self,
        path: &Path,
        holder: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<LockSentinel> {
        let start = Instant::now();
        loop {
            match self.try_acquire(path, holder) {
                Err(Error::AlreadyLocked { holder: current, .. }) => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        return Err(Error::LockTimeout {
                            path: path.to_path_buf(),
                            waited,
                        });
                    }
                    debug!(path = %path.display(), holder = %current, "Waiting for lock");
                    thread::sleep(poll_interval.min(timeout - waited));
                }
                other => return other,
            }
        }
    }

    /// Acquire according to `mode`.
    ///
    /// # Errors
    ///
    /// See [`try_acquire`](Self::try_acquire) and
    /// [`acquire_with_timeout`](Self::acquire_with_timeout).
    fn acquire(&self, path: &Path, holder: &str, mode: LockMode) -> Result<LockSentinel> {
        match mode {
            LockMode::FailFast => self.try_acquire(path, holder),
            LockMode::Blocking {
                timeout,
                poll_interval,
            } => self.acquire_with_timeout(path, holder, timeout, poll_interval),
        }
    }

    /// True if the marker exists and is not stale.
    ///
    /// # Errors
    ///
    /// See [`status`](Self::status).
    fn is_locked(&self, path: &Path) -> Result<bool> {
        Ok(self.status(path)?.is_locked())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
