//! Lock markers as JSON files published with `hard_link`

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{LockProvider, LockSentinel, LockState, LockStatus};
use crate::{Error, Result};

/// Attempts at publishing a marker while other processes are reclaiming or
/// releasing it at the same time.
const MAX_CONTENDED_ATTEMPTS: usize = 8;

/// Age after which the reclaim guard of a vanished reclaimer is removed.
const RECLAIM_GUARD_TIMEOUT: Duration = Duration::from_secs(60);

/// [`LockProvider`] backed by marker files.
///
/// The sentinel is first written in full to a private temporary file, then
/// hard-linked to the marker path. `link(2)` fails if the target exists, which
/// makes acquisition atomic across processes; a reader never sees a partially
/// written marker.
///
/// Each provider tracks the locks it holds. Two providers are two independent
/// holders, even inside one process.
#[derive(Debug, Default)]
pub struct FileLockProvider {
    stale_after: Option<Duration>,
    held: Mutex<HashMap<PathBuf, LockSentinel>>,
}

impl FileLockProvider {
    /// Provider that only reclaims locks of dead holders.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also treat building locks older than `stale_after` as abandoned.
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    /// Age limit for building locks, if any.
    #[must_use]
    pub const fn stale_after(&self) -> Option<Duration> {
        self.stale_after
    }

    fn held(&self) -> MutexGuard<'_, HashMap<PathBuf, LockSentinel>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `sentinel` at `path` unless a marker already exists.
    ///
    /// Returns `Ok(false)` if the marker exists.
    fn publish(path: &Path, sentinel: &LockSentinel) -> Result<bool> {
        let temp = write_temp(path, sentinel)?;
        let linked = fs::hard_link(&temp, path);
        remove_if_present(&temp)?;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a stale marker, making sure it is still the one we inspected.
    ///
    /// Reclaimers serialize on a guard marker next to the lock, so only one
    /// of them inspects and removes the stale marker; a marker published by
    /// a live holder is never moved or removed. Returns `Ok(false)` if
    /// another process is reclaiming or the marker was replaced meanwhile.
    fn reclaim(path: &Path, stale: &LockSentinel) -> Result<bool> {
        let guard_path = sibling(path, "reclaim");
        let guard = LockSentinel::current(format!("reclaim:{}", stale.token));
        if !Self::publish(&guard_path, &guard)? {
            if let Some(other) = read_sentinel(&guard_path)? {
                if !other.is_holder_alive() || other.age() > RECLAIM_GUARD_TIMEOUT {
                    debug!(path = %guard_path.display(), "Removing abandoned reclaim guard");
                    remove_if_present(&guard_path)?;
                }
            }
            return Ok(false);
        }

        let removed = match read_sentinel(path) {
            Ok(Some(current)) if current.token == stale.token => remove_if_present(path),
            Ok(Some(_)) => Ok(false),
            Ok(None) => Ok(true),
            Err(e) => Err(e),
        };
        remove_if_present(&guard_path)?;
        let removed = removed?;

        if removed {
            warn!(
                path = %path.display(),
                pid = stale.pid,
                holder = %stale.holder,
                age_secs = stale.age().as_secs(),
                alive = stale.is_holder_alive(),
                "Reclaimed stale folder lock"
            );
        }
        Ok(removed)
    }

    /// Rewrite our marker in `state`. A marker going back to building gets a
    /// fresh creation time, so `stale_after` counts from the rebuild.
    fn set_state(&self, path: &Path, state: LockState) -> Result<LockSentinel> {
        let mut held = self.held();
        let Some(ours) = held.get_mut(path) else {
            return Err(Error::NotLocked(path.to_path_buf()));
        };
        if read_sentinel(path)?.map(|s| s.token) != Some(ours.token.clone()) {
            return Err(Error::NotLocked(path.to_path_buf()));
        }

        ours.state = state;
        if state == LockState::Building {
            ours.created_at = Utc::now();
        }
        let temp = write_temp(path, ours)?;
        fs::rename(&temp, path)?;
        debug!(path = %path.display(), ?state, "Changed folder lock state");
        Ok(ours.clone())
    }
}

impl LockProvider for FileLockProvider {
    fn try_acquire(&self, path: &Path, holder: &str) -> Result<LockSentinel> {
        if let Some(ours) = self.held().get(path) {
            return Err(Error::AlreadyLocked {
                path: path.to_path_buf(),
                holder: ours.describe(),
            });
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let sentinel = LockSentinel::current(holder);
        let mut contended = 0;
        while contended < MAX_CONTENDED_ATTEMPTS {
            if Self::publish(path, &sentinel)? {
                self.held().insert(path.to_path_buf(), sentinel.clone());
                info!(path = %path.display(), holder, "Acquired folder lock");
                return Ok(sentinel);
            }

            let reclaimed = match read_sentinel(path)? {
                None => false,
                Some(existing) if !existing.is_stale(self.stale_after) => {
                    return Err(Error::AlreadyLocked {
                        path: path.to_path_buf(),
                        holder: existing.describe(),
                    });
                }
                Some(existing) => Self::reclaim(path, &existing)?,
            };
            if !reclaimed {
                contended += 1;
                thread::yield_now();
            }
        }

        Err(Error::AlreadyLocked {
            path: path.to_path_buf(),
            holder: "a concurrently acquiring process".to_string(),
        })
    }

    fn release(&self, path: &Path) -> Result<()> {
        let Some(ours) = self.held().remove(path) else {
            return Err(Error::NotLocked(path.to_path_buf()));
        };

        match read_sentinel(path)? {
            Some(on_disk) if on_disk.token == ours.token => {
                remove_if_present(path)?;
                info!(path = %path.display(), "Released folder lock");
                Ok(())
            }
            Some(on_disk) => {
                warn!(
                    path = %path.display(),
                    holder = %on_disk.describe(),
                    "Folder lock was taken over by another holder"
                );
                Err(Error::NotLocked(path.to_path_buf()))
            }
            None => {
                warn!(path = %path.display(), "Folder lock marker vanished before release");
                Err(Error::NotLocked(path.to_path_buf()))
            }
        }
    }

    fn holds(&self, path: &Path) -> bool {
        self.held().contains_key(path)
    }

    fn status(&self, path: &Path) -> Result<LockStatus> {
        let Some(sentinel) = read_sentinel(path)? else {
            return Ok(LockStatus::Unlocked);
        };
        let ours = self
            .held()
            .get(path)
            .is_some_and(|held| held.token == sentinel.token);
        Ok(if ours {
            LockStatus::HeldByUs(sentinel)
        } else if sentinel.is_stale(self.stale_after) {
            LockStatus::Stale(sentinel)
        } else {
            LockStatus::HeldByOther(sentinel)
        })
    }

    fn seal(&self, path: &Path) -> Result<LockSentinel> {
        self.set_state(path, LockState::Sealed)
    }

    fn unseal(&self, path: &Path) -> Result<LockSentinel> {
        self.set_state(path, LockState::Building)
    }

    fn force_release(&self, path: &Path) -> Result<bool> {
        self.held().remove(path);
        let existing = read_sentinel(path).ok().flatten();
        let removed = remove_if_present(path)?;
        if let Some(existing) = existing {
            warn!(
                path = %path.display(),
                holder = %existing.describe(),
                "Forcibly removed folder lock"
            );
        }
        Ok(removed)
    }
}

/// Read a marker; `None` if it does not exist.
fn read_sentinel(path: &Path) -> Result<Option<LockSentinel>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_temp(path: &Path, sentinel: &LockSentinel) -> Result<PathBuf> {
    let temp = sibling(path, &format!("{}.tmp", sentinel.token));
    let mut file = File::create(&temp)?;
    file.write_all(serde_json::to_string_pretty(sentinel)?.as_bytes())?;
    file.sync_all()?;
    Ok(temp)
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Hidden file next to `path`, e.g. `.locked_exds.<suffix>`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "lock".into(), |n| n.to_string_lossy());
    path.with_file_name(format!(".{name}.{suffix}"))
}
