//! Lock marker contents

#[cfg(target_os = "linux")]
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a lock currently protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    /// The holder is building or rewriting the folder. Readers must wait.
    Building,
    /// The folder is complete and protected against rebuild and deletion.
    /// Readers may proceed and the lock never goes stale.
    Sealed,
}

/// Marker written to disk to claim a folder.
///
/// A crashed holder leaves its sentinel behind; the pid/hostname pair, the
/// holder's process start time and the creation time let a later process
/// tell an abandoned lock from a live one, even after the PID was reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSentinel {
    /// PID of the process that created the sentinel.
    pub pid: u32,
    /// Start time of that process in clock ticks since boot (field 22 of
    /// `/proc/<pid>/stat`), where available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_start: Option<u64>,
    /// Hostname of the machine.
    pub hostname: String,
    /// Random value identifying this particular acquisition.
    pub token: String,
    /// Description of the holder (e.g. `exds:rcv1_small`).
    pub holder: String,
    /// When the lock was acquired.
    pub created_at: DateTime<Utc>,
    /// Building or sealed.
    pub state: LockState,
}

impl LockSentinel {
    /// Sentinel for the current process, in the building state.
    #[must_use]
    pub fn current(holder: impl Into<String>) -> Self {
        let pid = std::process::id();
        Self {
            pid,
            process_start: process_start_ticks(pid),
            hostname: hostname(),
            token: format!("{:016x}", rand::random::<u64>()),
            holder: holder.into(),
            created_at: Utc::now(),
            state: LockState::Building,
        }
    }

    /// Whether the holder process is still running.
    ///
    /// A running PID whose start time differs from the recorded one belongs
    /// to a different process. Holders on other hosts cannot be checked and
    /// count as alive.
    #[must_use]
    pub fn is_holder_alive(&self) -> bool {
        if self.hostname != hostname() {
            return true;
        }
        if !is_pid_alive(self.pid) {
            return false;
        }
        match (self.process_start, process_start_ticks(self.pid)) {
            (Some(recorded), Some(running)) => recorded == running,
            _ => true,
        }
    }

    /// Time since the lock was acquired.
    #[must_use]
    pub fn age(&self) -> Duration {
        (Utc::now() - self.created_at).to_std().unwrap_or_default()
    }

    /// Whether a later process may reclaim this lock.
    ///
    /// Sealed locks are never stale. A building lock is stale when its holder
    /// died, or when it is older than `stale_after` (if given).
    #[must_use]
    pub fn is_stale(&self, stale_after: Option<Duration>) -> bool {
        if self.state == LockState::Sealed {
            return false;
        }
        !self.is_holder_alive() || stale_after.is_some_and(|limit| self.age() > limit)
    }

    /// Human-readable holder description used in error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} (pid {} on {})", self.holder, self.pid, self.hostname)
    }
}

/// Hostname of this machine, or `unknown`.
///
/// The kernel's name comes first; environment variables are only exported
/// by some shells and would make two processes on one host disagree.
pub(crate) fn hostname() -> String {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .find_map(|file| {
            std::fs::read_to_string(file)
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .or_else(|| {
            std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .ok()
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown".into())
}

#[cfg(target_os = "linux")]
fn is_pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

/// Field 22 (`starttime`) of `/proc/<pid>/stat`.
///
/// The command name in field 2 may contain spaces and parentheses, so fields
/// are counted from the last `)`.
#[cfg(target_os = "linux")]
pub(crate) fn process_start_ticks(pid: u32) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_start_ticks(&stat)
}

#[cfg(target_os = "linux")]
fn parse_start_ticks(stat: &str) -> Option<u64> {
    let (_, fields) = stat.rsplit_once(')')?;
    fields.split_whitespace().nth(19)?.parse().ok()
}

// Without /proc there is no safe liveness check; treat the holder as alive
// and rely on `stale_after`.
#[cfg(not(target_os = "linux"))]
const fn is_pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(not(target_os = "linux"))]
pub(crate) const fn process_start_ticks(_pid: u32) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        let sentinel = LockSentinel::current("test");
        assert!(sentinel.is_holder_alive());
        assert!(!sentinel.is_stale(None));
        assert_eq!(sentinel.token.len(), 16);
    }

    #[test]
    fn test_age_threshold() {
        let mut sentinel = LockSentinel::current("test");
        sentinel.created_at = Utc::now() - chrono::Duration::hours(2);
        assert!(sentinel.is_stale(Some(Duration::from_secs(60))));
        assert!(!sentinel.is_stale(Some(Duration::from_secs(3 * 3600))));
    }

    #[test]
    fn test_sealed_never_stale() {
        let mut sentinel = LockSentinel::current("test");
        sentinel.created_at = Utc::now() - chrono::Duration::days(30);
        sentinel.state = LockState::Sealed;
        assert!(!sentinel.is_stale(Some(Duration::from_secs(1))));
    }

    #[test]
    fn test_other_host_counts_as_alive() {
        let mut sentinel = LockSentinel::current("test");
        sentinel.hostname = format!("{}-elsewhere", hostname());
        sentinel.pid = u32::MAX;
        assert!(sentinel.is_holder_alive());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_reused_pid_is_not_the_holder() {
        let mut sentinel = LockSentinel::current("test");
        let started = sentinel.process_start.unwrap();
        assert!(sentinel.is_holder_alive());

        sentinel.process_start = Some(started + 1);
        assert!(!sentinel.is_holder_alive());
        assert!(sentinel.is_stale(None));

        sentinel.state = LockState::Sealed;
        assert!(!sentinel.is_stale(None));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_parse_start_ticks() {
        let stat = "4242 (my (odd) name) S 1 4242 4242 0 -1 4194560 120 0 0 0 \
                    3 1 0 0 20 0 1 0 987654 12345678 300";
        assert_eq!(parse_start_ticks(stat), Some(987_654));
        assert_eq!(parse_start_ticks("4242 (truncated"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_hostname_prefers_kernel_name() {
        let kernel = std::fs::read_to_string("/proc/sys/kernel/hostname").unwrap();
        assert_eq!(hostname(), kernel.trim());
    }

    #[test]
    fn test_sentinel_without_start_time_parses() {
        let json = r#"{"pid": 1, "hostname": "h", "token": "t", "holder": "x",
            "created_at": "2024-01-01T00:00:00Z", "state": "sealed"}"#;
        let sentinel: LockSentinel = serde_json::from_str(json).unwrap();
        assert_eq!(sentinel.process_start, None);
    }

    #[test]
    fn test_serde_state_names() {
        let sentinel = LockSentinel::current("test");
        let json = serde_json::to_string(&sentinel).unwrap();
        assert!(json.contains("\"state\":\"building\""));
    }
}
