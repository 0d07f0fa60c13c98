//! Integration tests for folder locks

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use exds::lock::{FileLockProvider, LockMode, LockProvider, LockSentinel, LockState, LockStatus};
use exds::Error;
use tempfile::tempdir;

fn write_marker(path: &std::path::Path, sentinel: &LockSentinel) {
    std::fs::write(path, serde_json::to_string(sentinel).unwrap()).unwrap();
}

#[test]
fn test_two_holders_exactly_one_wins() {
    for _ in 0..20 {
        let dir = tempdir().unwrap();
        let path = Arc::new(dir.path().join("locked_exds"));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let path = Arc::clone(&path);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let provider = FileLockProvider::new();
                    barrier.wait();
                    let result = provider.try_acquire(&path, &format!("holder-{i}"));
                    (provider, result)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|(_, r)| r.is_ok()).count();
        assert_eq!(winners, 1);
        let loser = results.iter().find(|(_, r)| r.is_err()).unwrap();
        assert!(matches!(loser.1, Err(Error::AlreadyLocked { .. })));
    }
}

#[test]
fn test_second_provider_sees_holder() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("locked_exds");
    let first = FileLockProvider::new();
    let second = FileLockProvider::new();

    first.try_acquire(&path, "exds:first").unwrap();
    let err = second.try_acquire(&path, "exds:second").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("already locked"));
    assert!(message.contains("exds:first"));

    assert!(matches!(second.status(&path).unwrap(), LockStatus::HeldByOther(_)));
    assert!(matches!(first.status(&path).unwrap(), LockStatus::HeldByUs(_)));
    assert!(second.is_locked(&path).unwrap());
    assert!(!second.holds(&path));
}

#[test]
fn test_release_requires_holding() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("locked_exds");
    let first = FileLockProvider::new();
    let second = FileLockProvider::new();

    assert!(matches!(first.release(&path), Err(Error::NotLocked(_))));
    first.try_acquire(&path, "first").unwrap();
    assert!(matches!(second.release(&path), Err(Error::NotLocked(_))));
    assert!(path.exists());

    first.release(&path).unwrap();
    assert!(!path.exists());
    assert_eq!(second.status(&path).unwrap(), LockStatus::Unlocked);
    second.try_acquire(&path, "second").unwrap();
}

#[test]
fn test_blocking_times_out() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("locked_exds");
    let holder = FileLockProvider::new();
    let waiter = FileLockProvider::new();
    holder.try_acquire(&path, "holder").unwrap();

    let start = Instant::now();
    let err = waiter
        .acquire(
            &path,
            "waiter",
            LockMode::Blocking {
                timeout: Duration::from_millis(200),
                poll_interval: Duration::from_millis(20),
            },
        )
        .unwrap_err();
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert!(matches!(err, Error::LockTimeout { .. }));
}

#[test]
fn test_blocking_succeeds_after_release() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("locked_exds");
    let holder = FileLockProvider::new();
    holder.try_acquire(&path, "holder").unwrap();

    let waiter_path = path.clone();
    let waiter = thread::spawn(move || {
        let provider = FileLockProvider::new();
        provider
            .acquire(&waiter_path, "waiter", LockMode::blocking(Duration::from_secs(10)))
            .map(|s| s.holder)
    });

    thread::sleep(Duration::from_millis(150));
    holder.release(&path).unwrap();
    assert_eq!(waiter.join().unwrap().unwrap(), "waiter");
}

#[test]
fn test_fail_fast_does_not_wait() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("locked_exds");
    FileLockProvider::new().try_acquire(&path, "holder").unwrap();

    let start = Instant::now();
    let err = FileLockProvider::new()
        .acquire(&path, "other", LockMode::FailFast)
        .unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(matches!(err, Error::AlreadyLocked { .. }));
}

#[test]
fn test_dead_holder_is_reclaimed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("locked_exds");
    let mut ghost = LockSentinel::current("exds:crashed");
    ghost.pid = u32::MAX - 1;
    write_marker(&path, &ghost);

    let provider = FileLockProvider::new();
    assert!(matches!(provider.status(&path).unwrap(), LockStatus::Stale(_)));
    assert!(!provider.is_locked(&path).unwrap());

    let sentinel = provider.try_acquire(&path, "exds:rebuild").unwrap();
    assert_ne!(sentinel.token, ghost.token);
    assert!(matches!(provider.status(&path).unwrap(), LockStatus::HeldByUs(_)));
}

#[cfg(target_os = "linux")]
#[test]
fn test_lock_of_reused_pid_is_reclaimed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("locked_exds");
    // Our own PID, but recorded for a process that started at another time.
    let mut crashed = LockSentinel::current("exds:crashed");
    crashed.process_start = crashed.process_start.map(|ticks| ticks + 1);
    crashed.created_at = Utc::now() - chrono::Duration::days(30);
    write_marker(&path, &crashed);

    let provider = FileLockProvider::new();
    assert!(matches!(provider.status(&path).unwrap(), LockStatus::Stale(_)));
    assert!(!provider.is_locked(&path).unwrap());
    provider.try_acquire(&path, "exds:rebuild").unwrap();
    assert!(matches!(provider.status(&path).unwrap(), LockStatus::HeldByUs(_)));
}

#[test]
fn test_old_lock_is_reclaimed_after_threshold() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("locked_exds");
    let mut old = LockSentinel::current("exds:slow");
    old.created_at = Utc::now() - chrono::Duration::hours(3);
    write_marker(&path, &old);

    let patient = FileLockProvider::new();
    assert!(matches!(
        patient.try_acquire(&path, "patient"),
        Err(Error::AlreadyLocked { .. })
    ));

    let strict = FileLockProvider::new().with_stale_after(Duration::from_secs(3600));
    strict.try_acquire(&path, "strict").unwrap();
}

#[test]
fn test_sealed_lock_is_never_reclaimed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("locked_exds");
    let mut sealed = LockSentinel::current("exds:done");
    sealed.pid = u32::MAX - 1;
    sealed.state = LockState::Sealed;
    write_marker(&path, &sealed);

    let provider = FileLockProvider::new().with_stale_after(Duration::from_secs(1));
    let status = provider.status(&path).unwrap();
    assert!(matches!(status, LockStatus::HeldByOther(_)));
    assert!(!status.blocks_readers());
    assert!(provider.try_acquire(&path, "rebuild").is_err());

    assert!(provider.force_release(&path).unwrap());
    assert!(!provider.force_release(&path).unwrap());
    provider.try_acquire(&path, "rebuild").unwrap();
}

#[test]
fn test_contended_reclaim_keeps_one_live_marker() {
    for _ in 0..20 {
        let dir = tempdir().unwrap();
        let path = Arc::new(dir.path().join("locked_exds"));
        let mut ghost = LockSentinel::current("exds:crashed");
        ghost.pid = u32::MAX - 1;
        write_marker(&path, &ghost);
        let barrier = Arc::new(Barrier::new(3));

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let path = Arc::clone(&path);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let provider = FileLockProvider::new();
                    barrier.wait();
                    let result = provider.try_acquire(&path, &format!("holder-{i}"));
                    (provider, result)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<_> = results.iter().filter(|(_, r)| r.is_ok()).collect();
        assert_eq!(winners.len(), 1);
        let (winner, sentinel) = winners[0];
        let on_disk: LockSentinel =
            serde_json::from_str(&std::fs::read_to_string(&*path).unwrap()).unwrap();
        assert_eq!(&on_disk.token, &sentinel.as_ref().unwrap().token);
        assert!(matches!(winner.status(&path).unwrap(), LockStatus::HeldByUs(_)));

        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
