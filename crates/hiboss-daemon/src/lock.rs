//! Advisory single-instance lock plus the informational pid file, in the
//! style of a PID-file-guarded daemon: an `fs2` exclusive file lock is the
//! actual exclusion mechanism (released automatically if the process dies),
//! the pid file and periodic heartbeat are just what an operator reads.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use fs2::FileExt;
use tracing::{info, warn};

/// Held for the daemon's lifetime. Dropping it releases the `fs2` lock.
pub struct DaemonLock {
    _lock_file: File,
    lock_path: String,
    pid_path: String,
}

/// Acquire the advisory lock and write the pid file. Fails immediately if
/// another instance already holds the lock — never blocks waiting for it.
pub fn acquire(lock_path: &str, pid_path: &str) -> anyhow::Result<DaemonLock> {
    if let Some(parent) = Path::new(lock_path).parent() {
        fs::create_dir_all(parent)?;
    }

    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .read(true)
        .open(lock_path)
        .map_err(|e| anyhow::anyhow!("opening lock file {lock_path}: {e}"))?;

    lock_file.try_lock_exclusive().map_err(|_| {
        anyhow::anyhow!("another hiboss daemon instance is already running (lock file {lock_path} is held)")
    })?;

    write_heartbeat(&lock_file)?;
    write_pid_file(pid_path)?;

    info!(lock_path, pid_path, pid = std::process::id(), "daemon lock acquired");
    Ok(DaemonLock {
        _lock_file: lock_file,
        lock_path: lock_path.to_string(),
        pid_path: pid_path.to_string(),
    })
}

impl DaemonLock {
    /// Refresh the heartbeat timestamp an external staleness check reads.
    /// Callers spawn this on a `lock_heartbeat_secs` interval; it's a no-op
    /// for the `fs2` lock itself, which stays held regardless.
    pub fn refresh_heartbeat(&self) -> anyhow::Result<()> {
        write_heartbeat(&self._lock_file)
    }
}

fn write_pid_file(pid_path: &str) -> anyhow::Result<()> {
    if let Some(parent) = Path::new(pid_path).parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = File::create(pid_path)?;
    writeln!(f, "{}", std::process::id())?;
    Ok(())
}

/// Overwrite the lock file's contents with `{pid, heartbeat_ms}`, the
/// operator-facing staleness signal. The `fs2` lock itself is what actually
/// prevents a second instance from starting.
pub fn write_heartbeat(lock_file: &File) -> anyhow::Result<()> {
    let mut f = lock_file;
    f.set_len(0)?;
    use std::io::Seek;
    f.seek(std::io::SeekFrom::Start(0))?;
    writeln!(
        f,
        "{{\"pid\":{},\"heartbeat_ms\":{}}}",
        std::process::id(),
        chrono::Utc::now().timestamp_millis()
    )?;
    f.flush()?;
    Ok(())
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.pid_path) {
            warn!(path = %self.pid_path, error = %e, "failed to remove pid file");
        }
        if let Err(e) = fs::remove_file(&self.lock_path) {
            warn!(path = %self.lock_path, error = %e, "failed to remove lock file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_pid_and_lock_files() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("daemon.lock").to_string_lossy().to_string();
        let pid_path = dir.path().join("daemon.pid").to_string_lossy().to_string();

        let lock = acquire(&lock_path, &pid_path).unwrap();
        assert!(Path::new(&pid_path).exists());
        let pid: u32 = fs::read_to_string(&pid_path).unwrap().trim().parse().unwrap();
        assert_eq!(pid, std::process::id());

        drop(lock);
        assert!(!Path::new(&pid_path).exists());
        assert!(!Path::new(&lock_path).exists());
    }

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("daemon.lock").to_string_lossy().to_string();
        let pid_path = dir.path().join("daemon.pid").to_string_lossy().to_string();

        let _first = acquire(&lock_path, &pid_path).unwrap();
        let second = acquire(&lock_path, &pid_path.replace("daemon.pid", "daemon2.pid"));
        assert!(second.is_err());
    }
}
