use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::LockfileError;

/// Exclusive non-blocking lock on `attn.pid`, held for the lifetime of a
/// daemon instance. Acquisition uses `flock(2)` rather than `O_CREAT |
/// O_EXCL`: unlike a create-exclusive check, `flock` is released
/// automatically by the kernel if the holding process dies without
/// cleanup, so a crashed daemon never leaves a stale lock behind.
pub struct DaemonLockfile {
    path: PathBuf,
    file: File,
}

impl DaemonLockfile {
    /// Attempt to acquire the singleton lock at `path`. On failure,
    /// returns the PID found in the file (if readable) so the caller can
    /// print "already running as pid N" and exit.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockfileError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LockfileError::Io {
                path: path.clone(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| LockfileError::Io { path: path.clone(), source })?;

        let fd = file.as_raw_fd();
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let existing_pid = read_pid(&mut file).unwrap_or(0);
            return Err(LockfileError::AlreadyLocked(existing_pid));
        }

        file.set_len(0).map_err(|source| LockfileError::Io { path: path.clone(), source })?;
        file.write_all(std::process::id().to_string().as_bytes())
            .map_err(|source| LockfileError::Io { path: path.clone(), source })?;
        file.flush().map_err(|source| LockfileError::Io { path: path.clone(), source })?;

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock and remove the pidfile. Called explicitly during
    /// supervisor shutdown rather than relying solely on `Drop`, so the
    /// removal can be logged.
    pub fn release(self) {
        let _ = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_pid(file: &mut File) -> Option<i32> {
    file.seek(SeekFrom::Start(0)).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// `true` if `pid` names a process that is still alive. Uses `kill(pid,
/// 0)`: no signal is delivered, only existence and permission are
/// checked.
pub fn pid_alive(pid: i32) -> bool {
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tmp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("attn-lockfile-test-{}-{}", std::process::id(), name));
        p
    }

    #[test]
    fn acquire_then_release() {
        let path = tmp_path("basic");
        let _ = std::fs::remove_file(&path);
        let lock = DaemonLockfile::acquire(&path).expect("first acquire succeeds");
        assert!(path.exists());
        lock.release();
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_fails_while_first_holds() {
        let path = tmp_path("contention");
        let _ = std::fs::remove_file(&path);
        let first = DaemonLockfile::acquire(&path).expect("first acquire succeeds");

        let second = DaemonLockfile::acquire(&path);
        assert!(matches!(second, Err(LockfileError::AlreadyLocked(pid)) if pid == std::process::id() as i32));

        first.release();
    }

    #[test]
    fn acquire_succeeds_again_after_release() {
        let path = tmp_path("reacquire");
        let _ = std::fs::remove_file(&path);
        let first = DaemonLockfile::acquire(&path).expect("first acquire succeeds");
        first.release();
        let second = DaemonLockfile::acquire(&path);
        assert!(second.is_ok());
        second.unwrap().release();
    }

    #[test]
    fn current_process_is_alive() {
        assert!(pid_alive(std::process::id() as i32));
    }
}
