//! Thread-backed PTY process handles.
//!
//! Grounded on `at-session::pty_pool::{PtyPool, PtyHandle}`: each spawned
//! process gets its own pseudo-terminal and two background OS threads
//! (reader, writer) bridged to async code via bounded `flume` channels.
//! Unlike the teacher's pool, a handle here is keyed by the daemon's own
//! session ID (a `String`) rather than a freshly minted UUID, and output
//! is additionally fanned out to every attached subscriber by
//! [`crate::attach::OutputBuffer`] rather than read directly off
//! `PtyHandle::reader`.

use std::io::{Read as IoRead, Write as IoWrite};
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, warn};

use crate::error::{PtyError, Result};

pub struct SpawnRequest {
    pub cmd: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: String,
    pub cols: u16,
    pub rows: u16,
}

/// A single live OS-backed PTY process. One per session.
pub struct PtyHandle {
    pub session_id: String,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    writer: flume::Sender<Vec<u8>>,
    _reader_thread: Option<std::thread::JoinHandle<()>>,
    _writer_thread: Option<std::thread::JoinHandle<()>>,
}

impl PtyHandle {
    /// Spawn a process inside a fresh PTY. `on_output` is called from the
    /// reader thread for every chunk read (possibly the empty chunk on
    /// EOF, which signals process exit to the caller).
    pub fn spawn(
        session_id: impl Into<String>,
        req: SpawnRequest,
        on_output: impl Fn(&[u8]) + Send + 'static,
        on_exit: impl FnOnce() + Send + 'static,
    ) -> Result<Self> {
        let session_id = session_id.into();
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize { rows: req.rows, cols: req.cols, pixel_width: 0, pixel_height: 0 })
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        let mut command = CommandBuilder::new(&req.cmd);
        for arg in &req.args {
            command.arg(arg);
        }
        for (k, v) in &req.env {
            command.env(k, v);
        }
        command.cwd(&req.cwd);

        let child = pair.slave.spawn_command(command).map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        debug!(session_id, cmd = %req.cmd, "spawned PTY process");

        let child = Arc::new(Mutex::new(child));

        let mut reader = pair.master.try_clone_reader().map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        let reader_thread = std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => on_output(&buf[..n]),
                    Err(e) => {
                        if e.kind() != std::io::ErrorKind::Other {
                            debug!("pty reader error: {e}");
                        }
                        break;
                    }
                }
            }
            on_exit();
        });

        let (write_tx, write_rx) = flume::bounded::<Vec<u8>>(256);
        let mut writer = pair.master.take_writer().map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        let writer_thread = std::thread::spawn(move || {
            while let Ok(data) = write_rx.recv() {
                if writer.write_all(&data).is_err() {
                    break;
                }
                let _ = writer.flush();
            }
        });

        Ok(Self {
            session_id,
            child,
            master: Arc::new(Mutex::new(pair.master)),
            writer: write_tx,
            _reader_thread: Some(reader_thread),
            _writer_thread: Some(writer_thread),
        })
    }

    pub fn is_alive(&self) -> bool {
        let mut child = self.lock_child();
        matches!(child.try_wait(), Ok(None))
    }

    pub fn input(&self, data: &[u8]) -> Result<()> {
        self.writer
            .send(data.to_vec())
            .map_err(|e| PtyError::Internal(format!("writer channel closed: {e}")))
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let master = self.master.lock().unwrap_or_else(|e| {
            warn!("pty master lock poisoned, recovering");
            e.into_inner()
        });
        master
            .resize(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 })
            .map_err(|e| PtyError::Internal(format!("resize failed: {e}")))
    }

    pub fn kill(&self, _signal: Option<i32>) -> Result<()> {
        let mut child = self.lock_child();
        child.kill().map_err(|e| PtyError::Internal(e.to_string()))
    }

    fn lock_child(&self) -> std::sync::MutexGuard<'_, Box<dyn Child + Send + Sync>> {
        self.child.lock().unwrap_or_else(|e| {
            warn!("pty child lock poisoned, recovering");
            e.into_inner()
        })
    }

    pub fn exit_status(&self) -> Option<(Option<i32>, Option<i32>)> {
        let mut child = self.lock_child();
        match child.try_wait() {
            Ok(Some(status)) => Some((status.exit_code().try_into().ok(), None)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHandle")
            .field("session_id", &self.session_id)
            .field("alive", &self.is_alive())
            .finish()
    }
}
