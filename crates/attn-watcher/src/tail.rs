//! Byte-offset transcript tailer shared by every agent-kind processor.
//!
//! Grounded on `at-core::file_watcher::FileWatcher`'s channel-draining
//! idiom, adapted from `notify`-event-driven to poll-driven: there is
//! no filesystem-event backend here, just a tick that re-reads
//! whatever bytes were appended since the last offset, because
//! transcripts are agent-owned files the daemon only ever reads.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

/// How many trailing bytes to read back on first discovery, so a
/// freshly attached watcher doesn't re-process an entire session's
/// transcript history.
const DISCOVERY_WINDOW_BYTES: u64 = 16 * 1024;

pub struct FileTailer {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
    discovered: bool,
}

impl FileTailer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), offset: 0, partial: Vec::new(), discovered: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read whatever new complete lines are available. Returns an
    /// empty vec (not an error) if the file doesn't exist yet — the
    /// caller's discovery retry loop keeps polling.
    pub fn poll_lines(&mut self) -> std::io::Result<Vec<String>> {
        let mut file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let len = file.metadata()?.len();

        if !self.discovered {
            self.offset = len.saturating_sub(DISCOVERY_WINDOW_BYTES);
            self.discovered = true;
            debug!(path = %self.path.display(), offset = self.offset, "transcript tailer discovered file");
        } else if len < self.offset {
            // Rotation: the file shrank under us.
            debug!(path = %self.path.display(), "transcript rotated, seeking to start");
            self.offset = 0;
            self.partial.clear();
        }

        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut buf)?;
        self.offset = len;

        self.partial.extend_from_slice(&buf);

        let mut lines = Vec::new();
        loop {
            let Some(pos) = self.partial.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if let Ok(s) = std::str::from_utf8(line) {
                if !s.trim().is_empty() {
                    lines.push(s.to_string());
                }
            }
        }

        Ok(lines)
    }

    /// Called when the backing file disappears entirely (not merely
    /// truncated); forces rediscovery on the next successful open.
    pub fn reset_for_rediscovery(&mut self) {
        self.discovered = false;
        self.offset = 0;
        self.partial.clear();
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn polls_nothing_before_file_exists() {
        let mut tailer = FileTailer::new("/nonexistent/path/to/transcript.jsonl");
        assert_eq!(tailer.poll_lines().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn polls_new_complete_lines_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        std::fs::write(&path, b"line one\nline two\npart").unwrap();
        let mut tailer = FileTailer::new(&path);
        let lines = tailer.poll_lines().unwrap();
        assert_eq!(lines, vec!["line one".to_string(), "line two".to_string()]);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"ial\nline three\n").unwrap();
        let lines = tailer.poll_lines().unwrap();
        assert_eq!(lines, vec!["ial".to_string(), "line three".to_string()]);
    }

    #[test]
    fn detects_rotation_via_size_regression() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        std::fs::write(&path, b"aaaaaaaaaaaaaaaaaaaaaaaaaaaa\n").unwrap();
        let mut tailer = FileTailer::new(&path);
        let _ = tailer.poll_lines().unwrap();
        std::fs::write(&path, b"fresh\n").unwrap();
        let lines = tailer.poll_lines().unwrap();
        assert_eq!(lines, vec!["fresh".to_string()]);
    }
}
