//! Reading the daemon log file for the `logs` command

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use tracing::debug;

/// How often follow mode checks the log for new lines
pub const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

/// Largest ring buffer allocated up front by `tail`
const MAX_PREALLOC: usize = 1024;

/// Reads complete lines from a log file, remembering how far it got.
///
/// A trailing line without a newline is left for the next read, so a
/// record being written while we look is never split in two.
#[derive(Debug)]
pub struct LogFollower {
    path: PathBuf,
    offset: u64,
}

impl LogFollower {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    /// Byte offset of the next unread line
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The last `count` complete lines, oldest first
    pub fn tail(&mut self, count: usize) -> Result<Vec<String>> {
        let mut ring = VecDeque::with_capacity(count.min(MAX_PREALLOC));
        self.read_new(|line| {
            if count == 0 {
                return;
            }
            if ring.len() == count {
                ring.pop_front();
            }
            ring.push_back(line);
        })?;
        Ok(ring.into())
    }

    /// Complete lines appended since the previous read
    pub fn poll(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        self.read_new(|line| lines.push(line))?;
        Ok(lines)
    }

    fn read_new(&mut self, mut emit: impl FnMut(String)) -> Result<()> {
        let mut file =
            File::open(&self.path).with_context(|| format!("Failed to open log file {}", self.path.display()))?;
        let len = file.metadata().context("Failed to stat log file")?.len();
        if len < self.offset {
            debug!(offset = self.offset, len, "LogFollower::read_new: log shrank, reading from start");
            self.offset = 0;
        }
        file.seek(SeekFrom::Start(self.offset)).context("Failed to seek log file")?;

        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf).context("Failed to read log file")?;
            if read == 0 || buf.last() != Some(&b'\n') {
                break;
            }
            self.offset += read as u64;
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            emit(String::from_utf8_lossy(&buf).into_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &std::path::Path, text: &str) {
        let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cadence.log");
        let text: String = (1..=200).map(|i| format!("line {}\n", i)).collect();
        fs::write(&path, &text).unwrap();

        let mut follower = LogFollower::new(&path);
        let lines = follower.tail(3).unwrap();

        assert_eq!(lines, vec!["line 198", "line 199", "line 200"]);
        assert_eq!(follower.offset(), text.len() as u64);
    }

    #[test]
    fn test_tail_short_file_and_zero_count() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cadence.log");
        fs::write(&path, "only\r\n").unwrap();

        assert_eq!(LogFollower::new(&path).tail(50).unwrap(), vec!["only"]);

        let mut follower = LogFollower::new(&path);
        assert!(follower.tail(0).unwrap().is_empty());
        assert_eq!(follower.offset(), 6);
    }

    #[test]
    fn test_poll_returns_appended_lines_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cadence.log");
        fs::write(&path, "old 1\nold 2\n").unwrap();

        let mut follower = LogFollower::new(&path);
        follower.tail(10).unwrap();
        assert!(follower.poll().unwrap().is_empty());

        append(&path, "new 1\nnew 2\n");
        assert_eq!(follower.poll().unwrap(), vec!["new 1", "new 2"]);
        assert!(follower.poll().unwrap().is_empty());
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cadence.log");
        fs::write(&path, "done\nhalf").unwrap();

        let mut follower = LogFollower::new(&path);
        assert_eq!(follower.tail(10).unwrap(), vec!["done"]);

        append(&path, " written\n");
        assert_eq!(follower.poll().unwrap(), vec!["half written"]);
    }

    #[test]
    fn test_truncated_log_is_reread() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cadence.log");
        fs::write(&path, "a fairly long first line\nsecond\n").unwrap();

        let mut follower = LogFollower::new(&path);
        follower.tail(10).unwrap();

        fs::write(&path, "fresh\n").unwrap();
        assert_eq!(follower.poll().unwrap(), vec!["fresh"]);
    }

    #[test]
    fn test_missing_log_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut follower = LogFollower::new(dir.path().join("absent.log"));
        assert!(follower.poll().is_err());
    }
}
