//! Append-only traffic log with a size cap.
//!
//! Every inbound datagram and outbound send is appended to a diagnostic
//! file; once the file grows past 10 MiB it is truncated to empty before the
//! next write. This is a side collaborator, not part of the protocol
//! contract: I/O failures are logged and swallowed.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use log::warn;

/// Truncate the log once it grows past this size (10 MiB).
pub const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

pub struct TrafficLog {
    path: PathBuf,
}

impl TrafficLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one line, truncating first if the file is over the cap.
    pub fn record(&self, line: &str) {
        if let Err(err) = self.append(line) {
            warn!(
                "traffic log write to {} failed: {err}",
                self.path.display()
            );
        }
    }

    fn append(&self, line: &str) -> io::Result<()> {
        let over_cap = fs::metadata(&self.path)
            .map(|meta| meta.len() > MAX_LOG_SIZE)
            .unwrap_or(false);
        if over_cap {
            File::create(&self.path)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rendezvous-wirelog-{tag}-{}", std::process::id()))
    }

    #[test]
    fn test_appends_lines() {
        let path = temp_path("append");
        fs::remove_file(&path).ok();

        let log = TrafficLog::new(&path);
        log.record("first");
        log.record("second");

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\n");
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_truncates_once_over_cap() {
        let path = temp_path("truncate");
        fs::write(&path, vec![b'x'; (MAX_LOG_SIZE + 1) as usize]).unwrap();

        let log = TrafficLog::new(&path);
        log.record("fresh start");

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "fresh start\n");
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_stays_appending_below_cap() {
        let path = temp_path("below-cap");
        fs::write(&path, "existing\n").unwrap();

        let log = TrafficLog::new(&path);
        log.record("more");

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "existing\nmore\n");
        fs::remove_file(&path).ok();
    }
}
