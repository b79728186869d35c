//! Byte-offset cursor over an append-only transcript file.
//!
//! The cursor only ever reads the bytes appended since its last read. A file
//! observed shorter than the cursor offset is treated as truncated: the cursor
//! restarts at byte 0 and drops any buffered partial line.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
/// Incremental read position plus the trailing, not yet terminated fragment.
pub struct TailCursor {
    offset: u64,
    pending: Vec<u8>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
/// Result of one `TailCursor::read_appended` call.
pub struct TailRead {
    pub lines: Vec<String>,
    pub truncated: bool,
    pub bytes_read: u64,
}

impl TailCursor {
    pub fn at_offset(offset: u64) -> Self {
        Self {
            offset,
            pending: Vec::new(),
        }
    }

    /// Seeds a cursor for `path`, either at the current end of file (skip
    /// history) or at byte 0.
    pub fn seed(path: &Path, from_end: bool) -> Result<Self> {
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("failed to stat transcript {}", path.display()))?;
        let offset = if from_end { metadata.len() } else { 0 };
        Ok(Self::at_offset(offset))
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Reads everything appended since the last call and returns the complete,
    /// non-blank lines in file order.
    pub fn read_appended(&mut self, path: &Path) -> Result<TailRead> {
        let size = std::fs::metadata(path)
            .with_context(|| format!("failed to stat transcript {}", path.display()))?
            .len();

        let mut read = TailRead::default();
        if size < self.offset {
            self.offset = 0;
            self.pending.clear();
            read.truncated = true;
        }
        if size == self.offset {
            return Ok(read);
        }

        let mut file = File::open(path)
            .with_context(|| format!("failed to open transcript {}", path.display()))?;
        file.seek(SeekFrom::Start(self.offset))
            .with_context(|| format!("failed to seek transcript {}", path.display()))?;
        let mut chunk = Vec::new();
        file.take(size - self.offset)
            .read_to_end(&mut chunk)
            .with_context(|| format!("failed to read transcript {}", path.display()))?;

        read.bytes_read = chunk.len() as u64;
        self.offset = self.offset.saturating_add(read.bytes_read);
        self.pending.extend_from_slice(&chunk);
        read.lines = self.drain_complete_lines();
        Ok(read)
    }

    fn drain_complete_lines(&mut self) -> Vec<String> {
        let Some(last_newline) = self.pending.iter().rposition(|byte| *byte == b'\n') else {
            return Vec::new();
        };
        let remainder = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, remainder);

        complete
            .split(|byte| *byte == b'\n')
            .map(|raw| raw.strip_suffix(b"\r").unwrap_or(raw))
            .map(|raw| String::from_utf8_lossy(raw).trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }
}
