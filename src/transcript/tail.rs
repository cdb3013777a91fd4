//! Incremental reading of a growing transcript file.

use std::collections::VecDeque;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};

/// One complete line read from a source, numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub line_number: u64,
    pub text: String,
}

/// Marker that changes when a path starts pointing at a different file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    primary: u64,
    secondary: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            primary: meta.dev(),
            secondary: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(meta: &std::fs::Metadata) -> Option<Self> {
        let created = meta
            .created()
            .ok()?
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?;
        Some(Self {
            primary: created.as_secs(),
            secondary: u64::from(created.subsec_nanos()),
        })
    }
}

/// Read position in one file.
///
/// Only complete lines are handed out; a trailing fragment without a newline
/// is kept until the writer finishes it. When the file shrinks below the
/// cursor or is replaced by another file, the cursor starts over at zero.
#[derive(Debug)]
pub struct TailCursor {
    path: PathBuf,
    offset: u64,
    identity: Option<FileIdentity>,
    pending: Vec<u8>,
    line_number: u64,
}

impl TailCursor {
    /// Cursor at the beginning of `path`; everything in it is new.
    pub fn from_start(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            identity: None,
            pending: Vec::new(),
            line_number: 0,
        }
    }

    /// Open a cursor after the last complete line of `path`, returning up to
    /// `context` of the lines before it.
    pub async fn open_at_end(
        path: impl Into<PathBuf>,
        context: usize,
    ) -> io::Result<(Self, Vec<SourceLine>)> {
        let path = path.into();
        let file = File::open(&path).await?;
        let meta = file.metadata().await?;
        let mut reader = BufReader::new(file);

        let mut recent: VecDeque<SourceLine> = VecDeque::with_capacity(context);
        let mut offset = 0u64;
        let mut line_number = 0u64;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf).await?;
            if n == 0 || buf.last() != Some(&b'\n') {
                break;
            }
            offset += n as u64;
            line_number += 1;
            if context > 0 {
                if recent.len() == context {
                    recent.pop_front();
                }
                recent.push_back(SourceLine {
                    line_number,
                    text: decode(&buf),
                });
            }
        }

        let cursor = Self {
            path,
            offset,
            identity: FileIdentity::of(&meta),
            pending: Vec::new(),
            line_number,
        };
        Ok((cursor, recent.into()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes consumed so far, including any pending fragment.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of the last complete line handed out.
    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    fn reset(&mut self) {
        self.offset = 0;
        self.pending.clear();
        self.line_number = 0;
    }

    /// Read whatever was appended since the last poll.
    ///
    /// Returns an error when the file cannot be inspected or opened; the
    /// cursor is left untouched so the caller can simply poll again.
    pub async fn poll(&mut self) -> io::Result<Vec<SourceLine>> {
        let meta = fs::metadata(&self.path).await?;
        let identity = FileIdentity::of(&meta);
        let replaced = self.identity.is_some() && identity != self.identity;

        if replaced || meta.len() < self.offset {
            tracing::info!(
                path = %self.path.display(),
                replaced,
                "transcript truncated or replaced, reading from the start"
            );
            self.reset();
        }
        self.identity = identity;

        if meta.len() == self.offset {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path).await?;
        if !self.line_boundary_intact(&mut file).await? {
            tracing::info!(
                path = %self.path.display(),
                "transcript rewritten in place, reading from the start"
            );
            self.reset();
        }
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut chunk = Vec::new();
        file.read_to_end(&mut chunk).await?;

        self.offset += chunk.len() as u64;
        self.pending.extend_from_slice(&chunk);
        Ok(self.take_complete_lines())
    }

    /// The byte before the pending line must still be a newline. A file that
    /// was truncated and rewritten past the cursor between two polls fails
    /// this check even though it never looked shorter.
    async fn line_boundary_intact(&self, file: &mut File) -> io::Result<bool> {
        let line_start = self.offset - self.pending.len() as u64;
        if line_start == 0 {
            return Ok(true);
        }
        file.seek(SeekFrom::Start(line_start - 1)).await?;
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).await?;
        Ok(byte[0] == b'\n')
    }

    fn take_complete_lines(&mut self) -> Vec<SourceLine> {
        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete[..last_newline]
            .split(|&b| b == b'\n')
            .map(|raw| {
                self.line_number += 1;
                SourceLine {
                    line_number: self.line_number,
                    text: decode(raw),
                }
            })
            .collect()
    }
}

fn decode(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\n', '\r']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_lines(path: &Path, lines: &[&str]) {
        let mut file = std::fs::File::create(path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    fn append(path: &Path, content: &str) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    fn texts(lines: &[SourceLine]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[tokio::test]
    async fn test_open_at_end_returns_trailing_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        write_lines(&path, &["1", "2", "3", "4", "5"]);

        let (mut cursor, context) = TailCursor::open_at_end(&path, 3).await.unwrap();
        assert_eq!(texts(&context), vec!["3", "4", "5"]);
        assert_eq!(context[0].line_number, 3);
        assert_eq!(cursor.line_number(), 5);

        append(&path, "6\n7\n");
        let new = cursor.poll().await.unwrap();
        assert_eq!(texts(&new), vec!["6", "7"]);
        assert_eq!(new[1].line_number, 7);
        assert!(cursor.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_at_end_without_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        write_lines(&path, &["1", "2"]);

        let (cursor, context) = TailCursor::open_at_end(&path, 0).await.unwrap();
        assert!(context.is_empty());
        assert_eq!(cursor.offset(), 4);
    }

    #[tokio::test]
    async fn test_partial_line_waits_for_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        std::fs::write(&path, "done\nhal").unwrap();

        let (mut cursor, context) = TailCursor::open_at_end(&path, 5).await.unwrap();
        assert_eq!(texts(&context), vec!["done"]);

        // the fragment is re-read from the cursor and held back
        assert!(cursor.poll().await.unwrap().is_empty());

        append(&path, "f\r\n");
        let new = cursor.poll().await.unwrap();
        assert_eq!(texts(&new), vec!["half"]);
        assert_eq!(new[0].line_number, 2);
    }

    #[tokio::test]
    async fn test_rewrite_past_cursor_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        write_lines(&path, &["aaaa", "bbbb"]);

        let mut cursor = TailCursor::from_start(&path);
        assert_eq!(texts(&cursor.poll().await.unwrap()), vec!["aaaa", "bbbb"]);

        // same inode, longer than before, no newline where the cursor stopped
        std::fs::write(&path, "xyzxyzxyzxyz\nnew\n").unwrap();
        let new = cursor.poll().await.unwrap();
        assert_eq!(texts(&new), vec!["xyzxyzxyzxyz", "new"]);
        assert_eq!(new[0].line_number, 1);
    }

    #[tokio::test]
    async fn test_truncation_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        write_lines(&path, &["old-1", "old-2", "old-3"]);

        let (mut cursor, _) = TailCursor::open_at_end(&path, 0).await.unwrap();
        std::fs::write(&path, "new-1\n").unwrap();

        let new = cursor.poll().await.unwrap();
        assert_eq!(texts(&new), vec!["new-1"]);
        assert_eq!(new[0].line_number, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_replaced_file_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        write_lines(&path, &["a"]);

        let (mut cursor, _) = TailCursor::open_at_end(&path, 0).await.unwrap();
        std::fs::rename(&path, dir.path().join("s.jsonl.1")).unwrap();
        write_lines(&path, &["fresh-1", "fresh-2"]);

        let new = cursor.poll().await.unwrap();
        assert_eq!(texts(&new), vec!["fresh-1", "fresh-2"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error_and_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("later.jsonl");
        let mut cursor = TailCursor::from_start(&path);

        assert!(cursor.poll().await.is_err());

        write_lines(&path, &["hello"]);
        let new = cursor.poll().await.unwrap();
        assert_eq!(texts(&new), vec!["hello"]);
    }
}
