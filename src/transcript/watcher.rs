//! Live following of a transcript file, or of every transcript in a
//! directory.
//!
//! Each followed file gets its own task owning a [`TailCursor`]. Tasks push
//! complete lines into one channel; [`Watcher::run`] drains it on the
//! caller's task, so the sink never runs concurrently with itself.

use super::path::list_transcripts;
use super::tail::{SourceLine, TailCursor};
use crate::error::{Error, Result};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// What to follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSource {
    File(PathBuf),
    Directory(PathBuf),
}

impl WatchSource {
    /// Directory when `path` is one, a single file otherwise.
    pub fn detect(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_dir() {
            WatchSource::Directory(path)
        } else {
            WatchSource::File(path)
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            WatchSource::File(path) | WatchSource::Directory(path) => path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Lines of existing content to deliver before following
    pub initial_lines: usize,
    pub poll_interval: Duration,
    /// Descend into subdirectories in directory mode
    pub recursive: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            initial_lines: 0,
            poll_interval: Duration::from_millis(250),
            recursive: true,
        }
    }
}

/// A complete line from one of the followed files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedLine {
    pub path: PathBuf,
    pub line_number: u64,
    pub text: String,
}

impl WatchedLine {
    fn new(path: &Path, line: SourceLine) -> Self {
        Self {
            path: path.to_path_buf(),
            line_number: line.line_number,
            text: line.text,
        }
    }
}

pub struct Watcher {
    source: WatchSource,
    options: WatchOptions,
}

/// Handles shared by every tail task.
#[derive(Clone)]
struct Feed {
    tx: mpsc::UnboundedSender<WatchedLine>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl Feed {
    /// Returns false once the receiving side is gone.
    fn send(&self, path: &Path, lines: Vec<SourceLine>) -> bool {
        lines
            .into_iter()
            .all(|line| self.tx.send(WatchedLine::new(path, line)).is_ok())
    }

    /// Sleep until the next poll is due. Returns false on cancellation.
    async fn wait(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = self.wake.notified() => true,
            _ = tokio::time::sleep(self.poll_interval) => true,
        }
    }
}

impl Watcher {
    pub fn new(source: WatchSource, options: WatchOptions) -> Self {
        Self { source, options }
    }

    /// Follow the source until `cancel` fires, handing every line to `sink`
    /// in arrival order.
    ///
    /// A watched file may be missing; it is picked up once it appears. A
    /// watched directory must exist when the run starts.
    pub async fn run<F>(self, cancel: CancellationToken, mut sink: F) -> Result<()>
    where
        F: FnMut(WatchedLine),
    {
        if let WatchSource::Directory(dir) = &self.source {
            if !dir.is_dir() {
                return Err(Error::SourceUnavailable {
                    path: dir.clone(),
                    source: io::Error::new(io::ErrorKind::NotFound, "not a directory"),
                });
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let wake = Arc::new(Notify::new());
        let _fs_events = watch_filesystem(&self.source, self.options.recursive, wake.clone());

        let feed = Feed {
            tx,
            wake,
            cancel: cancel.clone(),
            poll_interval: self.options.poll_interval,
        };
        let driver = match self.source {
            WatchSource::File(path) => {
                tokio::spawn(follow_file(path, self.options.initial_lines, feed))
            }
            WatchSource::Directory(dir) => tokio::spawn(follow_directory(dir, self.options, feed)),
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = rx.recv() => match line {
                    Some(line) => sink(line),
                    None => break,
                },
            }
        }

        if let Err(e) = driver.await {
            tracing::error!(error = %e, "watch task failed");
        }
        rx.close();
        while let Some(line) = rx.recv().await {
            sink(line);
        }
        tracing::debug!("watcher stopped");
        Ok(())
    }
}

/// Start OS file notifications that wake the tail loops early.
///
/// The returned handle must stay alive for events to keep flowing. `None`
/// means notifications are unavailable and the loops rely on polling.
fn watch_filesystem(
    source: &WatchSource,
    recursive: bool,
    wake: Arc<Notify>,
) -> Option<RecommendedWatcher> {
    let (target, mode) = match source {
        // The parent sees replacement and creation of the file too
        WatchSource::File(path) => (
            path.parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new(".")),
            RecursiveMode::NonRecursive,
        ),
        WatchSource::Directory(dir) if recursive => (dir.as_path(), RecursiveMode::Recursive),
        WatchSource::Directory(dir) => (dir.as_path(), RecursiveMode::NonRecursive),
    };

    let watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| {
            if res.is_ok() {
                wake.notify_waiters();
            }
        },
        Config::default(),
    );
    let mut watcher = match watcher {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "file notifications unavailable, polling only");
            return None;
        }
    };
    if let Err(e) = watcher.watch(target, mode) {
        tracing::warn!(path = %target.display(), error = %e, "cannot watch path, polling only");
        return None;
    }
    Some(watcher)
}

async fn follow_file(path: PathBuf, initial_lines: usize, feed: Feed) {
    let cursor = match TailCursor::open_at_end(&path, initial_lines).await {
        Ok((cursor, context)) => {
            if !feed.send(&path, context) {
                return;
            }
            cursor
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "transcript not available yet, waiting");
            TailCursor::from_start(path)
        }
    };
    tail(cursor, feed).await;
}

async fn follow_directory(dir: PathBuf, options: WatchOptions, feed: Feed) {
    let mut known: HashSet<PathBuf> = HashSet::new();
    let mut tails = JoinSet::new();

    let mut existing = scan(&dir, options.recursive).await;
    existing.sort_by_key(|(_, modified)| *modified);
    tracing::debug!(dir = %dir.display(), files = existing.len(), "following directory");

    for (path, _) in existing {
        known.insert(path.clone());
        let cursor = match TailCursor::open_at_end(&path, options.initial_lines).await {
            Ok((cursor, context)) => {
                if !feed.send(&path, context) {
                    return;
                }
                cursor
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "cannot open transcript");
                TailCursor::from_start(path)
            }
        };
        tails.spawn(tail(cursor, feed.clone()));
    }

    while feed.wait().await {
        for (path, _) in scan(&dir, options.recursive).await {
            if known.insert(path.clone()) {
                tracing::info!(path = %path.display(), "new transcript");
                tails.spawn(tail(TailCursor::from_start(path), feed.clone()));
            }
        }
    }

    while tails.join_next().await.is_some() {}
}

async fn scan(dir: &Path, recursive: bool) -> Vec<(PathBuf, SystemTime)> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || list_transcripts(&dir, recursive))
        .await
        .unwrap_or_default()
}

async fn tail(mut cursor: TailCursor, feed: Feed) {
    loop {
        match cursor.poll().await {
            Ok(lines) => {
                if !feed.send(cursor.path(), lines) {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(path = %cursor.path().display(), error = %e, "poll failed, retrying");
            }
        }
        if !feed.wait().await {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const QUICK: Duration = Duration::from_millis(20);

    fn options(initial_lines: usize) -> WatchOptions {
        WatchOptions {
            initial_lines,
            poll_interval: QUICK,
            recursive: false,
        }
    }

    fn append(path: &Path, content: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    /// Run a watcher in the background, forwarding lines to a channel.
    fn spawn_watcher(
        source: WatchSource,
        options: WatchOptions,
    ) -> (
        CancellationToken,
        tokio::task::JoinHandle<Result<()>>,
        mpsc::UnboundedReceiver<WatchedLine>,
    ) {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Watcher::new(source, options);
        let handle = tokio::spawn(watcher.run(cancel.clone(), move |line| {
            let _ = tx.send(line);
        }));
        (cancel, handle, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<WatchedLine>) -> WatchedLine {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a line")
            .expect("watcher closed the channel")
    }

    async fn stop(
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<Result<()>>,
        rx: &mut mpsc::UnboundedReceiver<WatchedLine>,
    ) -> Vec<WatchedLine> {
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("watcher did not stop")
            .unwrap()
            .unwrap();
        let mut rest = Vec::new();
        while let Some(line) = rx.recv().await {
            rest.push(line);
        }
        rest
    }

    #[tokio::test]
    async fn test_tail_resume_delivers_each_line_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        let existing: String = (1..=10).map(|i| format!("line-{i}\n")).collect();
        std::fs::write(&path, existing).unwrap();

        let (cancel, handle, mut rx) = spawn_watcher(WatchSource::File(path.clone()), options(3));

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(next(&mut rx).await);
        }
        append(&path, "line-11\nline-12\n");
        for _ in 0..2 {
            seen.push(next(&mut rx).await);
        }
        seen.extend(stop(cancel, handle, &mut rx).await);

        let texts: Vec<&str> = seen.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["line-8", "line-9", "line-10", "line-11", "line-12"]);
        let numbers: Vec<u64> = seen.iter().map(|l| l.line_number).collect();
        assert_eq!(numbers, vec![8, 9, 10, 11, 12]);
        assert!(seen.iter().all(|l| l.path == path));
    }

    #[tokio::test]
    async fn test_truncation_is_followed_from_the_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        std::fs::write(&path, "old-1\nold-2\nold-3\n").unwrap();

        let (cancel, handle, mut rx) = spawn_watcher(WatchSource::File(path.clone()), options(1));
        assert_eq!(next(&mut rx).await.text, "old-3");

        std::fs::write(&path, "new-1\n").unwrap();
        let line = next(&mut rx).await;
        assert_eq!(line.text, "new-1");
        assert_eq!(line.line_number, 1);

        assert!(stop(cancel, handle, &mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_picked_up_from_the_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("later.jsonl");

        let (cancel, handle, mut rx) = spawn_watcher(WatchSource::File(path.clone()), options(0));
        tokio::time::sleep(QUICK * 3).await;
        append(&path, "first\n");

        assert_eq!(next(&mut rx).await.text, "first");
        stop(cancel, handle, &mut rx).await;
    }

    #[tokio::test]
    async fn test_directory_follows_existing_and_new_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jsonl");
        std::fs::write(&a, "a-1\na-2\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored\n").unwrap();

        let (cancel, handle, mut rx) =
            spawn_watcher(WatchSource::Directory(dir.path().to_path_buf()), options(1));
        assert_eq!(next(&mut rx).await.text, "a-2");

        let b = dir.path().join("b.jsonl");
        append(&b, "b-1\n");
        append(&a, "a-3\n");

        let mut got = vec![next(&mut rx).await, next(&mut rx).await];
        got.extend(stop(cancel, handle, &mut rx).await);
        got.sort_by(|x, y| x.text.cmp(&y.text));

        assert_eq!(got.len(), 2);
        assert_eq!((got[0].path.as_path(), got[0].text.as_str()), (a.as_path(), "a-3"));
        assert_eq!((got[1].path.as_path(), got[1].text.as_str()), (b.as_path(), "b-1"));
        assert_eq!(got[1].line_number, 1);
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = Watcher::new(
            WatchSource::Directory(dir.path().join("nope")),
            WatchOptions::default(),
        );
        let result = watcher.run(CancellationToken::new(), |_| {}).await;
        assert!(matches!(result, Err(Error::SourceUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_cancel_stops_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let (cancel, handle, mut rx) = spawn_watcher(
            WatchSource::File(dir.path().join("s.jsonl")),
            WatchOptions {
                poll_interval: Duration::from_secs(60),
                ..options(0)
            },
        );
        tokio::time::sleep(QUICK).await;
        assert!(stop(cancel, handle, &mut rx).await.is_empty());
    }

    #[test]
    fn test_detect_source_kind() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            WatchSource::detect(dir.path()),
            WatchSource::Directory(dir.path().to_path_buf())
        );
        let file = dir.path().join("s.jsonl");
        assert_eq!(WatchSource::detect(&file), WatchSource::File(file.clone()));
        assert_eq!(WatchSource::detect(&file).path(), file.as_path());
    }
}
