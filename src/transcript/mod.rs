//! Claude Code transcript records and the files that hold them.
//!
//! Claude Code stores conversation transcripts at:
//! `~/.claude/projects/{encoded-cwd}/{session_id}.jsonl`

mod message;
mod path;
mod tail;
pub mod watcher;

pub use message::{
    Message, MessageBody, MessageKind, MessageMeta, ResultPayload, Segment, ToolInvocation,
    ToolOutcome, Usage,
};
pub use path::{
    claude_root, encode_path, find_latest_session, find_session_by_id, list_transcripts,
    projects_dir, resolve_watch_path,
};
pub use tail::{SourceLine, TailCursor};
pub use watcher::{WatchOptions, WatchSource, WatchedLine, Watcher};
