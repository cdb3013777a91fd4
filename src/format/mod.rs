//! Output formatters: ANSI terminal, Markdown, and plain text.
//!
//! A [`Formatter`] turns the blocks of one message into a text fragment.
//! Layout state that spans messages lives in [`FormatterState`], which the
//! caller threads through every call.

mod ansi;
mod markdown;
mod plain;

pub use ansi::AnsiFormatter;
pub use markdown::MarkdownFormatter;
pub use plain::PlainFormatter;

use crate::render::RenderBlock;
use serde::Deserialize;
use std::fmt::{self, Write};
use std::path::{Path, PathBuf};

/// Output format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Ansi,
    Markdown,
    Plain,
}

impl OutputFormat {
    pub fn formatter(&self) -> Box<dyn Formatter + Send> {
        match self {
            OutputFormat::Ansi => Box::new(AnsiFormatter),
            OutputFormat::Markdown => Box::new(MarkdownFormatter),
            OutputFormat::Plain => Box::new(PlainFormatter),
        }
    }
}

/// Layout state carried across render calls within one run.
#[derive(Debug, Default)]
pub struct FormatterState {
    line_numbers: bool,
    /// Input line number of the message being rendered
    line: u64,
    rendered: u64,
    source: Option<PathBuf>,
}

impl FormatterState {
    pub fn new(line_numbers: bool) -> Self {
        Self {
            line_numbers,
            ..Self::default()
        }
    }

    /// Record the input line number of the next message.
    pub fn set_line(&mut self, line: u64) {
        self.line = line;
    }

    pub fn line(&self) -> u64 {
        self.line
    }

    /// Line label to print, if line numbering is on.
    pub fn line_label(&self) -> Option<u64> {
        self.line_numbers.then_some(self.line)
    }

    /// Number of messages rendered so far.
    pub fn rendered(&self) -> u64 {
        self.rendered
    }

    /// Switch the current source; returns true when it changed.
    pub fn switch_source(&mut self, path: &Path) -> bool {
        if self.source.as_deref() == Some(path) {
            return false;
        }
        self.source = Some(path.to_path_buf());
        true
    }
}

pub trait Formatter {
    /// Append the rendering of one block to `out`.
    fn render_block(&self, block: &RenderBlock, out: &mut String) -> fmt::Result;

    /// Append the input line label of a message.
    fn line_label(&self, line: u64, out: &mut String) -> fmt::Result;

    /// Banner printed when output switches to another source file.
    fn source_banner(&self, path: &Path) -> String;

    /// Render the blocks of one message.
    ///
    /// A block that fails to render is logged and replaced by a visible
    /// fallback line; the rest of the message is still rendered.
    fn render(&self, blocks: &[RenderBlock], state: &mut FormatterState) -> String {
        let mut out = String::new();

        if let Some(line) = state.line_label() {
            let mut label = String::new();
            if self.line_label(line, &mut label).is_ok() {
                out.push_str(&label);
            }
        }

        for block in blocks {
            let mut piece = String::new();
            match self.render_block(block, &mut piece) {
                Ok(()) => out.push_str(&piece),
                Err(e) => {
                    tracing::error!(line = state.line, ?block, error = %e, "failed to render block");
                    let _ = writeln!(out, "[render error: {}]", block_name(block));
                }
            }
        }

        state.rendered += 1;
        out
    }
}

fn block_name(block: &RenderBlock) -> &'static str {
    match block {
        RenderBlock::Header { .. } => "header",
        RenderBlock::Text { .. } => "text",
        RenderBlock::Code { .. } => "code",
        RenderBlock::ToolCall { .. } => "tool call",
        RenderBlock::ToolResult { .. } => "tool result",
        RenderBlock::Thinking { .. } => "thinking",
        RenderBlock::Metadata { .. } => "metadata",
        RenderBlock::Separator => "separator",
    }
}

/// Write every line of `text` with `prefix` in front.
fn write_indented(out: &mut String, text: &str, prefix: &str) -> fmt::Result {
    for line in text.split('\n') {
        if line.is_empty() {
            writeln!(out)?;
        } else {
            writeln!(out, "{prefix}{line}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterConfig;
    use crate::render::to_blocks;
    use crate::transcript::Message;

    const SESSION: &[&str] = &[
        r#"{"type":"user","uuid":"u1","message":{"content":"Fix the parser please"}}"#,
        r#"{"type":"assistant","uuid":"a1","message":{"content":[{"type":"thinking","thinking":"Need to read it first"},{"type":"text","text":"Reading the file:\n```rust\nfn parse() {}\n```\nLooks fine."},{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"cargo test"}}]}}"#,
        r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"test result: ok"}]}}"#,
        r#"{"type":"summary","summary":"Parser fix"}"#,
        "{oops",
    ];

    const PAYLOADS: &[&str] = &[
        "Fix the parser please",
        "Need to read it first",
        "Reading the file:",
        "fn parse() {}",
        "Looks fine.",
        "Bash",
        "cargo test",
        "test result: ok",
        "Parser fix",
        "{oops",
    ];

    fn render_all(format: OutputFormat, config: &FilterConfig) -> String {
        let formatter = format.formatter();
        let mut state = FormatterState::new(config.line_numbers);
        let mut out = String::new();
        for (i, line) in SESSION.iter().enumerate() {
            state.set_line(i as u64 + 1);
            let blocks = to_blocks(&Message::parse(line), config);
            out.push_str(&formatter.render(&blocks, &mut state));
        }
        out
    }

    fn assert_in_order(output: &str, payloads: &[&str]) {
        let mut from = 0;
        for payload in payloads {
            match output[from..].find(payload) {
                Some(pos) => from += pos + payload.len(),
                None => panic!("payload {payload:?} missing or out of order in:\n{output}"),
            }
        }
    }

    #[test]
    fn test_every_format_keeps_payloads_in_order() {
        let config = FilterConfig::default();
        for format in [OutputFormat::Ansi, OutputFormat::Markdown, OutputFormat::Plain] {
            assert_in_order(&render_all(format, &config), PAYLOADS);
        }
    }

    #[test]
    fn test_markdown_text_matches_plain_text() {
        let config = FilterConfig::default();
        let markdown = render_all(OutputFormat::Markdown, &config);
        let plain = render_all(OutputFormat::Plain, &config);

        // Text recovered by a CommonMark parser, in document order
        let mut recovered = String::new();
        for event in pulldown_cmark::Parser::new(&markdown) {
            match event {
                pulldown_cmark::Event::Text(t) | pulldown_cmark::Event::Code(t) => {
                    recovered.push_str(&t);
                    recovered.push('\n');
                }
                _ => {}
            }
        }
        assert_in_order(&recovered, PAYLOADS);
        assert_in_order(&plain, PAYLOADS);
    }

    #[test]
    fn test_line_labels_follow_state() {
        let config = FilterConfig::builder().line_numbers(true).build().unwrap();
        let plain = render_all(OutputFormat::Plain, &config);
        assert_in_order(&plain, &["[1]", "[2]", "[3]", "[4]", "[5]"]);
    }

    #[test]
    fn test_state_counts_rendered_messages() {
        let formatter = OutputFormat::Plain.formatter();
        let mut state = FormatterState::new(false);
        formatter.render(&[RenderBlock::Separator], &mut state);
        formatter.render(&[RenderBlock::Separator], &mut state);
        assert_eq!(state.rendered(), 2);
    }

    /// Fails on code blocks, renders everything else as its block name.
    struct FailingOnCode;

    impl Formatter for FailingOnCode {
        fn render_block(&self, block: &RenderBlock, out: &mut String) -> fmt::Result {
            if let RenderBlock::Code { .. } = block {
                return Err(fmt::Error);
            }
            writeln!(out, "{}", block_name(block))
        }

        fn line_label(&self, line: u64, out: &mut String) -> fmt::Result {
            writeln!(out, "#{line}")
        }

        fn source_banner(&self, path: &Path) -> String {
            path.display().to_string()
        }
    }

    #[test]
    fn test_failed_block_is_replaced_and_rest_renders() {
        let mut state = FormatterState::default();
        let out = FailingOnCode.render(
            &[
                RenderBlock::text("before", crate::render::StyleHint::Plain),
                RenderBlock::Code {
                    content: "x".to_string(),
                    language: None,
                },
                RenderBlock::Separator,
            ],
            &mut state,
        );
        assert_eq!(out, "text\n[render error: code]\nseparator\n");
        assert_eq!(state.rendered(), 1);
    }

    #[test]
    fn test_switch_source() {
        let mut state = FormatterState::default();
        assert!(state.switch_source(Path::new("/a.jsonl")));
        assert!(!state.switch_source(Path::new("/a.jsonl")));
        assert!(state.switch_source(Path::new("/b.jsonl")));
    }
}
