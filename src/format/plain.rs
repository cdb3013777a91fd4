use super::{write_indented, Formatter};
use crate::render::{argument_pairs, RenderBlock, StyleHint};
use std::borrow::Cow;
use std::fmt::{self, Write};
use std::path::Path;

/// Bare text with line-based section labels and no control characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFormatter;

impl Formatter for PlainFormatter {
    fn render_block(&self, block: &RenderBlock, out: &mut String) -> fmt::Result {
        match block {
            RenderBlock::Header { label, .. } => writeln!(out, "{}", clean(label)),
            RenderBlock::Text { content, style } => {
                let content = clean(content);
                if *style == StyleHint::Raw {
                    write_indented(out, &content, "  [unparsed] ")
                } else {
                    write_indented(out, &content, "  ")
                }
            }
            RenderBlock::Code { content, .. } => write_indented(out, &clean(content), "    "),
            RenderBlock::ToolCall {
                name,
                id,
                arguments,
                ..
            } => {
                match id {
                    Some(id) => writeln!(out, "  Tool: {} ({})", clean(name), clean(id))?,
                    None => writeln!(out, "  Tool: {}", clean(name))?,
                }
                for (key, value) in argument_pairs(arguments) {
                    write_indented(out, &clean(&format!("{key}: {value}")), "    ")?;
                }
                Ok(())
            }
            RenderBlock::ToolResult {
                content,
                is_error,
                tool_use_id,
            } => {
                let label = if *is_error { "Error" } else { "Result" };
                match tool_use_id {
                    Some(id) => writeln!(out, "  {label} ({}):", clean(id))?,
                    None => writeln!(out, "  {label}:")?,
                }
                if !content.is_empty() {
                    write_indented(out, &clean(content), "    ")?;
                }
                Ok(())
            }
            RenderBlock::Thinking { content } => {
                writeln!(out, "  Thinking:")?;
                write_indented(out, &clean(content), "    ")
            }
            RenderBlock::Metadata { entries } => {
                let joined = entries
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect::<Vec<_>>()
                    .join(" | ");
                writeln!(out, "  [{}]", clean(&joined))
            }
            RenderBlock::Separator => writeln!(out),
        }
    }

    fn line_label(&self, line: u64, out: &mut String) -> fmt::Result {
        writeln!(out, "[{line}]")
    }

    fn source_banner(&self, path: &Path) -> String {
        format!("==> {} <==\n", clean(&path.display().to_string()))
    }
}

/// Drop control characters other than newline and tab.
fn clean(text: &str) -> Cow<'_, str> {
    if text.chars().any(is_stripped) {
        Cow::Owned(text.chars().filter(|c| !is_stripped(*c)).collect())
    } else {
        Cow::Borrowed(text)
    }
}

fn is_stripped(c: char) -> bool {
    c.is_control() && c != '\n' && c != '\t'
}
