use super::Formatter;
use crate::render::{argument_pairs, RenderBlock, StyleHint};
use crossterm::style::{Color, Stylize};
use std::fmt::{self, Write};
use std::path::Path;

/// Colored terminal output using crossterm styling.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiFormatter;

impl Formatter for AnsiFormatter {
    fn render_block(&self, block: &RenderBlock, out: &mut String) -> fmt::Result {
        match block {
            RenderBlock::Header { label, style } => {
                let icon = match style {
                    StyleHint::User => "◂",
                    StyleHint::Assistant => "◆",
                    _ => "▸",
                };
                writeln!(out, "{}", paint(&format!("{icon} {label}"), *style).bold())
            }
            RenderBlock::Text { content, style } => {
                paint_lines(out, content, "  ", |line| paint(line, *style).to_string())
            }
            RenderBlock::Code { content, .. } => paint_lines(out, content, "", |line| {
                format!("  {} {}", "│".dark_grey(), line.with(Color::Magenta))
            }),
            RenderBlock::ToolCall {
                name,
                id,
                arguments,
                style,
            } => {
                write!(out, "  {}", paint(&format!("▸ Tool: {name}"), *style).bold())?;
                match id {
                    Some(id) => writeln!(out, " {}", format!("({id})").dim())?,
                    None => writeln!(out)?,
                }
                for (key, value) in argument_pairs(arguments) {
                    let mut lines = value.split('\n');
                    let first = lines.next().unwrap_or_default();
                    writeln!(out, "    {} {first}", format!("{key}:").bold())?;
                    for line in lines {
                        writeln!(out, "      {line}")?;
                    }
                }
                Ok(())
            }
            RenderBlock::ToolResult {
                content,
                is_error,
                tool_use_id,
            } => {
                let (label, style) = if *is_error {
                    ("✗ Error", StyleHint::Error)
                } else {
                    ("✓ Result", StyleHint::Success)
                };
                write!(out, "  {}", paint(label, style).bold())?;
                match tool_use_id {
                    Some(id) => writeln!(out, " {}", format!("({id})").dim())?,
                    None => writeln!(out)?,
                }
                if content.is_empty() {
                    return Ok(());
                }
                let body_style = if *is_error {
                    StyleHint::Error
                } else {
                    StyleHint::Plain
                };
                paint_lines(out, content, "    ", |line| {
                    paint(line, body_style).to_string()
                })
            }
            RenderBlock::Thinking { content } => {
                writeln!(out, "  {}", "Thinking:".dim().italic())?;
                paint_lines(out, content, "    ", |line| {
                    line.dim().italic().to_string()
                })
            }
            RenderBlock::Metadata { entries } => {
                let joined = entries
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect::<Vec<_>>()
                    .join(" | ");
                writeln!(out, "  {}", format!("-- {joined}").dim())
            }
            RenderBlock::Separator => writeln!(out),
        }
    }

    fn line_label(&self, line: u64, out: &mut String) -> fmt::Result {
        writeln!(out, "{}", format!("[{line}]").dim())
    }

    fn source_banner(&self, path: &Path) -> String {
        format!(
            "{}\n{}\n",
            "─".repeat(60).dim(),
            format!("📄 {}", path.display()).cyan().bold()
        )
    }
}

/// Map an abstract style hint to terminal styling.
fn paint(text: &str, style: StyleHint) -> crossterm::style::StyledContent<&str> {
    match style {
        StyleHint::Plain | StyleHint::Assistant => text.stylize(),
        StyleHint::Emphasis => text.bold(),
        StyleHint::Dim => text.dim(),
        StyleHint::Error => text.red(),
        StyleHint::Success => text.green(),
        StyleHint::Info => text.cyan(),
        StyleHint::User => text.green(),
        StyleHint::System => text.blue(),
        StyleHint::Tool => text.yellow(),
        StyleHint::Raw => text.red().italic(),
    }
}

/// Style each line separately so indentation stays outside escape codes.
fn paint_lines(
    out: &mut String,
    text: &str,
    indent: &str,
    style: impl Fn(&str) -> String,
) -> fmt::Result {
    for line in text.split('\n') {
        if line.is_empty() {
            writeln!(out)?;
        } else {
            writeln!(out, "{indent}{}", style(line))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatterState;

    fn render(blocks: &[RenderBlock]) -> String {
        AnsiFormatter.render(blocks, &mut FormatterState::default())
    }

    #[test]
    fn test_header_is_styled() {
        let out = render(&[RenderBlock::header("USER", StyleHint::User)]);
        assert!(out.contains("◂ USER"));
        assert!(out.contains('\u{1b}'));
    }

    #[test]
    fn test_error_result_is_highlighted() {
        let out = render(&[RenderBlock::ToolResult {
            content: "boom".to_string(),
            is_error: true,
            tool_use_id: Some("t1".to_string()),
        }]);
        assert!(out.contains("✗ Error"));
        assert!(out.contains("boom"));
        assert!(out.contains("(t1)"));
        assert!(out.contains('\u{1b}'));
    }

    #[test]
    fn test_plain_text_is_indented_without_codes() {
        let out = render(&[RenderBlock::text("one\ntwo", StyleHint::Plain)]);
        assert_eq!(out, "  one\n  two\n");
    }

    #[test]
    fn test_code_lines_keep_content() {
        let out = render(&[RenderBlock::Code {
            content: "fn main() {}\nlet x = 1;".to_string(),
            language: Some("rust".to_string()),
        }]);
        assert_eq!(out.lines().count(), 2);
        assert!(out.contains("fn main() {}"));
        assert!(out.contains("let x = 1;"));
    }

    #[test]
    fn test_tool_call_arguments() {
        let out = render(&[RenderBlock::ToolCall {
            name: "Read".to_string(),
            id: None,
            arguments: serde_json::json!({"file_path": "/tmp/a"}),
            style: StyleHint::Tool,
        }]);
        assert!(out.contains("▸ Tool: Read"));
        assert!(out.contains(" /tmp/a\n"));
    }
}
