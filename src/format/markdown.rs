use super::Formatter;
use crate::render::{argument_pairs, RenderBlock, StyleHint};
use std::fmt::{self, Write};
use std::path::Path;

/// CommonMark output. Every block ends with a blank line, so the fragments
/// of consecutive messages concatenate into one valid document.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn render_block(&self, block: &RenderBlock, out: &mut String) -> fmt::Result {
        match block {
            RenderBlock::Header { label, .. } => write!(out, "## {label}\n\n"),
            RenderBlock::Text { content, style } => match style {
                StyleHint::Raw => {
                    write!(out, "**Unparsed line:**\n\n")?;
                    write_fenced(out, content, None)
                }
                StyleHint::Emphasis => write_prose(out, &wrap_single_line(content, "**")),
                StyleHint::Info | StyleHint::System | StyleHint::Dim => {
                    write_prose(out, &wrap_single_line(content, "*"))
                }
                _ => write_prose(out, content),
            },
            RenderBlock::Code { content, language } => {
                write_fenced(out, content, language.as_deref())
            }
            RenderBlock::ToolCall { name, arguments, .. } => {
                write!(out, "#### Tool: {name}\n\n")?;
                let args = argument_pairs(arguments)
                    .into_iter()
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect::<Vec<_>>();
                if !args.is_empty() {
                    write_fenced(out, &args.join("\n"), None)?;
                }
                Ok(())
            }
            RenderBlock::ToolResult {
                content, is_error, ..
            } => {
                let label = if *is_error { "Error" } else { "Result" };
                write!(out, "#### {label}\n\n")?;
                if !content.is_empty() {
                    write_fenced(out, content, None)?;
                }
                Ok(())
            }
            RenderBlock::Thinking { content } => {
                out.push_str("<details>\n<summary>Thinking</summary>\n\n");
                write_prose(out, content)?;
                out.push_str("</details>\n\n");
                Ok(())
            }
            RenderBlock::Metadata { entries } => {
                let spans = entries
                    .iter()
                    .map(|(k, v)| code_span(&format!("{k}: {v}")))
                    .collect::<Vec<_>>()
                    .join(" ");
                write!(out, "{spans}\n\n")
            }
            RenderBlock::Separator => write!(out, "---\n\n"),
        }
    }

    fn line_label(&self, line: u64, out: &mut String) -> fmt::Result {
        write!(out, "`#{line}`\n\n")
    }

    fn source_banner(&self, path: &Path) -> String {
        format!("# {}\n\n", path.display())
    }
}

/// Prose passes through as Markdown, ending with a blank line. HTML block
/// openers outside code fences are escaped and a fence left open is closed,
/// so nothing after the prose is swallowed by it.
fn write_prose(out: &mut String, content: &str) -> fmt::Result {
    let mut fence: Option<(char, usize)> = None;
    for line in content.split('\n') {
        match (fence, fence_marker(line)) {
            (Some((open, open_len)), Some((marker, len, rest)))
                if marker == open && len >= open_len && rest.trim().is_empty() =>
            {
                fence = None;
                out.push_str(line);
            }
            (Some(_), _) => out.push_str(line),
            (None, Some((marker, len, rest))) if marker == '~' || !rest.contains('`') => {
                fence = Some((marker, len));
                out.push_str(line);
            }
            (None, _) => out.push_str(&escape_html_openers(line)),
        }
        out.push('\n');
    }
    if let Some((marker, len)) = fence {
        writeln!(out, "{}", marker.to_string().repeat(len))?;
    }
    out.push('\n');
    Ok(())
}

/// Fence character, run length and the rest of the line, for a line that
/// opens or closes a code fence.
fn fence_marker(line: &str) -> Option<(char, usize, &str)> {
    let body = line.trim_start_matches(' ');
    if line.len() - body.len() > 3 {
        return None;
    }
    let marker = body.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = body.chars().take_while(|c| *c == marker).count();
    (len >= 3).then(|| (marker, len, &body[len..]))
}

const RAW_HTML_TAGS: [&str; 5] = ["pre", "script", "style", "textarea", "/details"];

/// Backslash-escape every `<` that could start an HTML block running past a
/// blank line, or close the `<details>` wrapper around thinking.
fn escape_html_openers(line: &str) -> String {
    let mut escaped = String::with_capacity(line.len());
    for (i, c) in line.char_indices() {
        if c == '<' && opens_raw_html(&line[i + 1..]) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn opens_raw_html(rest: &str) -> bool {
    let head = rest.chars().take(12).collect::<String>().to_ascii_lowercase();
    if head.starts_with('?') || head.starts_with("!--") || head.starts_with("![cdata[") {
        return true;
    }
    if head.starts_with('!') && head[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
        return true;
    }
    RAW_HTML_TAGS.iter().any(|tag| {
        head.strip_prefix(tag).is_some_and(|after| {
            after.is_empty() || after.starts_with(|c: char| c.is_whitespace() || c == '>')
        })
    })
}

/// Fenced code block whose fence is longer than any backtick run inside.
fn write_fenced(out: &mut String, content: &str, language: Option<&str>) -> fmt::Result {
    let fence = "`".repeat((longest_backtick_run(content) + 1).max(3));
    write!(
        out,
        "{fence}{}\n{content}\n{fence}\n\n",
        language.unwrap_or_default()
    )
}

fn code_span(text: &str) -> String {
    let ticks = "`".repeat(longest_backtick_run(text) + 1);
    if text.starts_with('`') || text.ends_with('`') {
        format!("{ticks} {text} {ticks}")
    } else {
        format!("{ticks}{text}{ticks}")
    }
}

fn longest_backtick_run(text: &str) -> usize {
    text.split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0)
}

/// Emphasis only applies cleanly to one non-blank line.
fn wrap_single_line(text: &str, marker: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.contains('\n') || trimmed.contains(marker) {
        text.to_string()
    } else {
        format!("{marker}{trimmed}{marker}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterConfig;
    use crate::format::FormatterState;
    use crate::render::to_blocks;
    use crate::transcript::Message;
    use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Parser, Tag};
    use serde_json::json;

    fn render(blocks: &[RenderBlock]) -> String {
        MarkdownFormatter.render(blocks, &mut FormatterState::default())
    }

    #[test]
    fn test_code_block_fenced_with_language() {
        let out = render(&[RenderBlock::Code {
            content: "let x = 1;".to_string(),
            language: Some("rust".to_string()),
        }]);
        assert_eq!(out, "```rust\nlet x = 1;\n```\n\n");
    }

    #[test]
    fn test_fence_outgrows_inner_backticks() {
        let content = "before\n```\ninner\n```\nafter";
        let out = render(&[RenderBlock::Code {
            content: content.to_string(),
            language: None,
        }]);
        assert!(out.starts_with("````\n"));

        let mut code = String::new();
        let mut in_code = false;
        for event in Parser::new(&out) {
            match event {
                Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(_))) => in_code = true,
                Event::Text(t) if in_code => code.push_str(&t),
                _ => {}
            }
        }
        assert_eq!(code, format!("{content}\n"));
    }

    #[test]
    fn test_tool_call_and_result_are_labeled() {
        let out = render(&[
            RenderBlock::ToolCall {
                name: "Bash".to_string(),
                id: None,
                arguments: json!({"command": "ls"}),
                style: StyleHint::Tool,
            },
            RenderBlock::ToolResult {
                content: "a.txt".to_string(),
                is_error: false,
                tool_use_id: None,
            },
        ]);
        assert_eq!(
            out,
            "#### Tool: Bash\n\n```\ncommand: ls\n```\n\n#### Result\n\n```\na.txt\n```\n\n"
        );
    }

    #[test]
    fn test_thinking_is_collapsible() {
        let out = render(&[RenderBlock::Thinking {
            content: "pondering".to_string(),
        }]);
        assert!(out.starts_with("<details>\n<summary>Thinking</summary>"));
        assert!(out.contains("\n\npondering\n\n</details>"));
    }

    #[test]
    fn test_separator_is_rule() {
        let out = render(&[RenderBlock::text("end", StyleHint::Plain), RenderBlock::Separator]);
        assert_eq!(out, "end\n\n---\n\n");
        let rules = Parser::new(&out)
            .filter(|e| matches!(e, Event::Rule))
            .count();
        assert_eq!(rules, 1);
    }

    #[test]
    fn test_metadata_code_spans() {
        let out = render(&[RenderBlock::Metadata {
            entries: vec![("uuid".to_string(), "a1".to_string())],
        }]);
        assert_eq!(out, "`uuid: a1`\n\n");
    }

    fn h2_count(markdown: &str) -> usize {
        Parser::new(markdown)
            .filter(|e| {
                matches!(
                    e,
                    Event::Start(Tag::Heading {
                        level: HeadingLevel::H2,
                        ..
                    })
                )
            })
            .count()
    }

    fn render_lines(lines: &[&str]) -> String {
        let config = FilterConfig::default();
        let mut state = FormatterState::default();
        lines
            .iter()
            .map(|line| {
                let blocks = to_blocks(&Message::parse(line), &config);
                MarkdownFormatter.render(&blocks, &mut state)
            })
            .collect()
    }

    const FOLLOW_UP: &str = r#"{"type":"user","message":{"content":"next"}}"#;

    #[test]
    fn test_unclosed_fence_in_thinking_is_closed() {
        let out = render_lines(&[
            r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"maybe\n```rust\nfn x"}]}}"#,
            FOLLOW_UP,
            FOLLOW_UP,
        ]);
        assert_eq!(h2_count(&out), 3);
        assert!(out.contains("fn x\n```\n\n</details>"));
    }

    #[test]
    fn test_html_comment_in_text_is_escaped() {
        let out = render_lines(&[
            r#"{"type":"user","message":{"content":"add <!-- TODO at top"}}"#,
            FOLLOW_UP,
            FOLLOW_UP,
        ]);
        assert_eq!(h2_count(&out), 3);
        assert!(out.contains("add \\<!-- TODO at top"));
    }

    #[test]
    fn test_raw_html_blocks_are_escaped() {
        for text in ["<pre>", "<script src=x>", "<?php", "<![CDATA[", "<!DOCTYPE", "</details>"] {
            let mut out = String::new();
            write_prose(&mut out, text).unwrap();
            assert!(out.starts_with("\\<"), "{text} not escaped: {out}");
        }
        let mut out = String::new();
        write_prose(&mut out, "a <b>bold</b> <present>").unwrap();
        assert_eq!(out, "a <b>bold</b> <present>\n\n");
    }

    #[test]
    fn test_fenced_html_is_left_alone() {
        let mut out = String::new();
        write_prose(&mut out, "~~~\n<!-- kept -->\n~~~").unwrap();
        assert_eq!(out, "~~~\n<!-- kept -->\n~~~\n\n");
    }

    #[test]
    fn test_emphasis_skips_multiline() {
        assert_eq!(wrap_single_line("Summary: x", "*"), "*Summary: x*");
        assert_eq!(wrap_single_line("a\nb", "*"), "a\nb");
    }
}
