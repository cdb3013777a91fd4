//! Lowering of parsed messages into render blocks.

use super::block::{RenderBlock, StyleHint};
use crate::filter::FilterConfig;
use crate::transcript::{
    Message, MessageBody, ResultPayload, Segment, ToolInvocation, ToolOutcome,
};
use serde_json::{json, Value};

const COMMAND_NAME_OPEN: &str = "<command-name>";
const COMMAND_NAME_CLOSE: &str = "</command-name>";
const COMMAND_ARGS_OPEN: &str = "<command-args>";
const COMMAND_ARGS_CLOSE: &str = "</command-args>";
const COMMAND_STDOUT_OPEN: &str = "<local-command-stdout>";
const COMMAND_STDOUT_CLOSE: &str = "</local-command-stdout>";

/// Turn a message into its ordered block sequence.
///
/// The result always ends with [`RenderBlock::Separator`], so even an empty
/// message leaves a visible boundary. With `show_metadata` the first block is
/// a [`RenderBlock::Metadata`] carrying the identifier and timestamp.
pub fn to_blocks(message: &Message, config: &FilterConfig) -> Vec<RenderBlock> {
    let mut blocks = Vec::new();

    if config.show_metadata {
        blocks.push(metadata_block(message));
    }

    match &message.body {
        MessageBody::User { content } => {
            blocks.push(RenderBlock::header("USER", StyleHint::User));
            for segment in content {
                push_user_segment(&mut blocks, segment, config);
            }
        }
        MessageBody::SubagentResult {
            agent_id,
            content,
            total_tokens,
        } => {
            blocks.push(RenderBlock::header(
                format!("SUB-AGENT ({agent_id})"),
                StyleHint::Assistant,
            ));
            for text in content {
                blocks.extend(split_fenced(text));
            }
            if *total_tokens > 0 {
                blocks.push(RenderBlock::text(
                    format!("Total tokens: {total_tokens}"),
                    StyleHint::Dim,
                ));
            }
        }
        MessageBody::Assistant { content, .. } => {
            let label = if message.meta.is_sidechain {
                "ASSISTANT (Task Agent)"
            } else {
                "ASSISTANT"
            };
            blocks.push(RenderBlock::header(label, StyleHint::Assistant));
            for segment in content {
                push_segment(&mut blocks, segment, config);
            }
        }
        MessageBody::ToolUse(call) => {
            blocks.push(RenderBlock::header("TOOL USE", StyleHint::Tool));
            blocks.push(tool_call_block(call));
        }
        MessageBody::ToolResult(outcomes) => {
            blocks.push(RenderBlock::header("TOOL RESULT", StyleHint::Tool));
            for outcome in outcomes {
                push_outcome(&mut blocks, outcome, config);
            }
        }
        MessageBody::Thinking { text } => {
            if !config.hide_thinking {
                blocks.push(RenderBlock::header("THINKING", StyleHint::Dim));
                blocks.push(RenderBlock::Thinking {
                    content: text.clone(),
                });
            }
        }
        MessageBody::System {
            subtype,
            content,
            model,
            version,
            cwd,
            pre_tokens,
        } => {
            let label = match subtype {
                Some(s) => format!("System ({s})"),
                None => "System".to_string(),
            };
            let detail = match subtype.as_deref() {
                Some("init") => [("model", model), ("version", version), ("cwd", cwd)]
                    .into_iter()
                    .filter_map(|(k, v)| v.as_ref().map(|v| format!("{k}={v}")))
                    .collect::<Vec<_>>()
                    .join(", "),
                Some("compact_boundary") => format!(
                    "{} ({} tokens before compaction)",
                    content.as_deref().unwrap_or("Conversation compacted"),
                    pre_tokens.unwrap_or(0)
                ),
                _ => content.clone().unwrap_or_default(),
            };
            blocks.push(RenderBlock::text(
                labeled(&label, &detail),
                StyleHint::System,
            ));
        }
        MessageBody::Summary { summary } => {
            blocks.push(RenderBlock::text(
                labeled("Summary", summary),
                StyleHint::Info,
            ));
        }
        MessageBody::FileHistorySnapshot { snapshot_timestamp } => {
            blocks.push(RenderBlock::text(
                format!(
                    "File history snapshot ({})",
                    snapshot_timestamp.as_deref().unwrap_or("unknown")
                ),
                StyleHint::Dim,
            ));
        }
        MessageBody::QueueOperation { operation, content } => {
            let label = format!("Queue: {}", operation.as_deref().unwrap_or("unknown"));
            blocks.push(RenderBlock::text(
                match content {
                    Some(c) if !c.is_empty() => format!("{label}\n{c}"),
                    _ => label,
                },
                StyleHint::System,
            ));
        }
        MessageBody::SessionResult {
            subtype,
            num_turns,
            duration_ms,
            total_cost_usd,
            usage,
        } => {
            let mut parts = vec![format!("turns={}", num_turns.unwrap_or(0))];
            parts.push(format!(
                "duration={}s",
                duration_ms.unwrap_or(0).saturating_add(500) / 1000
            ));
            parts.push(format!("cost=${:.4}", total_cost_usd.unwrap_or(0.0)));
            if let Some(usage) = usage {
                parts.push(format!("tokens {usage}"));
            }
            let label = match subtype {
                Some(s) => format!("Session complete ({s})"),
                None => "Session complete".to_string(),
            };
            blocks.push(RenderBlock::text(
                labeled(&label, &parts.join(", ")),
                StyleHint::Info,
            ));
        }
        MessageBody::Progress { progress_type } => {
            blocks.push(RenderBlock::text(
                labeled("Progress", progress_type.as_deref().unwrap_or("unknown")),
                StyleHint::Dim,
            ));
        }
        MessageBody::Unknown { raw, .. } => {
            blocks.push(RenderBlock::text(raw.clone(), StyleHint::Raw));
        }
    }

    blocks.push(RenderBlock::Separator);
    blocks
}

fn labeled(label: &str, detail: &str) -> String {
    if detail.is_empty() {
        label.to_string()
    } else {
        format!("{label}: {detail}")
    }
}

fn metadata_block(message: &Message) -> RenderBlock {
    let meta = &message.meta;
    let mut entries = vec![(
        "uuid".to_string(),
        meta.uuid.clone().unwrap_or_else(|| "-".to_string()),
    )];
    if let Some(parent) = &meta.parent_uuid {
        entries.push(("parent".to_string(), parent.clone()));
    }
    if let Some(session) = &meta.session_id {
        entries.push(("session".to_string(), session.clone()));
    }
    entries.push((
        "timestamp".to_string(),
        meta.timestamp
            .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
            .unwrap_or_else(|| "-".to_string()),
    ));
    if let MessageBody::Assistant { model, usage, .. } = &message.body {
        if let Some(model) = model {
            entries.push(("model".to_string(), model.clone()));
        }
        if let Some(usage) = usage {
            entries.push(("tokens".to_string(), usage.to_string()));
        }
    }
    RenderBlock::Metadata { entries }
}

/// User text may wrap slash commands and their output in pseudo-tags.
fn push_user_segment(blocks: &mut Vec<RenderBlock>, segment: &Segment, config: &FilterConfig) {
    if let Segment::Text(text) = segment {
        if text.starts_with(COMMAND_NAME_OPEN) {
            let name = between(text, COMMAND_NAME_OPEN, COMMAND_NAME_CLOSE).unwrap_or_default();
            let arguments = match between(text, COMMAND_ARGS_OPEN, COMMAND_ARGS_CLOSE) {
                Some(args) if !args.is_empty() => json!({ "args": args }),
                _ => Value::Null,
            };
            blocks.push(RenderBlock::ToolCall {
                name: format!("Command: {name}"),
                id: None,
                arguments,
                style: StyleHint::User,
            });
            return;
        }
        if text.starts_with(COMMAND_STDOUT_OPEN) {
            let stdout = text
                .replace(COMMAND_STDOUT_OPEN, "")
                .replace(COMMAND_STDOUT_CLOSE, "");
            push_outcome(
                blocks,
                &ToolOutcome {
                    tool_use_id: None,
                    tool_name: None,
                    payload: ResultPayload::Text(stdout),
                    is_error: false,
                },
                config,
            );
            return;
        }
    }
    push_segment(blocks, segment, config);
}

fn push_segment(blocks: &mut Vec<RenderBlock>, segment: &Segment, config: &FilterConfig) {
    match segment {
        Segment::Text(text) => blocks.extend(split_fenced(text)),
        Segment::ToolCall(call) => blocks.push(tool_call_block(call)),
        Segment::Thinking(text) => {
            if !config.hide_thinking {
                blocks.push(RenderBlock::Thinking {
                    content: text.clone(),
                });
            }
        }
        Segment::ToolResult(outcome) => push_outcome(blocks, outcome, config),
        Segment::Image { media_type } => {
            blocks.push(RenderBlock::text(
                format!("[Image: {media_type}]"),
                StyleHint::Dim,
            ));
        }
    }
}

fn tool_call_block(call: &ToolInvocation) -> RenderBlock {
    RenderBlock::ToolCall {
        name: call.name.clone(),
        id: call.id.clone(),
        arguments: call.input.clone(),
        style: StyleHint::Tool,
    }
}

fn push_outcome(blocks: &mut Vec<RenderBlock>, outcome: &ToolOutcome, config: &FilterConfig) {
    if config.hide_tool_results {
        blocks.push(RenderBlock::Metadata {
            entries: vec![(
                "result".to_string(),
                format!(
                    "suppressed ({})",
                    outcome.tool_use_id.as_deref().unwrap_or("unknown")
                ),
            )],
        });
        return;
    }
    blocks.push(RenderBlock::ToolResult {
        content: outcome.payload.to_text(),
        is_error: outcome.is_error,
        tool_use_id: outcome.tool_use_id.clone(),
    });
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let end = text[start..].find(close)? + start;
    Some(&text[start..end])
}

/// Split markdown-style text into prose and fenced code blocks.
///
/// Text without fences comes back as a single block, unchanged. An unclosed
/// fence runs to the end of the text.
fn split_fenced(text: &str) -> Vec<RenderBlock> {
    if !text.contains("```") {
        return vec![RenderBlock::text(text, StyleHint::Plain)];
    }

    let mut blocks = Vec::new();
    let mut prose: Vec<&str> = Vec::new();
    let mut code: Vec<&str> = Vec::new();
    // (fence length, language) of the open fence
    let mut fence: Option<(usize, Option<String>)> = None;

    for line in text.split('\n') {
        let trimmed = line.trim_start();
        let ticks = trimmed.chars().take_while(|&c| c == '`').count();

        match &fence {
            None if ticks >= 3 => {
                flush_prose(&mut blocks, &mut prose);
                let language = trimmed[ticks..].trim();
                fence = Some((
                    ticks,
                    (!language.is_empty()).then(|| language.to_string()),
                ));
            }
            None => prose.push(line),
            Some((open_ticks, language)) => {
                if ticks >= *open_ticks && trimmed[ticks..].trim().is_empty() {
                    blocks.push(RenderBlock::Code {
                        content: code.join("\n"),
                        language: language.clone(),
                    });
                    code.clear();
                    fence = None;
                } else {
                    code.push(line);
                }
            }
        }
    }

    if let Some((_, language)) = fence {
        blocks.push(RenderBlock::Code {
            content: code.join("\n"),
            language,
        });
    }
    flush_prose(&mut blocks, &mut prose);
    blocks
}

fn flush_prose(blocks: &mut Vec<RenderBlock>, prose: &mut Vec<&str>) {
    let joined = prose.join("\n");
    prose.clear();
    let trimmed = joined.trim_matches('\n');
    if !trimmed.trim().is_empty() {
        blocks.push(RenderBlock::text(trimmed, StyleHint::Plain));
    }
}
