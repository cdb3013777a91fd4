//! Typed model for Claude Code JSONL records.
//!
//! Every line of a transcript maps to exactly one [`Message`]. Records that
//! cannot be understood become [`MessageBody::Unknown`] and keep the raw line,
//! so malformed input stays visible downstream.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;

/// Role tag of a message, as used by the type allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageKind {
    User,
    Assistant,
    ToolUse,
    ToolResult,
    Thinking,
    System,
    Summary,
    FileHistorySnapshot,
    QueueOperation,
    SessionResult,
    Progress,
    Unknown,
}

impl MessageKind {
    pub const ALL: [MessageKind; 12] = [
        MessageKind::User,
        MessageKind::Assistant,
        MessageKind::ToolUse,
        MessageKind::ToolResult,
        MessageKind::Thinking,
        MessageKind::System,
        MessageKind::Summary,
        MessageKind::FileHistorySnapshot,
        MessageKind::QueueOperation,
        MessageKind::SessionResult,
        MessageKind::Progress,
        MessageKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::Assistant => "assistant",
            MessageKind::ToolUse => "tool_use",
            MessageKind::ToolResult => "tool_result",
            MessageKind::Thinking => "thinking",
            MessageKind::System => "system",
            MessageKind::Summary => "summary",
            MessageKind::FileHistorySnapshot => "file-history-snapshot",
            MessageKind::QueueOperation => "queue-operation",
            MessageKind::SessionResult => "result",
            MessageKind::Progress => "progress",
            MessageKind::Unknown => "unknown",
        }
    }

    /// Look up a kind by its tag. Case-sensitive.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == tag)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageMeta {
    pub uuid: Option<String>,
    /// Causally preceding message. Display only.
    pub parent_uuid: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    /// Task sub-agent traffic
    pub is_sidechain: bool,
}

impl MessageMeta {
    fn from_object(obj: &Map<String, Value>) -> Self {
        Self {
            uuid: str_field(obj, "uuid"),
            parent_uuid: str_field(obj, "parentUuid"),
            timestamp: obj
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc)),
            session_id: str_field(obj, "sessionId"),
            is_sidechain: obj
                .get("isSidechain")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }
}

/// A tool invocation, either nested in assistant content or a top-level record.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: Option<String>,
    pub name: String,
    pub input: Value,
}

impl ToolInvocation {
    fn from_object(obj: &Map<String, Value>) -> Self {
        Self {
            id: str_field(obj, "id"),
            name: str_field(obj, "name").unwrap_or_default(),
            input: obj
                .get("input")
                .filter(|v| v.is_object())
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new())),
        }
    }
}

/// Payload of a tool result.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPayload {
    Text(String),
    Structured(Value),
}

impl ResultPayload {
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => ResultPayload::Text(String::new()),
            Some(Value::String(s)) => ResultPayload::Text(s.clone()),
            Some(Value::Array(items)) if items.iter().all(is_text_or_image_item) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|item| match item.get("type").and_then(Value::as_str) {
                        Some("image") => format!("[Image: {}]", image_media_type(item)),
                        _ => item
                            .get("text")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                    .collect();
                ResultPayload::Text(parts.join("\n"))
            }
            Some(other) => ResultPayload::Structured(other.clone()),
        }
    }

    /// Text form of the payload; structured payloads are pretty-printed JSON.
    pub fn to_text(&self) -> String {
        match self {
            ResultPayload::Text(s) => s.clone(),
            ResultPayload::Structured(v) => {
                serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ResultPayload::Text(s) => s.is_empty(),
            ResultPayload::Structured(v) => v.is_null(),
        }
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub tool_use_id: Option<String>,
    /// Only present when the record names the tool; nested results carry ids.
    pub tool_name: Option<String>,
    pub payload: ResultPayload,
    pub is_error: bool,
}

impl ToolOutcome {
    fn from_object(obj: &Map<String, Value>) -> Self {
        Self {
            tool_use_id: str_field(obj, "tool_use_id"),
            tool_name: str_field(obj, "name").or_else(|| str_field(obj, "tool_name")),
            payload: ResultPayload::from_value(obj.get("content")),
            is_error: obj.get("is_error").and_then(Value::as_bool).unwrap_or(false),
        }
    }
}

/// One item of user or assistant content.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    ToolCall(ToolInvocation),
    Thinking(String),
    ToolResult(ToolOutcome),
    Image { media_type: String },
}

impl Segment {
    /// The `type` tag this segment was read from.
    pub fn tag(&self) -> &'static str {
        match self {
            Segment::Text(_) => "text",
            Segment::ToolCall(_) => "tool_use",
            Segment::Thinking(_) => "thinking",
            Segment::ToolResult(_) => "tool_result",
            Segment::Image { .. } => "image",
        }
    }

    fn from_value(item: &Value) -> Option<Self> {
        let obj = item.as_object()?;
        let segment = match obj.get("type").and_then(Value::as_str)? {
            "text" => Segment::Text(str_field(obj, "text").unwrap_or_default()),
            "thinking" => Segment::Thinking(str_field(obj, "thinking").unwrap_or_default()),
            "tool_use" => Segment::ToolCall(ToolInvocation::from_object(obj)),
            "tool_result" => Segment::ToolResult(ToolOutcome::from_object(obj)),
            "image" => Segment::Image {
                media_type: image_media_type(item),
            },
            _ => return None,
        };
        Some(segment)
    }
}

/// Token usage reported on assistant and result records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_input_tokens: u64,
}

impl Usage {
    fn from_value(value: Option<&Value>) -> Option<Self> {
        let obj = value?.as_object()?;
        Some(Self {
            input_tokens: u64_field(obj, "input_tokens").unwrap_or(0),
            output_tokens: u64_field(obj, "output_tokens").unwrap_or(0),
            cache_read_input_tokens: u64_field(obj, "cache_read_input_tokens").unwrap_or(0),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in={} out={} cache={}",
            self.input_tokens, self.output_tokens, self.cache_read_input_tokens
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    User {
        content: Vec<Segment>,
    },
    /// A user record carrying a sub-agent's final report in `toolUseResult`.
    SubagentResult {
        agent_id: String,
        content: Vec<String>,
        total_tokens: u64,
    },
    Assistant {
        content: Vec<Segment>,
        model: Option<String>,
        usage: Option<Usage>,
    },
    ToolUse(ToolInvocation),
    ToolResult(Vec<ToolOutcome>),
    Thinking {
        text: String,
    },
    System {
        subtype: Option<String>,
        content: Option<String>,
        model: Option<String>,
        version: Option<String>,
        cwd: Option<String>,
        pre_tokens: Option<u64>,
    },
    Summary {
        summary: String,
    },
    FileHistorySnapshot {
        snapshot_timestamp: Option<String>,
    },
    QueueOperation {
        operation: Option<String>,
        content: Option<String>,
    },
    SessionResult {
        subtype: Option<String>,
        num_turns: Option<u64>,
        duration_ms: Option<u64>,
        total_cost_usd: Option<f64>,
        usage: Option<Usage>,
    },
    Progress {
        progress_type: Option<String>,
    },
    /// Anything that could not be understood, kept verbatim.
    Unknown {
        raw: String,
        reason: String,
    },
}

/// One parsed transcript line.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub meta: MessageMeta,
    pub body: MessageBody,
}

impl Message {
    /// Parse one JSONL line. Never fails: anything unparseable becomes
    /// [`MessageBody::Unknown`] carrying the raw text and a diagnosis.
    pub fn parse(line: &str) -> Message {
        if line.trim().is_empty() {
            return Message::unknown(MessageMeta::default(), line, "empty line");
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                return Message::unknown(
                    MessageMeta::default(),
                    line,
                    format!("invalid JSON: {e}"),
                )
            }
        };

        let Some(obj) = value.as_object() else {
            return Message::unknown(MessageMeta::default(), line, "record is not a JSON object");
        };

        let meta = MessageMeta::from_object(obj);

        let Some(tag) = obj.get("type").and_then(Value::as_str) else {
            return Message::unknown(meta, line, "missing record type");
        };

        let body = match tag {
            "user" => parse_user(obj),
            "assistant" => parse_assistant(obj),
            "tool_use" => MessageBody::ToolUse(ToolInvocation::from_object(obj)),
            "tool_result" => MessageBody::ToolResult(vec![ToolOutcome::from_object(obj)]),
            "thinking" => MessageBody::Thinking {
                text: str_field(obj, "thinking")
                    .or_else(|| str_field(obj, "text"))
                    .unwrap_or_default(),
            },
            "system" => MessageBody::System {
                subtype: str_field(obj, "subtype"),
                content: str_field(obj, "content"),
                model: str_field(obj, "model"),
                version: str_field(obj, "claude_code_version"),
                cwd: str_field(obj, "cwd"),
                pre_tokens: obj
                    .get("compactMetadata")
                    .and_then(Value::as_object)
                    .and_then(|m| u64_field(m, "preTokens")),
            },
            "summary" => MessageBody::Summary {
                summary: str_field(obj, "summary").unwrap_or_default(),
            },
            "file-history-snapshot" => MessageBody::FileHistorySnapshot {
                snapshot_timestamp: obj
                    .get("snapshot")
                    .and_then(|s| s.get("timestamp"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            "queue-operation" => MessageBody::QueueOperation {
                operation: str_field(obj, "operation"),
                content: str_field(obj, "content"),
            },
            "result" => MessageBody::SessionResult {
                subtype: str_field(obj, "subtype"),
                num_turns: u64_field(obj, "num_turns"),
                duration_ms: u64_field(obj, "duration_ms"),
                total_cost_usd: obj.get("total_cost_usd").and_then(Value::as_f64),
                usage: Usage::from_value(obj.get("usage")),
            },
            "progress" => MessageBody::Progress {
                progress_type: obj
                    .get("data")
                    .and_then(|d| d.get("type"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            other => {
                return Message::unknown(meta, line, format!("unrecognized record type \"{other}\""))
            }
        };

        Message { meta, body }
    }

    fn unknown(meta: MessageMeta, raw: &str, reason: impl Into<String>) -> Message {
        Message {
            meta,
            body: MessageBody::Unknown {
                raw: raw.to_string(),
                reason: reason.into(),
            },
        }
    }

    pub fn kind(&self) -> MessageKind {
        match &self.body {
            MessageBody::User { .. } | MessageBody::SubagentResult { .. } => MessageKind::User,
            MessageBody::Assistant { .. } => MessageKind::Assistant,
            MessageBody::ToolUse(_) => MessageKind::ToolUse,
            MessageBody::ToolResult(_) => MessageKind::ToolResult,
            MessageBody::Thinking { .. } => MessageKind::Thinking,
            MessageBody::System { .. } => MessageKind::System,
            MessageBody::Summary { .. } => MessageKind::Summary,
            MessageBody::FileHistorySnapshot { .. } => MessageKind::FileHistorySnapshot,
            MessageBody::QueueOperation { .. } => MessageKind::QueueOperation,
            MessageBody::SessionResult { .. } => MessageKind::SessionResult,
            MessageBody::Progress { .. } => MessageKind::Progress,
            MessageBody::Unknown { .. } => MessageKind::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.body, MessageBody::Unknown { .. })
    }

    /// Record subtype, for kinds that carry one.
    pub fn subtype(&self) -> Option<&str> {
        match &self.body {
            MessageBody::System { subtype, .. } | MessageBody::SessionResult { subtype, .. } => {
                subtype.as_deref()
            }
            MessageBody::Progress { progress_type } => progress_type.as_deref(),
            _ => None,
        }
    }

    /// Content segments of user and assistant messages; empty otherwise.
    pub fn segments(&self) -> &[Segment] {
        match &self.body {
            MessageBody::User { content } | MessageBody::Assistant { content, .. } => content,
            _ => &[],
        }
    }

    /// Names of every tool invoked or answered in this message.
    pub fn tool_names(&self) -> Vec<&str> {
        match &self.body {
            MessageBody::ToolUse(call) => vec![call.name.as_str()],
            MessageBody::ToolResult(outcomes) => outcomes
                .iter()
                .filter_map(|o| o.tool_name.as_deref())
                .collect(),
            _ => self
                .segments()
                .iter()
                .filter_map(|s| match s {
                    Segment::ToolCall(call) => Some(call.name.as_str()),
                    Segment::ToolResult(outcome) => outcome.tool_name.as_deref(),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Concatenation of all text-bearing content, one part per line.
    pub fn flattened_text(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        match &self.body {
            MessageBody::User { content } | MessageBody::Assistant { content, .. } => {
                for segment in content {
                    match segment {
                        Segment::Text(t) | Segment::Thinking(t) => parts.push(t.clone()),
                        Segment::ToolCall(call) => push_invocation(&mut parts, call),
                        Segment::ToolResult(outcome) => parts.push(outcome.payload.to_text()),
                        Segment::Image { media_type } => parts.push(format!("[Image: {media_type}]")),
                    }
                }
            }
            MessageBody::SubagentResult {
                agent_id, content, ..
            } => {
                parts.push(agent_id.clone());
                parts.extend(content.iter().cloned());
            }
            MessageBody::ToolUse(call) => push_invocation(&mut parts, call),
            MessageBody::ToolResult(outcomes) => {
                parts.extend(outcomes.iter().map(|o| o.payload.to_text()));
            }
            MessageBody::Thinking { text } => parts.push(text.clone()),
            MessageBody::System {
                subtype, content, ..
            } => {
                parts.extend(subtype.iter().cloned());
                parts.extend(content.iter().cloned());
            }
            MessageBody::Summary { summary } => parts.push(summary.clone()),
            MessageBody::FileHistorySnapshot { snapshot_timestamp } => {
                parts.extend(snapshot_timestamp.iter().cloned());
            }
            MessageBody::QueueOperation { operation, content } => {
                parts.extend(operation.iter().cloned());
                parts.extend(content.iter().cloned());
            }
            MessageBody::SessionResult { subtype, .. } => parts.extend(subtype.iter().cloned()),
            MessageBody::Progress { progress_type } => parts.extend(progress_type.iter().cloned()),
            MessageBody::Unknown { raw, .. } => parts.push(raw.clone()),
        }
        parts.join("\n")
    }
}

fn push_invocation(parts: &mut Vec<String>, call: &ToolInvocation) {
    parts.push(call.name.clone());
    parts.push(call.input.to_string());
}

fn parse_user(obj: &Map<String, Value>) -> MessageBody {
    if let Some(body) = subagent_result(obj) {
        return body;
    }

    let content = message_content(obj);

    let only_results = !content.is_empty()
        && content.iter().all(|s| matches!(s, Segment::ToolResult(_)));
    if only_results {
        let outcomes = content
            .into_iter()
            .filter_map(|s| match s {
                Segment::ToolResult(outcome) => Some(outcome),
                _ => None,
            })
            .collect();
        return MessageBody::ToolResult(outcomes);
    }

    MessageBody::User { content }
}

/// `toolUseResult` objects with an `agentId` are reports from a sub-agent.
fn subagent_result(obj: &Map<String, Value>) -> Option<MessageBody> {
    let result = obj.get("toolUseResult").and_then(Value::as_object)?;
    let agent_id = match result.get("agentId")? {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let content = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(MessageBody::SubagentResult {
        agent_id,
        content,
        total_tokens: u64_field(result, "totalTokens").unwrap_or(0),
    })
}

fn parse_assistant(obj: &Map<String, Value>) -> MessageBody {
    let message = obj.get("message").and_then(Value::as_object);
    MessageBody::Assistant {
        content: message_content(obj),
        model: message.and_then(|m| str_field(m, "model")),
        usage: message
            .and_then(|m| Usage::from_value(m.get("usage")))
            .filter(|u| !u.is_empty()),
    }
}

/// `message.content` as segments. A bare string becomes one text segment.
fn message_content(obj: &Map<String, Value>) -> Vec<Segment> {
    match obj.get("message").and_then(|m| m.get("content")) {
        Some(Value::String(s)) => vec![Segment::Text(s.clone())],
        Some(Value::Array(items)) => items.iter().filter_map(Segment::from_value).collect(),
        _ => Vec::new(),
    }
}

fn is_text_or_image_item(item: &Value) -> bool {
    matches!(
        item.get("type").and_then(Value::as_str),
        Some("text") | Some("image")
    )
}

fn image_media_type(item: &Value) -> String {
    item.get("source")
        .and_then(|s| s.get("media_type"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn u64_field(obj: &Map<String, Value>, key: &str) -> Option<u64> {
    obj.get(key).and_then(Value::as_u64)
}
