//! Formatter-agnostic render primitives.

use serde_json::Value;

/// Abstract style token. Each formatter decides what it looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StyleHint {
    #[default]
    Plain,
    Emphasis,
    Dim,
    Error,
    Success,
    Info,
    User,
    Assistant,
    System,
    Tool,
    /// Raw input that could not be parsed
    Raw,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderBlock {
    /// Role label opening a message
    Header { label: String, style: StyleHint },
    Text { content: String, style: StyleHint },
    Code {
        content: String,
        language: Option<String>,
    },
    ToolCall {
        name: String,
        id: Option<String>,
        arguments: Value,
        style: StyleHint,
    },
    ToolResult {
        content: String,
        is_error: bool,
        tool_use_id: Option<String>,
    },
    Thinking { content: String },
    Metadata { entries: Vec<(String, String)> },
    Separator,
}

impl RenderBlock {
    pub fn text(content: impl Into<String>, style: StyleHint) -> Self {
        RenderBlock::Text {
            content: content.into(),
            style,
        }
    }

    pub fn header(label: impl Into<String>, style: StyleHint) -> Self {
        RenderBlock::Header {
            label: label.into(),
            style,
        }
    }
}

/// Tool arguments as display pairs. String values are shown as-is, everything
/// else as compact JSON. A non-object value becomes a single `input` pair.
pub fn argument_pairs(arguments: &Value) -> Vec<(String, String)> {
    match arguments {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| (key.clone(), display_value(value)))
            .collect(),
        Value::Null => Vec::new(),
        other => vec![("input".to_string(), display_value(other))],
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_argument_pairs_keep_strings_raw() {
        let pairs = argument_pairs(&json!({"command": "ls -la", "timeout": 5}));
        assert_eq!(
            pairs,
            vec![
                ("command".to_string(), "ls -la".to_string()),
                ("timeout".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn test_argument_pairs_non_object() {
        assert!(argument_pairs(&Value::Null).is_empty());
        assert_eq!(
            argument_pairs(&json!([1, 2])),
            vec![("input".to_string(), "[1,2]".to_string())]
        );
    }
}
