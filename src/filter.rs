//! Message filtering and display toggles.

use crate::error::{Error, Result};
use crate::transcript::{Message, MessageKind};
use regex::Regex;
use std::collections::BTreeSet;

/// Immutable filtering and display configuration for one run.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    /// Message kinds to show (empty = all)
    pub types: BTreeSet<MessageKind>,
    /// Record subtypes, or assistant content types, to show (empty = all)
    pub subtypes: BTreeSet<String>,
    /// Tool names to show (empty = all)
    pub tools: BTreeSet<String>,
    pub include: Option<Regex>,
    pub exclude: Option<Regex>,
    pub hide_thinking: bool,
    pub hide_tool_results: bool,
    pub show_metadata: bool,
    pub line_numbers: bool,
    /// Trailing lines shown before following a file
    pub initial_lines: usize,
}

impl FilterConfig {
    pub fn builder() -> FilterBuilder {
        FilterBuilder::default()
    }
}

/// Collects raw options and compiles them into a [`FilterConfig`].
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    types: BTreeSet<MessageKind>,
    subtypes: BTreeSet<String>,
    tools: BTreeSet<String>,
    include: Vec<String>,
    exclude: Vec<String>,
    hide_thinking: bool,
    hide_tool_results: bool,
    show_metadata: bool,
    line_numbers: bool,
    initial_lines: usize,
}

impl FilterBuilder {
    pub fn types(mut self, types: impl IntoIterator<Item = MessageKind>) -> Self {
        self.types.extend(types);
        self
    }

    pub fn subtypes(mut self, subtypes: impl IntoIterator<Item = String>) -> Self {
        self.subtypes.extend(subtypes);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = String>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Add include patterns; a message must match at least one.
    pub fn include(mut self, patterns: impl IntoIterator<Item = String>) -> Self {
        self.include.extend(patterns);
        self
    }

    /// Add exclude patterns; a message matching any of them is dropped.
    pub fn exclude(mut self, patterns: impl IntoIterator<Item = String>) -> Self {
        self.exclude.extend(patterns);
        self
    }

    pub fn hide_thinking(mut self, hide: bool) -> Self {
        self.hide_thinking = hide;
        self
    }

    pub fn hide_tool_results(mut self, hide: bool) -> Self {
        self.hide_tool_results = hide;
        self
    }

    pub fn show_metadata(mut self, show: bool) -> Self {
        self.show_metadata = show;
        self
    }

    pub fn line_numbers(mut self, enabled: bool) -> Self {
        self.line_numbers = enabled;
        self
    }

    pub fn initial_lines(mut self, lines: usize) -> Self {
        self.initial_lines = lines;
        self
    }

    /// Compile the patterns. An invalid pattern is an error rather than being
    /// ignored.
    pub fn build(self) -> Result<FilterConfig> {
        Ok(FilterConfig {
            types: self.types,
            subtypes: self.subtypes,
            tools: self.tools,
            include: compile("include", &self.include)?,
            exclude: compile("exclude", &self.exclude)?,
            hide_thinking: self.hide_thinking,
            hide_tool_results: self.hide_tool_results,
            show_metadata: self.show_metadata,
            line_numbers: self.line_numbers,
            initial_lines: self.initial_lines,
        })
    }
}

/// Join several patterns into one alternation, validating each on its own so
/// the error names the offending pattern.
fn compile(which: &'static str, patterns: &[String]) -> Result<Option<Regex>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    for pattern in patterns {
        Regex::new(pattern).map_err(|source| Error::InvalidPattern {
            which,
            pattern: pattern.clone(),
            source,
        })?;
    }

    let joined = patterns
        .iter()
        .map(|p| format!("(?:{p})"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&joined)
        .map(Some)
        .map_err(|source| Error::InvalidPattern {
            which,
            pattern: joined.clone(),
            source,
        })
}

/// Decide whether a message is emitted. Checks run in order and stop at the
/// first rejection: type, subtype, tool, exclude pattern, include pattern.
pub fn accepts(message: &Message, config: &FilterConfig) -> bool {
    if !config.types.is_empty() && !config.types.contains(&message.kind()) {
        return false;
    }

    if !config.subtypes.is_empty() && !subtype_matches(message, &config.subtypes) {
        return false;
    }

    if !config.tools.is_empty()
        && !message
            .tool_names()
            .iter()
            .any(|name| config.tools.contains(*name))
    {
        return false;
    }

    if config.include.is_none() && config.exclude.is_none() {
        return true;
    }

    let text = message.flattened_text();

    if let Some(exclude) = &config.exclude {
        if exclude.is_match(&text) {
            return false;
        }
    }

    if let Some(include) = &config.include {
        if !include.is_match(&text) {
            return false;
        }
    }

    true
}

/// Assistant messages match on their content types; everything else on its
/// record subtype, when it has one.
fn subtype_matches(message: &Message, subtypes: &BTreeSet<String>) -> bool {
    if message.kind() == MessageKind::Assistant {
        return message
            .segments()
            .iter()
            .any(|segment| subtypes.contains(segment.tag()));
    }
    match message.subtype() {
        Some(subtype) => subtypes.contains(subtype),
        None => true,
    }
}
