//! Line-to-output pipeline shared by one-shot reading and watch mode.

use crate::error::Result;
use crate::filter::{accepts, FilterConfig};
use crate::format::{Formatter, FormatterState};
use crate::render::to_blocks;
use crate::transcript::{Message, MessageBody};
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::path::Path;

/// Parse, filter, and render transcript lines one at a time.
pub struct Pipeline {
    config: FilterConfig,
    formatter: Box<dyn Formatter + Send>,
    state: FormatterState,
}

impl Pipeline {
    pub fn new(config: FilterConfig, formatter: Box<dyn Formatter + Send>) -> Self {
        let state = FormatterState::new(config.line_numbers);
        Self {
            config,
            formatter,
            state,
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Number of messages rendered so far.
    pub fn rendered(&self) -> u64 {
        self.state.rendered()
    }

    /// Render one input line. `None` when the line is blank or filtered out.
    pub fn process_line(&mut self, line_number: u64, line: &str) -> Option<String> {
        if line.trim().is_empty() {
            return None;
        }

        let message = Message::parse(line);
        if let MessageBody::Unknown { reason, .. } = &message.body {
            tracing::warn!(line = line_number, %reason, "unparsed transcript record");
        }

        if !accepts(&message, &self.config) {
            tracing::trace!(line = line_number, kind = %message.kind(), "filtered out");
            return None;
        }

        self.state.set_line(line_number);
        let blocks = to_blocks(&message, &self.config);
        Some(self.formatter.render(&blocks, &mut self.state))
    }

    /// Banner to print before output from `path`, if it differs from the
    /// previous source.
    pub fn announce_source(&mut self, path: &Path) -> Option<String> {
        self.state
            .switch_source(path)
            .then(|| self.formatter.source_banner(path))
    }
}

/// Render a whole transcript from `reader` to `writer`.
///
/// With `initial_lines` set, only that many trailing lines are processed;
/// their line numbers still count from the start of the input.
pub fn process_stream<R: BufRead, W: Write>(
    reader: R,
    pipeline: &mut Pipeline,
    writer: &mut W,
) -> Result<()> {
    let tail = pipeline.config().initial_lines;
    let lines = read_lines(reader).enumerate();

    if tail == 0 {
        for (index, line) in lines {
            emit(pipeline, writer, index as u64 + 1, &line?)?;
        }
        return Ok(());
    }

    let mut recent: VecDeque<(u64, String)> = VecDeque::with_capacity(tail);
    for (index, line) in lines {
        if recent.len() == tail {
            recent.pop_front();
        }
        recent.push_back((index as u64 + 1, line?));
    }
    for (line_number, line) in recent {
        emit(pipeline, writer, line_number, &line)?;
    }
    Ok(())
}

fn emit<W: Write>(pipeline: &mut Pipeline, writer: &mut W, line_number: u64, line: &str) -> Result<()> {
    if let Some(rendered) = pipeline.process_line(line_number, line) {
        writer.write_all(rendered.as_bytes())?;
        writer.flush()?;
    }
    Ok(())
}

/// Lines without their terminators. Invalid UTF-8 is replaced rather than
/// ending the stream.
fn read_lines<R: BufRead>(mut reader: R) -> impl Iterator<Item = io::Result<String>> {
    std::iter::from_fn(move || {
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                Some(Ok(text.trim_end_matches(['\n', '\r']).to_string()))
            }
            Err(e) => Some(Err(e)),
        }
    })
}
