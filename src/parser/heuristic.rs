//! Pattern-matching classifier for plain terminal output.

use crate::models::output::{OutputKind, ParsedOutput};
use crate::parser::{strip_ansi, OutputParser};

/// Phrases that mark a finished task.
const COMPLETION_MARKERS: &[&str] = &[
    "task completed",
    "task complete",
    "all tasks completed",
    "finished successfully",
];

/// Prefixes that introduce an error message.
const ERROR_MARKERS: &[&str] = &["error:", "fatal:", "failed:"];

/// Phrases that ask the operator for input.
const INPUT_PHRASES: &[&str] = &[
    "(y/n)",
    "[y/n]",
    "press enter",
    "please enter",
    "please provide",
    "please confirm",
    "waiting for input",
    "would you like",
];

/// Upper bound on accumulated text kept between classifications.
const MAX_BUFFER_BYTES: usize = 64 * 1024;

/// Accumulates chunks and classifies the buffer by substring match.
///
/// Checks run in order: completion, error, prompt. A match drains the
/// buffer; anything else is reported as the raw chunk and kept for the next
/// call, so markers split across chunks are still found.
#[derive(Debug, Default)]
pub struct HeuristicParser {
    buffer: String,
}

impl HeuristicParser {
    /// Create a parser with an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Text accumulated since the last classification.
    #[must_use]
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    fn take_buffer(&mut self) -> String {
        std::mem::take(&mut self.buffer).trim().to_owned()
    }

    fn trim_buffer(&mut self) {
        if self.buffer.len() <= MAX_BUFFER_BYTES {
            return;
        }
        let mut cut = self.buffer.len() - MAX_BUFFER_BYTES;
        while !self.buffer.is_char_boundary(cut) {
            cut += 1;
        }
        self.buffer.drain(..cut);
    }
}

impl OutputParser for HeuristicParser {
    fn parse(&mut self, chunk: &str) -> ParsedOutput {
        let clean = strip_ansi(chunk);
        self.buffer.push_str(&clean);
        self.trim_buffer();

        // ASCII lowering keeps byte offsets aligned with `buffer`.
        let lower = self.buffer.to_ascii_lowercase();

        if COMPLETION_MARKERS.iter().any(|m| lower.contains(m)) {
            return ParsedOutput::completed(self.take_buffer());
        }

        if let Some(message) = extract_error(&self.buffer, &lower) {
            self.buffer.clear();
            return ParsedOutput::new(OutputKind::Error, message);
        }

        if is_prompt(&self.buffer, &lower) {
            return ParsedOutput::new(OutputKind::Prompt, self.take_buffer());
        }

        ParsedOutput::raw(clean)
    }
}

/// Text following the earliest error marker that has a message on its line.
///
/// Markers with nothing after them (`3 tests failed:` ending a line) are
/// skipped rather than hiding later ones.
fn extract_error(buffer: &str, lower: &str) -> Option<String> {
    let mut hits: Vec<(usize, &str)> = ERROR_MARKERS
        .iter()
        .flat_map(|marker| lower.match_indices(*marker))
        .collect();
    hits.sort_unstable_by_key(|(idx, _)| *idx);

    hits.into_iter().find_map(|(start, marker)| {
        let rest = &buffer[start + marker.len()..];
        let line = rest.split(['\r', '\n']).next().unwrap_or_default().trim();
        (!line.is_empty()).then(|| line.to_owned())
    })
}

fn is_prompt(buffer: &str, lower: &str) -> bool {
    buffer.trim_end().ends_with('?') || INPUT_PHRASES.iter().any(|p| lower.contains(p))
}
