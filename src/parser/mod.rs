//! Output classification strategies.
//!
//! Each session owns one [`OutputParser`] instance, built from the
//! [`ParserKind`] selected at runtime construction (or from an injected
//! [`ParserFactory`] in tests). Parsers never fail: anything they cannot
//! classify comes back as [`OutputKind::Raw`](crate::models::output::OutputKind::Raw).

pub mod heuristic;
pub mod structured;

use std::sync::Arc;

use crate::config::ParserKind;
use crate::models::output::ParsedOutput;

pub use heuristic::HeuristicParser;
pub use structured::StructuredParser;

/// Stateful classifier for one session's output stream.
pub trait OutputParser: Send {
    /// Classify the next raw chunk.
    fn parse(&mut self, chunk: &str) -> ParsedOutput;
}

/// Builds a fresh parser for each new session.
pub type ParserFactory = Arc<dyn Fn() -> Box<dyn OutputParser> + Send + Sync>;

impl ParserKind {
    /// Build a parser of this kind.
    #[must_use]
    pub fn build(self) -> Box<dyn OutputParser> {
        match self {
            Self::Heuristic => Box::new(HeuristicParser::new()),
            Self::Structured => Box::new(StructuredParser::new()),
        }
    }

    /// Factory producing parsers of this kind.
    #[must_use]
    pub fn factory(self) -> ParserFactory {
        Arc::new(move || self.build())
    }
}

/// Remove terminal escape sequences (CSI, OSC, and two-byte escapes).
#[must_use]
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('[') => {
                // CSI: parameters and intermediates, then one final byte in '@'..='~'.
                for next in chars.by_ref() {
                    if ('@'..='~').contains(&next) {
                        break;
                    }
                }
            }
            Some(']') => {
                // OSC: terminated by BEL or ESC '\'.
                while let Some(next) = chars.next() {
                    if next == '\u{7}' {
                        break;
                    }
                    if next == '\u{1b}' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    out
}
