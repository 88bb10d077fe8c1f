// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Section decoder for `types_scraper_cpp` output.
//!
//! The scraper brackets every detection between marker lines:
//!
//! ```text
//! >>> type
//! { "fqname": "pkg::msg::Foo", "idl": "..." }
//! <<< type
//! >>> topic
//! { "name": "rt/foo", "type_name": "pkg::msg::Foo", "idl": "..." }
//! <<< topic
//! ```
//!
//! Lines outside sections (diagnostics) are ignored. Markers seen in the
//! wrong state are reported as [`DecodeAnomaly`] and reset the decoder.

use thiserror::Error;

/// Line opening a type section.
pub const BEGIN_TYPE: &str = ">>> type";
/// Line closing a type section.
pub const END_TYPE: &str = "<<< type";
/// Line opening a topic section.
pub const BEGIN_TOPIC: &str = ">>> topic";
/// Line closing a topic section.
pub const END_TOPIC: &str = "<<< topic";

/// Kind of an open section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Type,
    Topic,
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Type => write!(f, "type"),
            Self::Topic => write!(f, "topic"),
        }
    }
}

/// A closed section's text block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    /// Detected type block.
    Type(String),
    /// Detected topic block.
    Topic(String),
}

/// Marker received in a state that does not accept it.
///
/// Non-fatal: the decoder has already reset itself when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeAnomaly {
    #[error("unexpected start of {started} section while inside {open} section")]
    NestedBegin {
        open: SectionKind,
        started: SectionKind,
    },

    #[error("unexpected end of {ended} section (open section: {})", open_name(.open))]
    UnmatchedEnd {
        open: Option<SectionKind>,
        ended: SectionKind,
    },
}

fn open_name(open: &Option<SectionKind>) -> &'static str {
    match open {
        Some(SectionKind::Type) => "type",
        Some(SectionKind::Topic) => "topic",
        None => "none",
    }
}

enum Marker {
    Begin(SectionKind),
    End(SectionKind),
}

fn classify(line: &str) -> Option<Marker> {
    if line.starts_with(BEGIN_TYPE) {
        Some(Marker::Begin(SectionKind::Type))
    } else if line.starts_with(END_TYPE) {
        Some(Marker::End(SectionKind::Type))
    } else if line.starts_with(BEGIN_TOPIC) {
        Some(Marker::Begin(SectionKind::Topic))
    } else if line.starts_with(END_TOPIC) {
        Some(Marker::End(SectionKind::Topic))
    } else {
        None
    }
}

/// Line-at-a-time section state machine.
#[derive(Debug, Default)]
pub struct SectionDecoder {
    current: Option<SectionKind>,
    buffer: Vec<String>,
    anomalies: u64,
}

impl SectionDecoder {
    /// Create an idle decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently open section, if any.
    pub fn current_section(&self) -> Option<SectionKind> {
        self.current
    }

    /// Number of anomalies seen so far.
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    /// Feed one line.
    ///
    /// Returns the closed section when `line` ends one.
    pub fn feed(&mut self, line: &str) -> Result<Option<Section>, DecodeAnomaly> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);

        match (classify(line), self.current) {
            (Some(Marker::Begin(started)), None) => {
                self.enter(started);
                Ok(None)
            }
            (Some(Marker::Begin(started)), Some(open)) => {
                Err(self.anomaly(DecodeAnomaly::NestedBegin { open, started }))
            }
            (Some(Marker::End(ended)), Some(open)) if ended == open => Ok(Some(self.exit(open))),
            (Some(Marker::End(ended)), open) => {
                Err(self.anomaly(DecodeAnomaly::UnmatchedEnd { open, ended }))
            }
            (None, Some(_)) => {
                self.buffer.push(line.to_string());
                Ok(None)
            }
            (None, None) => Ok(None),
        }
    }

    /// Feed every line, collecting closed sections.
    ///
    /// Anomalies are logged and skipped.
    pub fn decode_all<I, S>(&mut self, lines: I) -> Vec<Section>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sections = Vec::new();
        for line in lines {
            match self.feed(line.as_ref()) {
                Ok(Some(section)) => sections.push(section),
                Ok(None) => {}
                Err(anomaly) => tracing::warn!("scraper output: {}", anomaly),
            }
        }
        sections
    }

    fn enter(&mut self, kind: SectionKind) {
        self.buffer.clear();
        self.current = Some(kind);
    }

    fn exit(&mut self, kind: SectionKind) -> Section {
        let text = self.buffer.join("\n");
        self.reset();
        match kind {
            SectionKind::Type => Section::Type(text),
            SectionKind::Topic => Section::Topic(text),
        }
    }

    fn anomaly(&mut self, anomaly: DecodeAnomaly) -> DecodeAnomaly {
        self.anomalies += 1;
        self.reset();
        anomaly
    }

    fn reset(&mut self) {
        self.current = None;
        self.buffer.clear();
    }
}
