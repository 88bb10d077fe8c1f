// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scraper orchestrator.
//!
//! Drives one run: previously captured output is decoded first, then
//! `types_scraper_cpp` is launched and its section stream decoded until the
//! child exits or a stop is requested. Every detection is recorded by
//! identity (last write wins) and forwarded to the output emitter.

use crate::command::{find_executable, scan_msg_directories, scraper_command, SCRAPER_EXECUTABLE};
use crate::config::{ConfigError, ScraperConfig};
use crate::context::ScraperContext;
use crate::decoder::{Section, SectionDecoder};
use crate::detected::{DetectedTopic, DetectedType, TypeError};
use crate::emitter::{EmitterError, OutputEmitter};
use crate::process::{ChildProcess, ProcessError, ProcessOptions};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Orchestrator errors.
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to read {}: {source}", .path.display())]
    ReadParsed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to find {0}")]
    ExecutableNotFound(&'static str),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Emitter(#[from] EmitterError),
}

impl ScraperError {
    /// Exit code of a failed child process, if that is what failed.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Process(err) => err.exit_code(),
            _ => None,
        }
    }
}

/// Slots of a child output round.
const STDOUT_SLOT: usize = 0;
const STDERR_SLOT: usize = 1;

/// One scraper run.
pub struct TypesScraper {
    context: ScraperContext,
    config: ScraperConfig,
    emitter: Box<dyn OutputEmitter>,
    types: BTreeMap<String, DetectedType>,
    topics: BTreeMap<String, DetectedTopic>,
    closed: bool,
}

impl TypesScraper {
    /// Create a scraper. The configuration is validated here.
    pub fn new(
        context: ScraperContext,
        config: ScraperConfig,
        emitter: Box<dyn OutputEmitter>,
    ) -> Result<Self, ScraperError> {
        config.validate()?;
        if !config.parse.is_empty() {
            tracing::info!("pregenerated output: {:?}", config.parse);
        }
        if !config.directories.is_empty() {
            tracing::info!("scanning directories: {:?}", config.directories);
        }
        Ok(Self {
            context,
            config,
            emitter,
            types: BTreeMap::new(),
            topics: BTreeMap::new(),
            closed: false,
        })
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    /// Types detected so far, ordered by name.
    pub fn types(&self) -> impl Iterator<Item = &DetectedType> {
        self.types.values()
    }

    /// Topics detected so far, ordered by name.
    pub fn topics(&self) -> impl Iterator<Item = &DetectedTopic> {
        self.topics.values()
    }

    /// Open the emitter.
    pub fn start(&mut self) -> Result<(), ScraperError> {
        self.emitter.open()?;
        Ok(())
    }

    /// Decode previously captured output, then run the child to completion.
    pub fn run(&mut self) -> Result<(), ScraperError> {
        self.load_parsed()?;

        let scanned = scan_msg_directories(&self.config.directories);
        if self.config.domains.is_empty() && self.config.inputs.is_empty() && scanned.is_empty() {
            tracing::info!("nothing to scrape");
            return Ok(());
        }
        if self.context.is_stopped() {
            return Ok(());
        }

        let executable = match &self.config.executable {
            Some(path) => path.clone(),
            None => find_executable()
                .ok_or(ScraperError::ExecutableNotFound(SCRAPER_EXECUTABLE))?,
        };
        let pipe_stdin = self.config.reads_stdin();
        let command = scraper_command(&executable, &self.config, pipe_stdin || !scanned.is_empty());
        tracing::info!("scraper command: {}", command.join(" "));

        let mut child = ChildProcess::spawn(
            &command,
            ProcessOptions {
                pipe_stdin,
                wait_timeout: self.config.wait_timeout(),
            },
        )?;
        self.context.register(child.stop_handle());

        for type_name in scanned {
            child.pipe_stdin(Some(type_name));
        }
        child.pipe_stdin(None);

        let result = self.consume(&mut child);
        self.context.clear();
        result
    }

    /// Close the emitter with every recorded detection and stop the child.
    ///
    /// Idempotent.
    pub fn stop(&mut self) -> Result<(), ScraperError> {
        self.context.request_stop();
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let types: Vec<DetectedType> = self.types.values().cloned().collect();
        let topics: Vec<DetectedTopic> = self.topics.values().cloned().collect();
        self.emitter.close(&types, &topics)?;
        Ok(())
    }

    fn load_parsed(&mut self) -> Result<(), ScraperError> {
        let mut decoder = SectionDecoder::new();
        for path in self.config.parse.clone() {
            let text = std::fs::read_to_string(&path).map_err(|source| ScraperError::ReadParsed {
                path: path.clone(),
                source,
            })?;
            tracing::debug!(path = %path.display(), "loading pregenerated output");
            for section in decoder.decode_all(text.split('\n')) {
                self.on_section(section)?;
            }
        }
        Ok(())
    }

    fn consume(&mut self, child: &mut ChildProcess) -> Result<(), ScraperError> {
        let (section_slot, log_slot) = if self.config.swap_outputs {
            (STDERR_SLOT, STDOUT_SLOT)
        } else {
            (STDOUT_SLOT, STDERR_SLOT)
        };
        let mut decoder = SectionDecoder::new();

        for round in child.monitor() {
            let round = round?;
            if let Some(line) = round.get(section_slot) {
                match decoder.feed(line) {
                    Ok(Some(section)) => self.on_section(section)?,
                    Ok(None) => {}
                    Err(anomaly) => tracing::warn!("scraper output: {}", anomaly),
                }
            }
            if let Some(line) = round.get(log_slot) {
                tracing::debug!("scraper: {}", line);
            }
        }
        Ok(())
    }

    fn on_section(&mut self, section: Section) -> Result<(), ScraperError> {
        match section {
            Section::Type(text) => {
                let detected = DetectedType::from_json(&text)?;
                self.emitter.detected_type(&detected)?;
                self.types.insert(detected.fqname().to_string(), detected);
            }
            Section::Topic(text) => {
                let detected = DetectedTopic::from_json(&text)?;
                self.emitter.detected_topic(&detected)?;
                self.topics.insert(detected.name().to_string(), detected);
            }
        }
        Ok(())
    }
}
