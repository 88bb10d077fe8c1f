// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ROS Types Scraper
//!
//! Drive the native `types_scraper_cpp` discovery tool and turn what it
//! reports into IDL.
//!
//! # Features
//!
//! - **Process supervision**: stdout/stderr multiplexed line by line, stdin
//!   forwarding, interrupt-based shutdown
//! - **Section decoding**: `>>> type` / `<<< type` framed JSON records
//! - **Type model**: structured parsing of struct/valuetype declarations,
//!   dependency extraction, IDL regeneration with include guards
//! - **Outputs**: single IDL file, one file per type, type lists, topic maps
//!   (JSON/YAML)
//!
//! # Example
//!
//! ```rust,ignore
//! use types_scraper::{CombinedEmitter, IdlEmitter, ScraperConfig, ScraperContext, TypesScraper};
//!
//! let emitter = CombinedEmitter::new().with(IdlEmitter::new(Default::default(), Default::default()));
//! let mut scraper = TypesScraper::new(ScraperContext::new(), ScraperConfig::domain("0"), Box::new(emitter))?;
//! scraper.start()?;
//! scraper.run()?;
//! scraper.stop()?;
//! ```

pub mod command;
mod config;
mod context;
pub mod decoder;
mod detected;
mod emitter;
pub mod idl_fix;
pub mod mux;
pub mod process;
mod scraper;

pub use config::{
    CompatibilityMode, ConfigError, RequestReplyMapping, ScraperConfig, DEFAULT_DOMAIN, STDIN_INPUT,
};
pub use context::ScraperContext;
pub use decoder::{DecodeAnomaly, Section, SectionDecoder, SectionKind};
pub use detected::{
    include_guard, type_path, DetectedTopic, DetectedType, IdlOptions, TopicRecord, TypeError,
    TypeRecord, SCOPE_SEPARATOR, UNBOUNDED_SENTINEL,
};
pub use emitter::{
    CombinedEmitter, EmitterError, FileOptions, FileTarget, IdlEmitter, ListEmitter, OutputEmitter,
    TopicsFormat, TopicsListEmitter,
};
pub use mux::{LineSource, MuxRound, MuxRounds, MuxStopHandle, MuxedSource, StreamMux};
pub use process::{ChildProcess, ProcessError, ProcessOptions, ProcessStopHandle};
pub use scraper::{ScraperError, TypesScraper};
