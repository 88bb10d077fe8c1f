// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scraper configuration.
//!
//! Supports both programmatic and file-based (TOML) configuration. Command
//! line flags extend whatever a file provides.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Input file name that stands for the controlling stdin.
pub const STDIN_INPUT: &str = "-";

/// Domain joined when no input of any kind is configured.
pub const DEFAULT_DOMAIN: &str = "0";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generated type compatibility with a specific ROS middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompatibilityMode {
    #[serde(rename = "rmw_cyclonedds_cpp")]
    CycloneDds,
    #[serde(rename = "rmw_connext_cpp")]
    Connext,
}

impl CompatibilityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CycloneDds => "rmw_cyclonedds_cpp",
            Self::Connext => "rmw_connext_cpp",
        }
    }
}

impl fmt::Display for CompatibilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompatibilityMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rmw_cyclonedds_cpp" => Ok(Self::CycloneDds),
            "rmw_connext_cpp" => Ok(Self::Connext),
            other => Err(ConfigError::Invalid(format!(
                "invalid compatibility mode: {}",
                other
            ))),
        }
    }
}

/// Naming scheme for service request/reply topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestReplyMapping {
    Basic,
    Extended,
}

impl RequestReplyMapping {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Extended => "extended",
        }
    }
}

impl fmt::Display for RequestReplyMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestReplyMapping {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Self::Basic),
            "extended" => Ok(Self::Extended),
            other => Err(ConfigError::Invalid(format!(
                "invalid request/reply mapping: {}",
                other
            ))),
        }
    }
}

/// Scraper configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// DDS domains to join (`DOMAIN-ID[/QOS-PROFILE]`).
    #[serde(default)]
    pub domains: Vec<String>,

    /// Files listing type names (`-` for stdin).
    #[serde(default)]
    pub inputs: Vec<PathBuf>,

    /// Previously captured scraper output to load first.
    #[serde(default)]
    pub parse: Vec<PathBuf>,

    /// Directories searched for `.msg` files.
    #[serde(default)]
    pub directories: Vec<PathBuf>,

    /// Regex on canonical ROS type names.
    #[serde(default)]
    pub filter: Option<String>,

    /// Regex on raw DDS type names.
    #[serde(default)]
    pub raw_filter: Option<String>,

    /// Report mangled ROS type names.
    #[serde(default)]
    pub mangle: bool,

    /// Verbosity level (each level above one is forwarded to the child).
    #[serde(default)]
    pub verbosity: u8,

    #[serde(default)]
    pub compatibility_mode: Option<CompatibilityMode>,

    #[serde(default)]
    pub request_reply_mapping: Option<RequestReplyMapping>,

    /// Ask the child to print sections on stderr and diagnostics on stdout.
    #[serde(default = "default_true")]
    pub swap_outputs: bool,

    /// Bounded wait for stream multiplexers (milliseconds).
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,

    /// Path to `types_scraper_cpp`, skipping the search.
    #[serde(default)]
    pub executable: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            inputs: Vec::new(),
            parse: Vec::new(),
            directories: Vec::new(),
            filter: None,
            raw_filter: None,
            mangle: false,
            verbosity: 0,
            compatibility_mode: None,
            request_reply_mapping: None,
            swap_outputs: true,
            wait_timeout_ms: None,
            executable: None,
        }
    }
}

impl ScraperConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Scrape a single domain.
    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            domains: vec![domain.into()],
            ..Default::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for domain in &self.domains {
            let id = domain.split_once('/').map_or(domain.as_str(), |(id, _)| id);
            if id.parse::<u32>().is_err() {
                return Err(ConfigError::Invalid(format!(
                    "Invalid domain '{}': expected DOMAIN-ID[/QOS-PROFILE]",
                    domain
                )));
            }
        }

        for (name, pattern) in [("filter", &self.filter), ("raw filter", &self.raw_filter)] {
            if let Some(pattern) = pattern {
                Regex::new(pattern).map_err(|e| {
                    ConfigError::Invalid(format!("Invalid {} '{}': {}", name, pattern, e))
                })?;
            }
        }

        if self.wait_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "Wait timeout must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// Whether any input (domain, file, directory, parse file) is configured.
    pub fn has_input(&self) -> bool {
        !(self.domains.is_empty()
            && self.inputs.is_empty()
            && self.parse.is_empty()
            && self.directories.is_empty())
    }

    /// Join the default domain when nothing else is configured.
    pub fn apply_default_domain(&mut self) -> bool {
        if self.has_input() {
            return false;
        }
        self.domains.push(DEFAULT_DOMAIN.to_string());
        true
    }

    /// Whether the controlling stdin is one of the inputs.
    pub fn reads_stdin(&self) -> bool {
        self.inputs.iter().any(|p| p == Path::new(STDIN_INPUT))
    }

    /// Verbosity forwarded to the child (one level less than ours).
    pub fn child_verbosity(&self) -> u8 {
        self.verbosity.saturating_sub(1)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    /// Merge `other` into `self`: lists are extended, set options replace.
    pub fn merge(&mut self, other: ScraperConfig) {
        self.domains.extend(other.domains);
        self.inputs.extend(other.inputs);
        self.parse.extend(other.parse);
        self.directories.extend(other.directories);
        self.filter = other.filter.or(self.filter.take());
        self.raw_filter = other.raw_filter.or(self.raw_filter.take());
        self.mangle |= other.mangle;
        self.verbosity = self.verbosity.max(other.verbosity);
        self.compatibility_mode = other.compatibility_mode.or(self.compatibility_mode);
        self.request_reply_mapping = other.request_reply_mapping.or(self.request_reply_mapping);
        self.swap_outputs &= other.swap_outputs;
        self.wait_timeout_ms = other.wait_timeout_ms.or(self.wait_timeout_ms);
        self.executable = other.executable.or(self.executable.take());
    }
}
