// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ROS Types Scraper CLI
//!
//! Inspect a DDS domain (or the local filesystem) and dump every detected
//! ROS type to IDL.
//!
//! # Usage
//!
//! ```bash
//! # Join domain 0 and print IDL for everything discovered
//! types-scraper
//!
//! # One IDL file per type under ./idl, stop after 30 seconds
//! types-scraper -d 0 --split -o idl --exit-after 30s
//!
//! # Derive type names from .msg files
//! types-scraper -D /opt/ros/humble/share --list
//!
//! # Topic map as YAML
//! types-scraper --topics-only --yaml
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{fmt as log_fmt, EnvFilter};
use types_scraper::{
    CombinedEmitter, CompatibilityMode, FileOptions, IdlEmitter, IdlOptions, ListEmitter,
    RequestReplyMapping, ScraperConfig, ScraperContext, TopicsFormat, TopicsListEmitter,
    TypesScraper, DEFAULT_DOMAIN,
};

#[derive(Parser)]
#[command(name = "types-scraper")]
#[command(author = "naskel.com")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Inspect a DDS domain (or your local filesystem), and dump all detected ROS types to IDL"
)]
#[command(long_about = None)]
struct Cli {
    /// Join DOMAIN and detect types from discovery information (repeatable)
    #[arg(short, long = "domain", value_name = "DOMAIN-ID[/QOS-PROFILE]")]
    domains: Vec<String>,

    /// Read type names from FILE, or stdin for - (repeatable)
    #[arg(short, long = "input", value_name = "FILE")]
    inputs: Vec<PathBuf>,

    /// Parse output previously generated by types_scraper_cpp (repeatable)
    #[arg(short, long = "parse", value_name = "FILE")]
    parse: Vec<PathBuf>,

    /// Derive type names from .msg files below DIR (repeatable)
    #[arg(short = 'D', long = "directory", value_name = "DIR")]
    directories: Vec<PathBuf>,

    /// Only consider ROS types whose canonical name matches this regex
    #[arg(short, long)]
    filter: Option<String>,

    /// Only consider types whose raw DDS name matches this regex
    #[arg(short = 'F', long)]
    raw_filter: Option<String>,

    /// Write output to FILE (base directory with --split) instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Write each detected type to its own file
    #[arg(long)]
    split: bool,

    /// With --split, encode package names in file names instead of directories
    #[arg(long)]
    flat: bool,

    /// Append to the output file, or add files to an existing directory
    #[arg(short, long, conflicts_with = "overwrite")]
    append: bool,

    /// Overwrite existing output files and directories
    #[arg(short = 'O', long)]
    overwrite: bool,

    /// Only list detected type names instead of their IDL
    #[arg(short, long, conflicts_with = "mangle")]
    list: bool,

    /// Report ROS types by their mangled name (e.g. my_types::msg::dds_::MyType_)
    #[arg(short, long)]
    mangle: bool,

    /// Write a JSON/YAML map of detected topics to FILE
    #[arg(short = 'T', long, value_name = "FILE")]
    topics_list: Option<PathBuf>,

    /// Only report topics
    #[arg(long)]
    topics_only: bool,

    /// Do not indent generated IDL (or JSON)
    #[arg(long)]
    no_indent: bool,

    /// Indentation depth added to generated IDL
    #[arg(long, value_name = "DEPTH", default_value = "0")]
    indent_depth: usize,

    /// Size of each indentation step
    #[arg(long, value_name = "STEP", default_value = "2")]
    indent_step: usize,

    /// Generate YAML instead of JSON
    #[arg(long)]
    yaml: bool,

    /// Clean up IDL that could not be regenerated structurally
    #[arg(long)]
    fix_idl: bool,

    /// Exit after TIME (seconds, or with an s/m/h suffix, e.g. 10m)
    #[arg(long, value_name = "TIME", value_parser = parse_time_expr)]
    exit_after: Option<TimeExpr>,

    /// Produce more logging output (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Generate types compatible with a ROS middleware
    #[arg(long, value_name = "MODE", value_parser = parse_compatibility_mode)]
    compatibility_mode: Option<CompatibilityMode>,

    /// Naming scheme for request/reply topics
    #[arg(long, value_name = "MAPPING", value_parser = parse_request_reply_mapping)]
    request_reply_mapping: Option<RequestReplyMapping>,

    /// Path to types_scraper_cpp (skips the LD_LIBRARY_PATH search)
    #[arg(long, value_name = "PATH")]
    executable: Option<PathBuf>,

    /// Load scraper settings from a TOML file (flags extend it)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

/// Duration given as `N`, `Ns`, `Nm` or `Nh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimeExpr {
    value: u64,
    unit: char,
}

impl TimeExpr {
    fn duration(&self) -> Duration {
        let scale = match self.unit {
            'm' => 60,
            'h' => 60 * 60,
            _ => 1,
        };
        Duration::from_secs(self.value.saturating_mul(scale))
    }
}

impl fmt::Display for TimeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            'm' => "minutes",
            'h' => "hours",
            _ => "seconds",
        };
        write!(f, "{} {}", self.value, unit)
    }
}

fn parse_time_expr(s: &str) -> Result<TimeExpr, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("invalid empty time expression".into());
    }
    let (digits, unit) = match s.chars().last().map(|c| c.to_ascii_lowercase()) {
        Some(unit @ ('s' | 'm' | 'h')) => (&s[..s.len() - 1], unit),
        _ => (s, 's'),
    };
    let value = digits
        .parse::<u64>()
        .map_err(|_| format!("invalid time expression: {}", s))?;
    Ok(TimeExpr { value, unit })
}

fn parse_compatibility_mode(s: &str) -> Result<CompatibilityMode, String> {
    s.parse().map_err(|e: types_scraper::ConfigError| e.to_string())
}

fn parse_request_reply_mapping(s: &str) -> Result<RequestReplyMapping, String> {
    s.parse().map_err(|e: types_scraper::ConfigError| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ScraperConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ScraperConfig::default(),
    };
    config.merge(scraper_config(&cli));

    // Setup tracing; stdout is reserved for generated output
    let level = match config.verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    log_fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if config.reads_stdin() && std::io::stdin().is_terminal() {
        bail!("pipe something into the process to read from stdin");
    }
    if config.apply_default_domain() {
        tracing::info!("no input specified, joining DDS domain {}", DEFAULT_DOMAIN);
    }

    let context = ScraperContext::new();
    let mut scraper = TypesScraper::new(context.clone(), config, Box::new(build_emitter(&cli)))
        .context("Invalid scraper configuration")?;

    ctrlc_handler(context.clone());
    let _exit_timer = cli.exit_after.map(|expr| schedule_exit(expr, context.clone()));

    scraper.start().context("Failed to open output")?;
    scraper.run().context("Scraper failed")?;
    scraper.stop().context("Failed to write output")?;

    Ok(())
}

fn scraper_config(cli: &Cli) -> ScraperConfig {
    ScraperConfig {
        domains: cli.domains.clone(),
        inputs: cli.inputs.clone(),
        parse: cli.parse.clone(),
        directories: cli.directories.clone(),
        filter: cli.filter.clone(),
        raw_filter: cli.raw_filter.clone(),
        mangle: cli.mangle,
        verbosity: cli.verbose,
        compatibility_mode: cli.compatibility_mode,
        request_reply_mapping: cli.request_reply_mapping,
        executable: cli.executable.clone(),
        ..Default::default()
    }
}

fn build_emitter(cli: &Cli) -> CombinedEmitter {
    let output = FileOptions {
        output: cli.output.clone(),
        append: cli.append,
        overwrite: cli.overwrite,
        ..Default::default()
    };
    let topics_format = if cli.yaml {
        TopicsFormat::Yaml
    } else {
        TopicsFormat::Json {
            indent: (!cli.no_indent).then_some(cli.indent_step),
        }
    };

    let mut emitter = CombinedEmitter::new();
    if cli.list {
        emitter.push(Box::new(ListEmitter::new(output, cli.topics_only)));
        return emitter;
    }
    if cli.topics_only {
        let topics = FileOptions {
            output: cli.topics_list.clone().or(output.output),
            ..output
        };
        emitter.push(Box::new(TopicsListEmitter::new(topics, topics_format)));
        return emitter;
    }

    if let Some(path) = &cli.topics_list {
        emitter.push(Box::new(TopicsListEmitter::new(
            FileOptions {
                output: Some(path.clone()),
                overwrite: cli.overwrite,
                ..Default::default()
            },
            topics_format,
        )));
    }
    let format = IdlOptions {
        indent: !cli.no_indent,
        indent_depth: cli.indent_depth,
        indent_step: cli.indent_step,
        ..Default::default()
    };
    emitter.push(Box::new(
        IdlEmitter::new(
            FileOptions {
                split: cli.split,
                flat: cli.flat,
                ..output
            },
            format,
        )
        .with_fix(cli.fix_idl),
    ));
    emitter
}

/// Setup Ctrl+C handler.
fn ctrlc_handler(context: ScraperContext) {
    let _ = ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, shutting down...");
        context.request_stop();
    });
}

/// Request a stop once `expr` has elapsed. Dropping the sender cancels it.
fn schedule_exit(expr: TimeExpr, context: ScraperContext) -> Option<Sender<()>> {
    tracing::info!("running for {}", expr);
    let (cancel_tx, cancel_rx) = channel::bounded::<()>(1);
    let spawned = thread::Builder::new()
        .name("exit-after".into())
        .spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(expr.duration()) {
                tracing::info!("terminating after {}", expr);
                context.request_stop();
            }
        });
    match spawned {
        Ok(_) => Some(cancel_tx),
        Err(err) => {
            tracing::warn!("failed to schedule exit: {}", err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_expr() {
        assert_eq!(parse_time_expr("10").unwrap().duration(), Duration::from_secs(10));
        assert_eq!(parse_time_expr("10s").unwrap().duration(), Duration::from_secs(10));
        assert_eq!(parse_time_expr("2m").unwrap().duration(), Duration::from_secs(120));
        assert_eq!(parse_time_expr("1H").unwrap().duration(), Duration::from_secs(3600));
        assert!(parse_time_expr("").is_err());
        assert!(parse_time_expr("m").is_err());
        assert!(parse_time_expr("ten").is_err());
    }

    #[test]
    fn test_time_expr_display() {
        assert_eq!(parse_time_expr("10m").unwrap().to_string(), "10 minutes");
        assert_eq!(parse_time_expr("5").unwrap().to_string(), "5 seconds");
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["types-scraper"]);
        let config = scraper_config(&cli);
        assert!(!config.has_input());
        assert_eq!(cli.indent_step, 2);
        assert_eq!(build_emitter(&cli).len(), 1);
    }

    #[test]
    fn test_cli_repeated_flags() {
        let cli = Cli::parse_from([
            "types-scraper",
            "-d",
            "0",
            "-d",
            "3",
            "-vv",
            "--compatibility-mode",
            "rmw_cyclonedds_cpp",
            "-T",
            "topics.json",
        ]);
        let config = scraper_config(&cli);
        assert_eq!(config.domains, vec!["0", "3"]);
        assert_eq!(config.verbosity, 2);
        assert_eq!(config.compatibility_mode, Some(CompatibilityMode::CycloneDds));
        assert_eq!(build_emitter(&cli).len(), 2);
    }

    #[test]
    fn test_cli_conflicts() {
        assert!(Cli::try_parse_from(["types-scraper", "-a", "-O"]).is_err());
        assert!(Cli::try_parse_from(["types-scraper", "-l", "-m"]).is_err());
        assert!(Cli::try_parse_from(["types-scraper", "--compatibility-mode", "bogus"]).is_err());
    }

    #[test]
    fn test_cancelled_exit_timer() {
        let context = ScraperContext::new();
        let expr = parse_time_expr("1h").unwrap();
        let cancel = schedule_exit(expr, context.clone());
        drop(cancel);
        thread::sleep(Duration::from_millis(50));
        assert!(!context.is_stopped());
    }
}
