// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Child command line and filesystem discovery.

use crate::config::{ScraperConfig, STDIN_INPUT};
use crate::detected::SCOPE_SEPARATOR;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Name of the native scraper executable.
pub const SCRAPER_EXECUTABLE: &str = "types_scraper_cpp";

/// Environment variable whose entries are searched for the executable.
pub const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Ordered, de-duplicated executable search roots.
pub fn search_roots(library_path: Option<&str>, cwd: Option<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    library_path
        .into_iter()
        .flat_map(|value| value.split(':'))
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .chain(cwd)
        .filter(|root| seen.insert(root.clone()))
        .collect()
}

/// Find `name` anywhere below `roots`, in root order.
pub fn find_in(roots: &[PathBuf], name: &str) -> Option<PathBuf> {
    roots.iter().find_map(|root| {
        WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|entry| entry.file_type().is_file() && entry.file_name() == name)
            .map(|entry| entry.into_path())
    })
}

/// Locate `types_scraper_cpp` below `LD_LIBRARY_PATH` entries, then the
/// current directory.
pub fn find_executable() -> Option<PathBuf> {
    let library_path = env::var(LIBRARY_PATH_VAR).ok();
    let roots = search_roots(library_path.as_deref(), env::current_dir().ok());
    tracing::debug!(?roots, "executable search path");
    let found = find_in(&roots, SCRAPER_EXECUTABLE);
    if let Some(path) = &found {
        tracing::debug!(path = %path.display(), "found executable");
    }
    found
}

/// Build the child command line.
///
/// `open_stdin` adds `-i -` so the child reads type names from its stdin.
pub fn scraper_command(executable: &Path, config: &ScraperConfig, open_stdin: bool) -> Vec<String> {
    let mut cmd = vec![executable.display().to_string()];

    if config.swap_outputs {
        cmd.push("-W".into());
    }
    if open_stdin {
        cmd.extend(["-i".into(), STDIN_INPUT.into()]);
    }
    if let Some(filter) = &config.filter {
        cmd.extend(["-f".into(), filter.clone()]);
    }
    if let Some(raw_filter) = &config.raw_filter {
        cmd.extend(["-F".into(), raw_filter.clone()]);
    }
    cmd.extend((0..config.child_verbosity()).map(|_| "-v".to_string()));
    if let Some(mode) = config.compatibility_mode {
        cmd.extend(["--compatibility-mode".into(), mode.to_string()]);
    }
    if let Some(mapping) = config.request_reply_mapping {
        cmd.extend(["--request-reply-mapping".into(), mapping.to_string()]);
    }
    if config.mangle {
        cmd.push("-m".into());
    }

    let mut seen = HashSet::new();
    for domain in config.domains.iter().filter(|d| seen.insert(d.as_str())) {
        cmd.extend(["-d".into(), domain.clone()]);
    }
    let mut seen = HashSet::new();
    for input in config
        .inputs
        .iter()
        .filter(|p| p.as_path() != Path::new(STDIN_INPUT))
        .filter(|p| seen.insert(p.as_path()))
    {
        cmd.extend(["-i".into(), input.display().to_string()]);
    }

    cmd
}

/// Type name for a `<pkg>/<class>/<Type>.msg` path.
///
/// Paths with fewer than three components yield `None`.
pub fn msg_type_name(path: &Path) -> Option<String> {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.len() < 3 {
        return None;
    }
    let tail = &parts[parts.len() - 3..];
    let type_name = tail[2].strip_suffix(".msg")?;
    Some([tail[0].as_str(), tail[1].as_str(), type_name].join(SCOPE_SEPARATOR))
}

/// Type names of every `.msg` file below `directories`, first seen first.
pub fn scan_msg_directories<P: AsRef<Path>>(directories: &[P]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    for dir in directories {
        let entries = WalkDir::new(dir.as_ref())
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "msg"))
            .collect::<Vec<_>>();

        for path in entries {
            let Some(fqname) = msg_type_name(&path) else {
                continue;
            };
            if seen.insert(fqname.clone()) {
                tracing::debug!(path = %path.display(), type_name = %fqname, "found");
                found.push(fqname);
            }
        }
    }

    found
}
