// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end runs against a stand-in `types_scraper_cpp` shell script.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use types_scraper::{
    CombinedEmitter, FileOptions, IdlEmitter, IdlOptions, ListEmitter, ScraperConfig,
    ScraperContext, ScraperError, TopicsFormat, TopicsListEmitter, TypesScraper,
};

/// Prints one type and one topic section (plus a stray end marker) on
/// stderr and a diagnostic on stdout. With `-i -` every type name read from
/// stdin is reported back as an opaque type.
const FAKE_SCRAPER: &str = r#"#!/bin/sh
echo "args: $*"
echo '>>> type' >&2
printf '%s\n' '{ "fqname": "pkg::msg::Foo", "idl": "struct pkg::msg::Foo {\n  pkg::msg::Bar bar;\n};" }' >&2
echo '<<< type' >&2
echo '>>> topic' >&2
printf '%s\n' '{ "name": "rt/foo", "type_name": "pkg::msg::Foo", "idl": "struct pkg::msg::Foo {\n  pkg::msg::Bar bar;\n};" }' >&2
echo '<<< topic' >&2
echo '<<< topic' >&2
case " $* " in
  *" -i - "*)
    while read -r name; do
      echo '>>> type' >&2
      printf '{ "fqname": "%s", "idl": "opaque %s" }\n' "$name" "$name" >&2
      echo '<<< type' >&2
    done
    ;;
esac
"#;

fn install(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn list_emitter(path: &Path) -> Box<CombinedEmitter> {
    Box::new(CombinedEmitter::new().with(ListEmitter::new(
        FileOptions {
            output: Some(path.to_path_buf()),
            ..Default::default()
        },
        false,
    )))
}

#[test]
fn test_domain_run() {
    let dir = tempfile::tempdir().unwrap();
    let executable = install(dir.path(), "types_scraper_cpp", FAKE_SCRAPER);
    let out = dir.path().join("out").join("types.idl");
    let topics = dir.path().join("topics.json");

    let emitter = CombinedEmitter::new()
        .with(TopicsListEmitter::new(
            FileOptions {
                output: Some(topics.clone()),
                ..Default::default()
            },
            TopicsFormat::Json { indent: Some(2) },
        ))
        .with(IdlEmitter::new(
            FileOptions {
                output: Some(out.clone()),
                ..Default::default()
            },
            IdlOptions::default(),
        ));
    let config = ScraperConfig {
        executable: Some(executable),
        ..ScraperConfig::domain("0")
    };

    let mut scraper = TypesScraper::new(ScraperContext::new(), config, Box::new(emitter)).unwrap();
    scraper.start().unwrap();
    scraper.run().unwrap();
    scraper.stop().unwrap();

    let names: Vec<_> = scraper.types().map(|t| t.fqname().to_string()).collect();
    assert_eq!(names, vec!["pkg::msg::Foo"]);
    assert_eq!(scraper.topics().count(), 1);

    let idl = fs::read_to_string(&out).unwrap();
    assert!(idl.starts_with("module pkg {\n  module msg {\n    struct Foo {\n      pkg::msg::Bar bar;\n"));
    assert!(idl.ends_with("// pkg::msg::Foo @ \"rt/foo\"\n"));
    assert_eq!(
        fs::read_to_string(&topics).unwrap(),
        "{\n  \"rt/foo\": \"pkg::msg::Foo\"\n}\n"
    );
}

#[test]
fn test_scanned_directories_are_piped() {
    let dir = tempfile::tempdir().unwrap();
    let executable = install(dir.path(), "types_scraper_cpp", FAKE_SCRAPER);
    for rel in ["share/pkg_a/msg/Alpha.msg", "share/pkg_b/msg/Beta.msg"] {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "int32 x\n").unwrap();
    }
    let out = dir.path().join("list.txt");

    let config = ScraperConfig {
        directories: vec![dir.path().join("share")],
        executable: Some(executable),
        ..Default::default()
    };
    let mut scraper = TypesScraper::new(ScraperContext::new(), config, list_emitter(&out)).unwrap();
    scraper.start().unwrap();
    scraper.run().unwrap();
    scraper.stop().unwrap();

    let names: Vec<_> = scraper.types().map(|t| t.fqname().to_string()).collect();
    assert_eq!(names, vec!["pkg::msg::Foo", "pkg_a::msg::Alpha", "pkg_b::msg::Beta"]);
    let alpha = scraper.types().find(|t| t.fqname() == "pkg_a::msg::Alpha").unwrap();
    assert!(!alpha.is_parsed());

    let listed = fs::read_to_string(&out).unwrap();
    assert!(listed.contains("pkg::msg::Foo@rt/foo\n"));
    assert!(listed.contains("pkg_a::msg::Alpha\n"));
    assert!(listed.contains("pkg_b::msg::Beta\n"));
}

#[test]
fn test_child_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let executable = install(dir.path(), "types_scraper_cpp", "#!/bin/sh\necho broken >&2\nexit 4\n");
    let config = ScraperConfig {
        executable: Some(executable),
        ..ScraperConfig::domain("0")
    };

    let mut scraper =
        TypesScraper::new(ScraperContext::new(), config, list_emitter(&dir.path().join("o"))).unwrap();
    scraper.start().unwrap();
    let err = scraper.run().unwrap_err();
    assert_eq!(err.exit_code(), Some(4));
}

#[test]
fn test_bad_section_aborts_running_child() {
    let dir = tempfile::tempdir().unwrap();
    let executable = install(
        dir.path(),
        "types_scraper_cpp",
        "#!/bin/sh\necho '>>> type' >&2\necho 'not json' >&2\necho '<<< type' >&2\nexec sleep 20\n",
    );
    let config = ScraperConfig {
        executable: Some(executable),
        ..ScraperConfig::domain("0")
    };

    let mut scraper =
        TypesScraper::new(ScraperContext::new(), config, list_emitter(&dir.path().join("o"))).unwrap();
    scraper.start().unwrap();
    let started = Instant::now();
    let err = scraper.run().unwrap_err();
    assert!(matches!(err, ScraperError::Type(_)), "{:?}", err);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_stop_from_another_thread() {
    let dir = tempfile::tempdir().unwrap();
    let executable = install(dir.path(), "types_scraper_cpp", "#!/bin/sh\nexec sleep 10\n");
    let config = ScraperConfig {
        executable: Some(executable),
        ..ScraperConfig::domain("0")
    };
    let context = ScraperContext::new();

    let mut scraper =
        TypesScraper::new(context.clone(), config, list_emitter(&dir.path().join("o"))).unwrap();
    scraper.start().unwrap();

    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        context.request_stop();
    });
    let started = Instant::now();
    scraper.run().unwrap();
    stopper.join().unwrap();
    scraper.stop().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_stop_before_run_skips_child() {
    let dir = tempfile::tempdir().unwrap();
    let context = ScraperContext::new();
    context.request_stop();
    let config = ScraperConfig {
        executable: Some(dir.path().join("never_started")),
        ..ScraperConfig::domain("0")
    };

    let mut scraper = TypesScraper::new(context, config, list_emitter(&dir.path().join("o"))).unwrap();
    scraper.start().unwrap();
    scraper.run().unwrap();
    scraper.stop().unwrap();
    assert_eq!(scraper.types().count(), 0);
}
