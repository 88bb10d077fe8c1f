// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Output emitters.
//!
//! Emitters receive every detection as it is decoded, then the final set of
//! types and topics on close. [`CombinedEmitter`] fans out to several
//! emitters in registration order.

use crate::detected::{DetectedTopic, DetectedType, IdlOptions};
use crate::idl_fix::fix_idl;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Emitter errors.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("output {kind} already exists: {}", .path.display())]
    AlreadyExists { kind: &'static str, path: PathBuf },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Receiver of scraper detections.
pub trait OutputEmitter {
    /// Prepare outputs before the first detection.
    fn open(&mut self) -> Result<(), EmitterError> {
        Ok(())
    }

    /// A type was detected (possibly again).
    fn detected_type(&mut self, detected: &DetectedType) -> Result<(), EmitterError>;

    /// A topic was detected (possibly again).
    fn detected_topic(&mut self, detected: &DetectedTopic) -> Result<(), EmitterError>;

    /// Flush outputs. Receives every type and topic detected during the run.
    fn close(
        &mut self,
        _types: &[DetectedType],
        _topics: &[DetectedTopic],
    ) -> Result<(), EmitterError> {
        Ok(())
    }
}

/// Fan-out to several emitters, in registration order.
#[derive(Default)]
pub struct CombinedEmitter {
    emitters: Vec<Box<dyn OutputEmitter>>,
}

impl CombinedEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an emitter.
    pub fn push(&mut self, emitter: Box<dyn OutputEmitter>) {
        self.emitters.push(emitter);
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, emitter: impl OutputEmitter + 'static) -> Self {
        self.emitters.push(Box::new(emitter));
        self
    }

    pub fn len(&self) -> usize {
        self.emitters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emitters.is_empty()
    }
}

impl OutputEmitter for CombinedEmitter {
    fn open(&mut self) -> Result<(), EmitterError> {
        self.emitters.iter_mut().try_for_each(|e| e.open())
    }

    fn detected_type(&mut self, detected: &DetectedType) -> Result<(), EmitterError> {
        tracing::info!("detected type: {}", detected);
        self.emitters
            .iter_mut()
            .try_for_each(|e| e.detected_type(detected))
    }

    fn detected_topic(&mut self, detected: &DetectedTopic) -> Result<(), EmitterError> {
        tracing::info!("detected topic: {}", detected);
        self.emitters
            .iter_mut()
            .try_for_each(|e| e.detected_topic(detected))
    }

    fn close(&mut self, types: &[DetectedType], topics: &[DetectedTopic]) -> Result<(), EmitterError> {
        self.emitters
            .iter_mut()
            .try_for_each(|e| e.close(types, topics))
    }
}

/// Where and how a file emitter writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOptions {
    /// Output file (or base directory in split mode). Stdout when unset.
    pub output: Option<PathBuf>,
    /// Append to an existing output file.
    pub append: bool,
    /// Replace existing outputs.
    pub overwrite: bool,
    /// One file per type below the output directory.
    pub split: bool,
    /// Encode modules in split file names instead of subdirectories.
    pub flat: bool,
}

/// Output file, split directory, or stdout.
pub struct FileTarget {
    options: FileOptions,
    file: Option<BufWriter<File>>,
    out_dir: Option<PathBuf>,
    updated: HashSet<PathBuf>,
}

impl FileTarget {
    pub fn new(options: FileOptions) -> Self {
        Self {
            options,
            file: None,
            out_dir: None,
            updated: HashSet::new(),
        }
    }

    pub fn options(&self) -> &FileOptions {
        &self.options
    }

    /// Whether output goes to a file rather than stdout.
    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }

    /// Open the output file or create the split directory.
    pub fn open(&mut self) -> Result<(), EmitterError> {
        if self.options.output.is_none() && !self.options.split {
            return Ok(());
        }
        let path = match &self.options.output {
            Some(path) => path.clone(),
            None => std::env::current_dir()?,
        };

        if self.options.split {
            self.prepare(&path, true, self.options.append)?;
            fs::create_dir_all(&path)?;
            self.out_dir = Some(path);
        } else {
            self.file = Some(self.create_file(&path, self.options.append)?);
        }
        Ok(())
    }

    /// Write `text` as one or more complete lines.
    pub fn write(&mut self, text: &str) -> Result<(), EmitterError> {
        match self.file.as_mut() {
            Some(file) => write_text(file, text)?,
            None => write_text(&mut io::stdout().lock(), text)?,
        }
        Ok(())
    }

    /// Write `content` to `relative` below the split directory.
    pub fn write_file(&mut self, relative: &str, content: &str) -> Result<PathBuf, EmitterError> {
        let base = match &self.out_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        let path = base.join(relative);
        let mut file = self.create_file(&path, false)?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        tracing::info!("created file: {}", path.display());
        Ok(path)
    }

    /// Flush and release the output file.
    pub fn close(&mut self) -> Result<(), EmitterError> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    fn create_file(&mut self, path: &Path, append: bool) -> Result<BufWriter<File>, EmitterError> {
        self.prepare(path, false, append)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(path)?;
        Ok(BufWriter::new(file))
    }

    /// Refuse to clobber outputs this run has not written itself.
    fn prepare(&mut self, path: &Path, is_dir: bool, append: bool) -> Result<(), EmitterError> {
        tracing::info!(
            "open output {}: {}{}",
            if is_dir { "directory" } else { "file" },
            path.display(),
            if append { " (append)" } else { "" }
        );
        if path.exists() && !self.options.overwrite && !append && !self.updated.contains(path) {
            return Err(EmitterError::AlreadyExists {
                kind: if is_dir { "directory" } else { "file" },
                path: path.to_path_buf(),
            });
        }
        self.updated.insert(path.to_path_buf());
        Ok(())
    }
}

fn write_text<W: Write>(out: &mut W, text: &str) -> io::Result<()> {
    out.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        out.write_all(b"\n")?;
    }
    out.flush()
}

/// IDL output for detected types.
pub struct IdlEmitter {
    target: FileTarget,
    format: IdlOptions,
    fix: bool,
}

impl IdlEmitter {
    /// `format` controls indentation; include settings follow `file`.
    pub fn new(file: FileOptions, format: IdlOptions) -> Self {
        Self {
            target: FileTarget::new(file),
            format,
            fix: false,
        }
    }

    /// Run the IDL fix passes over unparsed pass-through text.
    pub fn with_fix(mut self, fix: bool) -> Self {
        self.fix = fix;
        self
    }

    fn idl_options(&self) -> IdlOptions {
        let file = self.target.options();
        IdlOptions {
            add_includes: file.split,
            flat_includes: file.flat,
            ..self.format
        }
    }
}

impl OutputEmitter for IdlEmitter {
    fn open(&mut self) -> Result<(), EmitterError> {
        self.target.open()
    }

    fn detected_type(&mut self, detected: &DetectedType) -> Result<(), EmitterError> {
        let mut idl = detected.to_idl(&self.idl_options());
        if self.fix && !detected.is_parsed() {
            idl = fix_idl(&idl);
        }

        if self.target.options().split {
            let flat = self.target.options().flat;
            self.target
                .write_file(&format!("{}.idl", detected.path(flat)), &idl)?;
            return Ok(());
        }
        self.target.write(&idl)
    }

    fn detected_topic(&mut self, detected: &DetectedTopic) -> Result<(), EmitterError> {
        self.target.write(&format!(
            "// {} @ \"{}\"",
            detected.detected_type().fqname(),
            detected.name()
        ))
    }

    fn close(&mut self, _types: &[DetectedType], _topics: &[DetectedTopic]) -> Result<(), EmitterError> {
        self.target.close()
    }
}

/// Plain list of type names and `type@topic` pairs.
pub struct ListEmitter {
    target: FileTarget,
    topics_only: bool,
}

impl ListEmitter {
    pub fn new(file: FileOptions, topics_only: bool) -> Self {
        Self {
            target: FileTarget::new(file),
            topics_only,
        }
    }
}

impl OutputEmitter for ListEmitter {
    fn open(&mut self) -> Result<(), EmitterError> {
        self.target.open()
    }

    fn detected_type(&mut self, detected: &DetectedType) -> Result<(), EmitterError> {
        if self.topics_only {
            return Ok(());
        }
        self.target.write(detected.fqname())
    }

    fn detected_topic(&mut self, detected: &DetectedTopic) -> Result<(), EmitterError> {
        self.target.write(&format!(
            "{}@{}",
            detected.detected_type().fqname(),
            detected.name()
        ))
    }

    fn close(&mut self, _types: &[DetectedType], _topics: &[DetectedTopic]) -> Result<(), EmitterError> {
        self.target.close()
    }
}

/// Encoding of the topics map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicsFormat {
    /// JSON, indented by the given step, or compact when `None`.
    Json { indent: Option<usize> },
    Yaml,
}

/// Sorted `topic -> type` map, written on close.
pub struct TopicsListEmitter {
    target: FileTarget,
    format: TopicsFormat,
    topics: BTreeMap<String, String>,
}

impl TopicsListEmitter {
    pub fn new(file: FileOptions, format: TopicsFormat) -> Self {
        Self {
            target: FileTarget::new(file),
            format,
            topics: BTreeMap::new(),
        }
    }

    /// Render the accumulated map.
    pub fn render(&self) -> Result<String, EmitterError> {
        match self.format {
            TopicsFormat::Yaml => Ok(serde_yaml::to_string(&self.topics)?),
            TopicsFormat::Json { indent: None } => Ok(serde_json::to_string(&self.topics)?),
            TopicsFormat::Json {
                indent: Some(step),
            } => {
                let indent = vec![b' '; step];
                let mut out = Vec::new();
                let mut ser = serde_json::Serializer::with_formatter(
                    &mut out,
                    PrettyFormatter::with_indent(&indent),
                );
                self.topics.serialize(&mut ser)?;
                Ok(String::from_utf8_lossy(&out).into_owned())
            }
        }
    }
}

impl OutputEmitter for TopicsListEmitter {
    fn open(&mut self) -> Result<(), EmitterError> {
        self.target.open()
    }

    fn detected_type(&mut self, _detected: &DetectedType) -> Result<(), EmitterError> {
        Ok(())
    }

    fn detected_topic(&mut self, detected: &DetectedTopic) -> Result<(), EmitterError> {
        self.topics.insert(
            detected.name().to_string(),
            detected.detected_type().fqname().to_string(),
        );
        Ok(())
    }

    fn close(&mut self, _types: &[DetectedType], _topics: &[DetectedTopic]) -> Result<(), EmitterError> {
        let rendered = self.render()?;
        self.target.write(&rendered)?;
        self.target.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn foo() -> DetectedType {
        DetectedType::new("pkg::msg::Foo", "struct pkg::msg::Foo {\n  pkg::msg::Bar b;\n};").unwrap()
    }

    fn bar() -> DetectedType {
        DetectedType::new("pkg::msg::Bar", "struct pkg::msg::Bar {\n  long x;\n};").unwrap()
    }

    fn topic(name: &str, ty: &DetectedType) -> DetectedTopic {
        DetectedTopic::new(name, ty.fqname(), ty.idl()).unwrap()
    }

    fn to_file(path: &Path) -> FileOptions {
        FileOptions {
            output: Some(path.to_path_buf()),
            ..Default::default()
        }
    }

    struct Recorder {
        tag: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl OutputEmitter for Recorder {
        fn open(&mut self) -> Result<(), EmitterError> {
            self.log.borrow_mut().push(format!("{} open", self.tag));
            Ok(())
        }

        fn detected_type(&mut self, detected: &DetectedType) -> Result<(), EmitterError> {
            self.log
                .borrow_mut()
                .push(format!("{} type {}", self.tag, detected));
            Ok(())
        }

        fn detected_topic(&mut self, detected: &DetectedTopic) -> Result<(), EmitterError> {
            self.log
                .borrow_mut()
                .push(format!("{} topic {}", self.tag, detected));
            Ok(())
        }

        fn close(&mut self, types: &[DetectedType], topics: &[DetectedTopic]) -> Result<(), EmitterError> {
            self.log.borrow_mut().push(format!(
                "{} close {} {}",
                self.tag,
                types.len(),
                topics.len()
            ));
            Ok(())
        }
    }

    #[test]
    fn test_combined_fan_out_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut combined = CombinedEmitter::new()
            .with(Recorder {
                tag: "a",
                log: Rc::clone(&log),
            })
            .with(Recorder {
                tag: "b",
                log: Rc::clone(&log),
            });
        assert_eq!(combined.len(), 2);

        let t = foo();
        combined.open().unwrap();
        combined.detected_type(&t).unwrap();
        combined.detected_topic(&topic("rt/foo", &t)).unwrap();
        combined.close(&[t.clone()], &[]).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                "a open",
                "b open",
                "a type pkg::msg::Foo",
                "b type pkg::msg::Foo",
                "a topic rt/foo",
                "b topic rt/foo",
                "a close 1 0",
                "b close 1 0",
            ]
        );
    }

    #[test]
    fn test_idl_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("types.idl");
        let mut emitter = IdlEmitter::new(to_file(&path), IdlOptions::default());

        emitter.open().unwrap();
        emitter.detected_type(&bar()).unwrap();
        emitter.detected_topic(&topic("rt/bar", &bar())).unwrap();
        emitter.close(&[], &[]).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("module pkg {\n"));
        assert!(written.ends_with("// pkg::msg::Bar @ \"rt/bar\"\n"));
        assert!(!written.contains("#include"));
    }

    #[test]
    fn test_refuses_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("types.idl");
        fs::write(&path, "old\n").unwrap();

        let mut emitter = IdlEmitter::new(to_file(&path), IdlOptions::default());
        assert!(matches!(
            emitter.open(),
            Err(EmitterError::AlreadyExists { kind: "file", .. })
        ));

        let mut emitter = ListEmitter::new(
            FileOptions {
                append: true,
                ..to_file(&path)
            },
            false,
        );
        emitter.open().unwrap();
        emitter.detected_type(&bar()).unwrap();
        emitter.close(&[], &[]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "old\npkg::msg::Bar\n");

        let mut emitter = ListEmitter::new(
            FileOptions {
                overwrite: true,
                ..to_file(&path)
            },
            false,
        );
        emitter.open().unwrap();
        emitter.detected_type(&foo()).unwrap();
        emitter.close(&[], &[]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "pkg::msg::Foo\n");
    }

    #[test]
    fn test_idl_split_hierarchical() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("idl");
        let mut emitter = IdlEmitter::new(
            FileOptions {
                output: Some(base.clone()),
                split: true,
                ..Default::default()
            },
            IdlOptions::default(),
        );

        emitter.open().unwrap();
        emitter.detected_type(&foo()).unwrap();
        // Re-detection rewrites a file this run created.
        emitter.detected_type(&foo()).unwrap();
        emitter.close(&[], &[]).unwrap();

        let written = fs::read_to_string(base.join("pkg/msg/Foo.idl")).unwrap();
        assert!(written.starts_with(
            "#ifndef pkg_msg_Bar\n#define pkg_msg_Bar\n#include \"pkg/msg/Bar.idl\"\n#endif  // pkg_msg_Bar\n"
        ));
    }

    #[test]
    fn test_idl_split_flat() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("idl");
        let mut emitter = IdlEmitter::new(
            FileOptions {
                output: Some(base.clone()),
                split: true,
                flat: true,
                ..Default::default()
            },
            IdlOptions::default(),
        );

        emitter.open().unwrap();
        emitter.detected_type(&foo()).unwrap();
        emitter.close(&[], &[]).unwrap();

        let written = fs::read_to_string(base.join("pkg_msg_Foo.idl")).unwrap();
        assert!(written.contains("#include \"pkg_msg_Bar.idl\""));
    }

    #[test]
    fn test_split_refuses_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut emitter = IdlEmitter::new(
            FileOptions {
                output: Some(dir.path().to_path_buf()),
                split: true,
                ..Default::default()
            },
            IdlOptions::default(),
        );
        assert!(matches!(
            emitter.open(),
            Err(EmitterError::AlreadyExists {
                kind: "directory",
                ..
            })
        ));
    }

    #[test]
    fn test_idl_fix_on_unparsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("types.idl");
        let raw = DetectedType::new("a::U", "union a::U switch (long) {\n\n  case 1: long x;\n};").unwrap();
        let mut emitter = IdlEmitter::new(to_file(&path), IdlOptions::default()).with_fix(true);

        emitter.open().unwrap();
        emitter.detected_type(&raw).unwrap();
        emitter.close(&[], &[]).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "union a::U switch (long) {\ncase 1: long x;\n};\n"
        );
    }

    #[test]
    fn test_list_topics_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.txt");
        let mut emitter = ListEmitter::new(to_file(&path), true);

        emitter.open().unwrap();
        emitter.detected_type(&bar()).unwrap();
        emitter.detected_topic(&topic("rt/bar", &bar())).unwrap();
        emitter.close(&[], &[]).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "pkg::msg::Bar@rt/bar\n");
    }

    #[test]
    fn test_topics_list_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topics.json");
        let mut emitter = TopicsListEmitter::new(to_file(&path), TopicsFormat::Json { indent: Some(2) });

        emitter.open().unwrap();
        emitter.detected_topic(&topic("rt/z", &bar())).unwrap();
        emitter.detected_topic(&topic("rt/a", &bar())).unwrap();
        emitter.detected_topic(&topic("rt/z", &foo())).unwrap();
        emitter.close(&[], &[]).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "{\n  \"rt/a\": \"pkg::msg::Bar\",\n  \"rt/z\": \"pkg::msg::Foo\"\n}\n"
        );
    }

    #[test]
    fn test_topics_list_compact_and_yaml() {
        let mut emitter = TopicsListEmitter::new(FileOptions::default(), TopicsFormat::Json { indent: None });
        emitter.detected_topic(&topic("rt/b", &bar())).unwrap();
        assert_eq!(emitter.render().unwrap(), "{\"rt/b\":\"pkg::msg::Bar\"}");

        let mut emitter = TopicsListEmitter::new(FileOptions::default(), TopicsFormat::Yaml);
        emitter.detected_topic(&topic("rt/b", &bar())).unwrap();
        assert!(emitter.render().unwrap().starts_with("rt/b: "));
    }
}
