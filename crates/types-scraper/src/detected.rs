// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Detected types and topics.
//!
//! A [`DetectedType`] is built from the IDL text `types_scraper_cpp` prints
//! for one type. Only the shape the scraper emits is understood:
//!
//! ```text
//! @annotation(...)
//! struct pkg::msg::Foo {
//!     long x;
//!     sequence<pkg::msg::Bar, 10> bars;
//! };
//! ```
//!
//! Anything else is kept as an unparsed pass-through record and re-emitted
//! verbatim by [`DetectedType::to_idl`].

use crate::idl_fix::fix_member_declaration;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;
use thiserror::Error;

/// Separator between scoped name segments.
pub const SCOPE_SEPARATOR: &str = "::";

/// Bound printed for unbounded strings and sequences.
pub const UNBOUNDED_SENTINEL: &str = "2147483647";

/// Type model errors.
#[derive(Debug, Error)]
pub enum TypeError {
    #[error("Invalid detection record: {0}")]
    Record(#[from] serde_json::Error),

    #[error("Parsed type name '{parsed}' does not match '{expected}'")]
    IdentityMismatch { expected: String, parsed: String },
}

/// Text does not have the declaration shape the parser understands.
#[derive(Debug, Error)]
#[error("unsupported type declaration: {0}")]
struct UnsupportedType(&'static str);

/// Persisted form of a detected type.
///
/// Only `fqname` and `idl` are needed to rebuild a type; the other fields
/// are derived from `idl` on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRecord {
    pub fqname: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub annotations: Vec<String>,
    #[serde(default)]
    pub parsed: bool,
    pub idl: String,
}

/// Persisted form of a detected topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRecord {
    pub name: String,
    pub type_name: String,
    pub idl: String,
}

/// Options for [`DetectedType::to_idl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlOptions {
    /// Indent generated lines.
    pub indent: bool,
    /// Base indentation level added to every line.
    pub indent_depth: usize,
    /// Spaces per indentation level.
    pub indent_step: usize,
    /// Prepend a guarded `#include` for every referenced type.
    pub add_includes: bool,
    /// Include `a_b_C.idl` instead of `a/b/C.idl`.
    pub flat_includes: bool,
}

impl Default for IdlOptions {
    fn default() -> Self {
        Self {
            indent: true,
            indent_depth: 0,
            indent_step: 2,
            add_includes: false,
            flat_includes: false,
        }
    }
}

/// A type declaration reported by the scraper.
///
/// Equality, hashing and ordering only consider the fully-qualified name.
#[derive(Debug, Clone)]
pub struct DetectedType {
    fqname: String,
    name: String,
    modules: Vec<String>,
    members: Vec<String>,
    annotations: Vec<String>,
    parsed: bool,
    idl: String,
}

struct ParsedDecl {
    name: String,
    modules: Vec<String>,
    members: Vec<String>,
    annotations: Vec<String>,
}

#[allow(clippy::expect_used)] // static pattern
fn decl_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^([^\n]*?)\b(?:struct|valuetype)\s+").expect("valid static regex")
    })
}

fn normalize_unbounded(idl: &str) -> String {
    idl.replace(&format!("<{}>", UNBOUNDED_SENTINEL), "")
        .replace(&format!(",{}>", UNBOUNDED_SENTINEL), ">")
}

/// Drop an inheritance clause (`Derived : Base`) from a declared name.
fn strip_base_clause(declared: &str) -> &str {
    let bytes = declared.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b':' {
            if bytes.get(i + 1) == Some(&b':') {
                i += 2;
                continue;
            }
            return declared[..i].trim_end();
        }
        i += 1;
    }
    declared
}

fn parse_declaration(idl: &str) -> Result<ParsedDecl, UnsupportedType> {
    let idl = normalize_unbounded(idl);

    let caps = decl_start_re()
        .captures(&idl)
        .ok_or(UnsupportedType("no struct or valuetype declaration"))?;
    let (Some(whole), Some(prefix)) = (caps.get(0), caps.get(1)) else {
        return Err(UnsupportedType("no struct or valuetype declaration"));
    };

    let leading = format!("{}{}", &idl[..whole.start()], prefix.as_str());
    let annotations = leading
        .replace('\n', " ")
        .split('@')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect();

    let remaining = &idl[whole.end()..];
    let brace = remaining
        .find('{')
        .ok_or(UnsupportedType("missing opening brace"))?;
    let declared = strip_base_clause(remaining[..brace].trim());
    if declared.is_empty() {
        return Err(UnsupportedType("missing type name"));
    }

    let body = &remaining[brace + 1..];
    let body_end = body
        .find("};")
        .ok_or(UnsupportedType("missing closing brace"))?;
    let members = body[..body_end]
        .replace('\n', " ")
        .split(';')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();

    let mut segments: Vec<String> = declared
        .split(SCOPE_SEPARATOR)
        .map(|s| s.trim().to_string())
        .collect();
    let name = segments.pop().unwrap_or_default();

    Ok(ParsedDecl {
        name,
        modules: segments,
        members,
        annotations,
    })
}

/// Type of a `[@annotation...] type name` member declaration.
fn member_type(member: &str) -> &str {
    let member = strip_member_annotations(member);
    member
        .rsplit_once(char::is_whitespace)
        .map_or(member, |(ty, _)| ty.trim())
}

/// Drop leading `@name` / `@name(...)` annotations.
fn strip_member_annotations(member: &str) -> &str {
    let mut rest = member.trim();
    while let Some(after) = rest.strip_prefix('@') {
        let end = after
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == ':'))
            .unwrap_or(after.len());
        let mut tail = after[end..].trim_start();
        if tail.starts_with('(') {
            let mut depth = 0usize;
            let mut close = tail.len();
            for (i, c) in tail.char_indices() {
                match c {
                    '(' => depth += 1,
                    ')' => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            close = i + 1;
                            break;
                        }
                    }
                    _ => {}
                }
            }
            tail = &tail[close..];
        }
        rest = tail.trim_start();
    }
    rest
}

/// Remove a trailing top-level `,bound` from a template argument list.
fn strip_bound(args: &str) -> &str {
    let mut depth = 0usize;
    let mut split = None;
    for (i, c) in args.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => split = Some(i),
            _ => {}
        }
    }
    split.map_or(args, |i| &args[..i]).trim()
}

/// Innermost element type of (possibly nested) sequence types.
fn innermost_type(ty: &str) -> &str {
    let mut current = ty.trim();
    while let Some(args) = current
        .strip_prefix("sequence<")
        .and_then(|rest| rest.strip_suffix('>'))
    {
        current = strip_bound(args);
    }
    current
}

/// Include guard macro for a referenced type.
pub fn include_guard(fqname: &str) -> String {
    fqname.replace(SCOPE_SEPARATOR, "_")
}

/// File path (without extension) for a type, flat or hierarchical.
pub fn type_path(fqname: &str, flat: bool) -> String {
    fqname.replace(SCOPE_SEPARATOR, if flat { "_" } else { "/" })
}

impl DetectedType {
    /// Build a type from its fully-qualified name and IDL text.
    ///
    /// Text the parser does not understand yields an unparsed record. The
    /// only error is a declared name that disagrees with `fqname`.
    pub fn new(fqname: impl Into<String>, idl: impl Into<String>) -> Result<Self, TypeError> {
        let fqname = fqname.into();
        let idl = idl.into();

        match parse_declaration(&idl) {
            Ok(decl) => {
                let parsed = decl
                    .modules
                    .iter()
                    .map(String::as_str)
                    .chain(std::iter::once(decl.name.as_str()))
                    .collect::<Vec<_>>()
                    .join(SCOPE_SEPARATOR);
                if parsed != fqname {
                    return Err(TypeError::IdentityMismatch {
                        expected: fqname,
                        parsed,
                    });
                }
                Ok(Self {
                    fqname,
                    name: decl.name,
                    modules: decl.modules,
                    members: decl.members,
                    annotations: decl.annotations,
                    parsed: true,
                    idl,
                })
            }
            Err(unsupported) => {
                tracing::debug!(fqname = %fqname, "{}", unsupported);
                Ok(Self {
                    name: fqname.clone(),
                    fqname,
                    modules: Vec::new(),
                    members: Vec::new(),
                    annotations: Vec::new(),
                    parsed: false,
                    idl,
                })
            }
        }
    }

    /// Build a type from a JSON record (scraper output or saved record).
    pub fn from_json(json: &str) -> Result<Self, TypeError> {
        let record: TypeRecord = serde_json::from_str(json)?;
        Self::from_record(record)
    }

    /// Build a type from a persisted record, re-deriving its structure.
    pub fn from_record(record: TypeRecord) -> Result<Self, TypeError> {
        Self::new(record.fqname, record.idl)
    }

    /// Fully-qualified name (`pkg::msg::Foo`).
    pub fn fqname(&self) -> &str {
        &self.fqname
    }

    /// Simple name (`Foo`), or the fully-qualified name if unparsed.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enclosing modules, outermost first.
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    /// Raw member declarations (`type name`).
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Annotation fragments, without the leading `@`.
    pub fn annotations(&self) -> &[String] {
        &self.annotations
    }

    /// Whether the IDL text was understood.
    pub fn is_parsed(&self) -> bool {
        self.parsed
    }

    /// Raw IDL text as reported.
    pub fn idl(&self) -> &str {
        &self.idl
    }

    /// Scoped type names this declaration depends on, in member order.
    pub fn references(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|m| innermost_type(member_type(m)))
            .filter(|ty| ty.contains(SCOPE_SEPARATOR))
            .map(str::to_string)
            .collect()
    }

    /// Output file path for this type (without extension).
    pub fn path(&self, flat: bool) -> String {
        type_path(&self.fqname, flat)
    }

    /// Persisted record for this type.
    pub fn to_record(&self) -> TypeRecord {
        TypeRecord {
            fqname: self.fqname.clone(),
            name: self.name.clone(),
            modules: self.modules.clone(),
            members: self.members.clone(),
            annotations: self.annotations.clone(),
            parsed: self.parsed,
            idl: self.idl.clone(),
        }
    }

    /// Persisted record as indented JSON.
    pub fn to_json(&self) -> Result<String, TypeError> {
        Ok(serde_json::to_string_pretty(&self.to_record())?)
    }

    /// Regenerate IDL for this type.
    ///
    /// Unparsed types return their raw text.
    pub fn to_idl(&self, options: &IdlOptions) -> String {
        if !self.parsed {
            return self.idl.clone();
        }

        let step = " ".repeat(options.indent_step);
        let mut out = String::new();
        let mut line = |level: usize, text: &str| {
            if options.indent {
                for _ in 0..options.indent_depth + level {
                    out.push_str(&step);
                }
            }
            out.push_str(text);
            out.push('\n');
        };

        if options.add_includes {
            let mut seen = HashSet::new();
            for reference in self.references() {
                if reference == self.fqname || !seen.insert(reference.clone()) {
                    continue;
                }
                let guard = include_guard(&reference);
                let file = type_path(&reference, options.flat_includes);
                line(0, &format!("#ifndef {}", guard));
                line(0, &format!("#define {}", guard));
                line(0, &format!("#include \"{}.idl\"", file));
                line(0, &format!("#endif  // {}", guard));
            }
        }

        for (level, module) in self.modules.iter().enumerate() {
            line(level, &format!("module {} {{", module));
        }

        let depth = self.modules.len();
        line(depth, &format!("struct {} {{", self.name));
        for member in &self.members {
            line(depth + 1, &format!("{};", fix_member_declaration(member)));
        }
        line(depth, "};");

        for (level, module) in self.modules.iter().enumerate().rev() {
            line(level, &format!("}}; // module {}", module));
        }

        out
    }
}

impl PartialEq for DetectedType {
    fn eq(&self, other: &Self) -> bool {
        self.fqname == other.fqname
    }
}

impl Eq for DetectedType {}

impl Hash for DetectedType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fqname.hash(state);
    }
}

impl PartialOrd for DetectedType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DetectedType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fqname.cmp(&other.fqname)
    }
}

impl fmt::Display for DetectedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fqname)
    }
}

/// A topic and the type published on it.
///
/// Equality, hashing and ordering only consider the topic name.
#[derive(Debug, Clone)]
pub struct DetectedTopic {
    name: String,
    detected_type: DetectedType,
}

impl DetectedTopic {
    /// Build a topic from its name and its type's name and IDL.
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        idl: impl Into<String>,
    ) -> Result<Self, TypeError> {
        Ok(Self {
            name: name.into(),
            detected_type: DetectedType::new(type_name, idl)?,
        })
    }

    /// Build a topic from a JSON record.
    pub fn from_json(json: &str) -> Result<Self, TypeError> {
        let record: TopicRecord = serde_json::from_str(json)?;
        Self::new(record.name, record.type_name, record.idl)
    }

    /// Topic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type published on the topic.
    pub fn detected_type(&self) -> &DetectedType {
        &self.detected_type
    }

    /// Persisted record for this topic.
    pub fn to_record(&self) -> TopicRecord {
        TopicRecord {
            name: self.name.clone(),
            type_name: self.detected_type.fqname.clone(),
            idl: self.detected_type.idl.clone(),
        }
    }
}

impl PartialEq for DetectedTopic {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for DetectedTopic {}

impl Hash for DetectedTopic {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for DetectedTopic {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DetectedTopic {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Display for DetectedTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
