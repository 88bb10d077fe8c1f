// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Text-level fixes for generated IDL.
//!
//! Passes, applied in order by [`fix_idl`]:
//! 1. drop empty lines
//! 2. wrap bare `#include` directives in include guards
//! 3. inline primitive array typedefs (`typedef long long__3[3];`)
//! 4. drop `@verbatim(language="comment", ...)` annotations
//! 5. rename members that collide with IDL keywords

use regex::Regex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Member names that are reserved words in IDL.
pub const RESERVED_MEMBER_NAMES: &[&str] = &["sequence", "struct"];

#[allow(clippy::expect_used)] // static patterns
fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid static regex"))
}

fn array_typedef_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"^[ ]*typedef ([a-z][a-z0-9]*) ([a-z][a-z0-9]*)__([1-9][0-9]*)\[([1-9][0-9]*)\];",
    )
}

fn array_member_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^([ ]*)([a-z][a-z0-9]*__[1-9][0-9]*) ([a-z_][a-z0-9_]*);")
}

fn comment_res() -> [&'static Regex; 3] {
    static START: OnceLock<Regex> = OnceLock::new();
    static BODY: OnceLock<Regex> = OnceLock::new();
    static END: OnceLock<Regex> = OnceLock::new();
    [
        regex(&START, r#"^[ ]*@verbatim[ ]*\(language="comment", text="#),
        regex(&BODY, r#"^[ ]*"(.*)" "\\n""#),
        regex(&END, r#"^[ ]*"(.*)"\)"#),
    ]
}

fn member_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^([ ]*)([^ ]*) ([^;]*);")
}

/// Apply every fix pass to `idl`.
///
/// The result has one `\n`-terminated line per retained input line.
pub fn fix_idl(idl: &str) -> String {
    let lines = remove_empty_lines(idl.lines());
    let lines = fix_includes(lines);
    let lines = fix_primitive_array_typedefs(lines);
    let lines = remove_comments(lines);
    let lines = fix_invalid_member_names(lines);

    let mut out = String::new();
    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn remove_empty_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<String> {
    lines
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Guard every `#include "a/b.idl"` not already inside `#ifndef`/`#endif`.
fn fix_includes(lines: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut in_guard = false;

    for line in lines {
        if line.starts_with("#ifndef ") {
            in_guard = true;
            out.push(line);
            continue;
        }
        if line.starts_with("#endif") {
            in_guard = false;
            out.push(line);
            continue;
        }
        if !line.starts_with("#include") || in_guard {
            out.push(line);
            continue;
        }

        let Some(included) = line
            .split_once('"')
            .and_then(|(_, rest)| rest.split_once('"'))
            .map(|(path, _)| path)
        else {
            out.push(line);
            continue;
        };
        let guard = format!(
            "{}_",
            included.strip_suffix(".idl").unwrap_or(included).replace('/', "_")
        );
        out.push(format!("#ifndef {}", guard));
        out.push(format!("#define {}", guard));
        out.push(line.clone());
        out.push(format!("#endif  // {}", guard));
    }
    out
}

/// Replace `typedef T T__N[N];` aliases with inline `T name[N];` members.
fn fix_primitive_array_typedefs(lines: Vec<String>) -> Vec<String> {
    let mut typedefs: HashMap<String, (String, String)> = HashMap::new();
    let mut out = Vec::with_capacity(lines.len());

    for line in lines {
        if let Some(caps) = array_typedef_re().captures(&line) {
            let prim = caps[2].to_string();
            let len = caps[3].to_string();
            typedefs
                .entry(format!("{}__{}", prim, len))
                .or_insert((prim, len));
            continue;
        }

        let replaced = array_member_re().captures(&line).and_then(|caps| {
            typedefs
                .get(&caps[2])
                .map(|(prim, len)| format!("{}{} {}[{}];", &caps[1], prim, &caps[3], len))
        });
        out.push(replaced.unwrap_or(line));
    }
    out
}

fn remove_comments(lines: Vec<String>) -> Vec<String> {
    let res = comment_res();
    lines
        .into_iter()
        .filter(|line| !res.iter().any(|re| re.is_match(line)))
        .collect()
}

fn fix_invalid_member_names(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .map(|line| {
            let fixed = member_re().captures(&line).and_then(|caps| {
                RESERVED_MEMBER_NAMES
                    .contains(&&caps[3])
                    .then(|| format!("{}{} {}_;", &caps[1], &caps[2], &caps[3]))
            });
            fixed.unwrap_or(line)
        })
        .collect()
}

/// Rename a single `type name` member declaration whose name is reserved.
pub fn fix_member_declaration(member: &str) -> Cow<'_, str> {
    match member.rsplit_once(char::is_whitespace) {
        Some((ty, name)) if RESERVED_MEMBER_NAMES.contains(&name) => {
            Cow::Owned(format!("{} {}_", ty.trim_end(), name))
        }
        _ => Cow::Borrowed(member),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_empty_lines() {
        assert_eq!(fix_idl("a\n\n  \n  b  \n"), "a\nb\n");
    }

    #[test]
    fn test_guards_bare_includes() {
        let fixed = fix_idl("#include \"std_msgs/msg/Header.idl\"\nstruct X {};");
        assert_eq!(
            fixed,
            "#ifndef std_msgs_msg_Header_\n\
             #define std_msgs_msg_Header_\n\
             #include \"std_msgs/msg/Header.idl\"\n\
             #endif  // std_msgs_msg_Header_\n\
             struct X {};\n"
        );
    }

    #[test]
    fn test_keeps_guarded_includes() {
        let input = "#ifndef A_\n#define A_\n#include \"A.idl\"\n#endif  // A_\n";
        assert_eq!(fix_idl(input), input);
    }

    #[test]
    fn test_inlines_primitive_array_typedefs() {
        let input = "typedef double double__9[9];\nstruct C {\n  double__9 covariance;\n};";
        assert_eq!(fix_idl(input), "struct C {\ndouble covariance[9];\n};\n");
    }

    #[test]
    fn test_removes_verbatim_comments() {
        let input = "@verbatim (language=\"comment\", text=\n\"Some text\" \"\\n\"\n\"end\")\nstruct S {};";
        assert_eq!(fix_idl(input), "struct S {};\n");
    }

    #[test]
    fn test_renames_reserved_member_names() {
        assert_eq!(fix_idl("  long sequence;"), "long sequence_;\n");
        assert_eq!(fix_idl("long value;"), "long value;\n");
    }

    #[test]
    fn test_fix_member_declaration() {
        assert_eq!(fix_member_declaration("uint32 struct"), "uint32 struct_");
        assert_eq!(fix_member_declaration("long x"), "long x");
        assert!(matches!(fix_member_declaration("long x"), Cow::Borrowed(_)));
    }
}
