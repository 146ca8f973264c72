//! Line-level scanning of decompiled text: gap markers, definition headers
//! and `pass`-only bodies.
//!
//! Marker scanning is plain text and works on output that does not parse.
//! `pass`-only detection needs a clean parse.

use std::sync::LazyLock;

use regex::Regex;
use tree_sitter::Node;

use crate::guards::MARKER_LOOKAHEAD_LINES;
use crate::source::syntax::{check_syntax, node_text};

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)(?:async\s+)?(def|class)\s+(\w+)").unwrap());

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemKind {
    Function,
    Class,
}

impl ItemKind {
    pub fn label(&self) -> &'static str {
        match self {
            ItemKind::Function => "function",
            ItemKind::Class => "class",
        }
    }
}

/// A `def`/`class` located in decompiled text. Line numbers are 0-based;
/// `end_line` is exclusive and already covers a trailing gap marker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Definition {
    pub name: String,
    pub kind: ItemKind,
    pub start_line: usize,
    pub end_line: usize,
    pub indent: usize,
    pub enclosing_class: Option<String>,
    /// Header text up to (not including) the closing colon.
    pub header: String,
    pub bases: Vec<String>,
    pub marker_flagged: bool,
    /// Body is exactly the configured stub placeholder.
    pub placeholder_body: bool,
}

impl Definition {
    pub fn contains(&self, other: &Definition) -> bool {
        self.start_line <= other.start_line && other.end_line <= self.end_line
    }
}

pub fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

pub fn count_markers(source: &str, marker: &str) -> usize {
    source.matches(marker).count()
}

/// Extend a block end over a gap marker that trails it.
///
/// Blank and comment lines between the block and the marker are taken
/// along; without a marker `start` is returned unchanged.
pub fn find_marker_end(lines: &[&str], start: usize, marker: &str) -> usize {
    for (idx, line) in lines.iter().enumerate().skip(start) {
        let trimmed = line.trim();
        if trimmed.contains(marker) {
            return idx + 1;
        }
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            break;
        }
    }
    start
}

/// Exclusive end of the indented block opened at `header`.
pub fn block_end(lines: &[&str], header: usize) -> usize {
    let base = lines.get(header).map_or(0, |l| indent_of(l));
    let mut last = header;
    for (idx, line) in lines.iter().enumerate().skip(header + 1) {
        if line.trim().is_empty() {
            continue;
        }
        if indent_of(line) <= base {
            break;
        }
        last = idx;
    }
    last + 1
}

/// Header text up to the colon that opens the body.
pub fn header_text(line: &str) -> String {
    let trimmed = line.trim();
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    for (idx, ch) in trimmed.char_indices() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ':' if depth == 0 => return trimmed[..idx].trim_end().to_string(),
            _ => {}
        }
    }
    trimmed.trim_end_matches(':').to_string()
}

/// Positional base expressions of a class header, keyword arguments skipped.
pub fn header_bases(header: &str) -> Vec<String> {
    let (Some(open), Some(close)) = (header.find('('), header.rfind(')')) else {
        return Vec::new();
    };
    if close <= open {
        return Vec::new();
    }
    let mut bases = Vec::new();
    let mut depth = 0;
    let mut current = String::new();
    for ch in header[open + 1..close].chars() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                bases.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    bases.push(current);
    bases
        .into_iter()
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty() && !b.contains('='))
        .collect()
}

/// Name of the class whose body directly holds the line at `header`.
fn enclosing_class_by_indent(lines: &[&str], header: usize) -> Option<String> {
    let own = indent_of(lines[header]);
    if own == 0 {
        return None;
    }
    for line in lines[..header].iter().rev() {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        if indent_of(line) < own {
            let caps = HEADER_RE.captures(line)?;
            return (&caps[2] == "class").then(|| caps[3].to_string());
        }
    }
    None
}

fn is_placeholder_line(line: &str, placeholder: &str) -> bool {
    !placeholder.is_empty() && line.trim() == placeholder.trim()
}

/// Definitions whose header is followed by a gap marker within the next
/// few lines. Each marker belongs to the closest header above it.
pub fn flagged_definitions(source: &str, marker: &str) -> Vec<Definition> {
    let lines: Vec<&str> = source.lines().collect();
    let mut found: Vec<Definition> = Vec::new();

    for (marker_line, line) in lines.iter().enumerate() {
        if !line.contains(marker) {
            continue;
        }
        let lowest = marker_line.saturating_sub(MARKER_LOOKAHEAD_LINES);
        let Some((header, caps)) = (lowest..marker_line)
            .rev()
            .find_map(|idx| HEADER_RE.captures(lines[idx]).map(|c| (idx, c)))
        else {
            continue;
        };
        if found.iter().any(|d| d.start_line == header) {
            continue;
        }
        let kind = if &caps[2] == "class" {
            ItemKind::Class
        } else {
            ItemKind::Function
        };
        let text = header_text(lines[header]);
        let end = block_end(&lines, header).max(marker_line + 1);
        found.push(Definition {
            name: caps[3].to_string(),
            kind,
            start_line: header,
            end_line: find_marker_end(&lines, end, marker),
            indent: caps[1].len(),
            enclosing_class: enclosing_class_by_indent(&lines, header),
            bases: if kind == ItemKind::Class {
                header_bases(&text)
            } else {
                Vec::new()
            },
            header: text,
            marker_flagged: true,
            placeholder_body: false,
        });
    }
    found
}

/// Every definition whose body is a single `pass`, at any depth.
/// Empty when the source does not parse.
pub fn pass_only_definitions(source: &str, marker: &str, placeholder: &str) -> Vec<Definition> {
    let Ok(tree) = check_syntax(source) else {
        return Vec::new();
    };
    let lines: Vec<&str> = source.lines().collect();
    let mut found = Vec::new();
    let mut stack = vec![tree.root_node()];
    while let Some(node) = stack.pop() {
        if matches!(node.kind(), "function_definition" | "class_definition") {
            if let Some(def) = pass_only(node, source, &lines, marker, placeholder) {
                found.push(def);
            }
        }
        let mut cursor = node.walk();
        stack.extend(node.named_children(&mut cursor));
    }
    found.sort_by_key(|d| d.start_line);
    found
}

fn pass_only(
    node: Node<'_>,
    source: &str,
    lines: &[&str],
    marker: &str,
    placeholder: &str,
) -> Option<Definition> {
    let body = node.child_by_field_name("body")?;
    let mut cursor = body.walk();
    let statements: Vec<Node<'_>> = body
        .named_children(&mut cursor)
        .filter(|n| n.kind() != "comment")
        .collect();
    let [only] = statements.as_slice() else {
        return None;
    };
    if only.kind() != "pass_statement" {
        return None;
    }

    let kind = if node.kind() == "class_definition" {
        ItemKind::Class
    } else {
        ItemKind::Function
    };
    let name = node_text(node.child_by_field_name("name")?, source).to_string();
    let start = node.start_position().row;
    let end = node.end_position().row + 1;
    let header = header_text(lines.get(start).copied().unwrap_or_default());
    let bases = match node.child_by_field_name("superclasses") {
        Some(args) => {
            let mut cursor = args.walk();
            let bases: Vec<String> = args
                .named_children(&mut cursor)
                .filter(|a| a.kind() != "keyword_argument" && a.kind() != "comment")
                .map(|a| node_text(a, source).to_string())
                .collect();
            bases
        }
        None => Vec::new(),
    };
    let pass_row = only.start_position().row;

    Some(Definition {
        name,
        kind,
        start_line: start,
        end_line: find_marker_end(lines, end, marker),
        indent: indent_of(lines.get(start).copied().unwrap_or_default()),
        enclosing_class: enclosing_class(node, source),
        header,
        bases,
        marker_flagged: false,
        placeholder_body: pass_row != start
            && lines
                .get(pass_row)
                .is_some_and(|l| is_placeholder_line(l, placeholder)),
    })
}

/// Class whose body directly contains `node` (through a decorator if any).
fn enclosing_class(node: Node<'_>, source: &str) -> Option<String> {
    let mut parent = node.parent()?;
    if parent.kind() == "decorated_definition" {
        parent = parent.parent()?;
    }
    if parent.kind() != "block" {
        return None;
    }
    let owner = parent.parent()?;
    if owner.kind() != "class_definition" {
        return None;
    }
    Some(node_text(owner.child_by_field_name("name")?, source).to_string())
}

/// Up to `limit` import lines, used as prompt context.
pub fn import_context(source: &str, limit: usize) -> String {
    source
        .lines()
        .filter(|l| {
            let t = l.trim_start();
            t.starts_with("import ") || t.starts_with("from ")
        })
        .take(limit)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards::GAP_MARKER;

    const PLACEHOLDER: &str = "pass  # TODO: Reconstruct";

    #[test]
    fn test_find_marker_end() {
        let lines = vec!["def f():", "    pass", "", "# WARNING: Decompyle incomplete", "x = 1"];
        assert_eq!(find_marker_end(&lines, 2, GAP_MARKER), 4);
        assert_eq!(find_marker_end(&lines, 4, GAP_MARKER), 4);
        let lines = vec!["def f():", "    pass", "", "y = 2"];
        assert_eq!(find_marker_end(&lines, 2, GAP_MARKER), 2);
    }

    #[test]
    fn test_header_text_and_bases() {
        assert_eq!(header_text("    def f(a, b=lambda: 1) -> int:  # c"), "def f(a, b=lambda: 1) -> int");
        assert_eq!(header_text("def g(x): return x"), "def g(x)");
        let header = header_text("class Mixer(Base, mixins.Sends, metaclass=Meta):");
        assert_eq!(header_bases(&header), vec!["Base", "mixins.Sends"]);
        assert!(header_bases("class Plain").is_empty());
    }

    #[test]
    fn test_flagged_definition_claims_closest_header() {
        let source = "\
class Mixer(Base):
    def update(self):
        pass
    # WARNING: Decompyle incomplete

    def reset(self):
        self.level = 0
";
        let defs = flagged_definitions(source, GAP_MARKER);
        assert_eq!(defs.len(), 1);
        let def = &defs[0];
        assert_eq!(def.name, "update");
        assert_eq!(def.kind, ItemKind::Function);
        assert_eq!((def.start_line, def.end_line), (1, 4));
        assert_eq!(def.indent, 4);
        assert_eq!(def.enclosing_class.as_deref(), Some("Mixer"));
        assert_eq!(def.header, "def update(self)");
    }

    #[test]
    fn test_flagged_definitions_on_invalid_text() {
        let source = "class Broken(ControlSurface):\n# WARNING: Decompyle incomplete\n";
        let defs = flagged_definitions(source, GAP_MARKER);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].kind, ItemKind::Class);
        assert_eq!(defs[0].bases, vec!["ControlSurface"]);
        assert_eq!(defs[0].end_line, 2);
    }

    #[test]
    fn test_pass_only_definitions() {
        let source = "\
class Empty(Base):
    pass

class Device:
    @property
    def name(self):
        pass

    def connect(self, port):
        pass  # TODO: Reconstruct

    def ready(self):
        return True

def helper():
    pass
# WARNING: Decompyle incomplete
";
        let defs = pass_only_definitions(source, GAP_MARKER, PLACEHOLDER);
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Empty", "name", "connect", "helper"]);
        assert_eq!(defs[0].bases, vec!["Base"]);
        assert_eq!(defs[1].enclosing_class.as_deref(), Some("Device"));
        assert!(!defs[1].placeholder_body);
        assert!(defs[2].placeholder_body);
        assert_eq!(defs[3].enclosing_class, None);
        assert_eq!((defs[3].start_line, defs[3].end_line), (14, 17));
    }

    #[test]
    fn test_pass_only_requires_valid_source() {
        assert!(pass_only_definitions("def f(:\n    pass\n", GAP_MARKER, PLACEHOLDER).is_empty());
    }

    #[test]
    fn test_import_context() {
        let source = "import os\nfrom a import b\nx = 1\n    import json\n";
        assert_eq!(import_context(source, 2), "import os\nfrom a import b");
        assert_eq!(import_context(source, 20).lines().count(), 3);
    }
}
