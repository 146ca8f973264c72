//! Syntax checks and module-level binding collection for decompiled text.
//!
//! Parsing goes through tree-sitter-python. Backends are never trusted to
//! emit valid source, so every outcome is re-checked here.

use std::cell::RefCell;
use std::collections::BTreeSet;

use pyo3::prelude::*;
use tree_sitter::{Node, Parser, Tree};

use crate::errors::{UnpycError, UnpycResult};

thread_local! {
    static PARSER: RefCell<Option<Parser>> = const { RefCell::new(None) };
}

/// Statement kinds whose bodies still execute in module scope.
const MODULE_SCOPE_COMPOUNDS: &[&str] = &[
    "if_statement",
    "elif_clause",
    "else_clause",
    "try_statement",
    "except_clause",
    "except_group_clause",
    "finally_clause",
    "with_statement",
    "for_statement",
    "while_statement",
    "block",
];

/// Parse Python source with the thread's cached parser.
pub fn parse_python(source: &str) -> Option<Tree> {
    PARSER.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            let mut parser = Parser::new();
            parser
                .set_language(&tree_sitter_python::LANGUAGE.into())
                .ok()?;
            *slot = Some(parser);
        }
        slot.as_mut()?.parse(source, None)
    })
}

pub fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// True when a block holds at least one statement (comments don't count).
fn block_has_statement(block: Node<'_>) -> bool {
    let mut cursor = block.walk();
    let found = block
        .named_children(&mut cursor)
        .any(|child| child.kind() != "comment");
    found
}

fn is_star_parameter(param: Node<'_>) -> bool {
    match param.kind() {
        "list_splat_pattern" | "dictionary_splat_pattern" | "keyword_separator" => true,
        // `*args: int` wraps the splat in a typed parameter.
        "typed_parameter" => param
            .named_child(0)
            .is_some_and(|inner| matches!(inner.kind(), "list_splat_pattern" | "dictionary_splat_pattern")),
        _ => false,
    }
}

/// A positional parameter without a default may not follow one with a
/// default until the first `*`.
fn parameter_order_problem(params: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = params.walk();
    let mut defaulted = false;
    for param in params.children(&mut cursor) {
        if is_star_parameter(param) || param.kind() == "*" {
            return None;
        }
        match param.kind() {
            "default_parameter" | "typed_default_parameter" => defaulted = true,
            "identifier" | "typed_parameter" | "tuple_pattern" if defaulted => return Some(param),
            _ => {}
        }
    }
    None
}

/// Positional arguments must precede keywords; nothing positional may
/// follow `**mapping`.
fn argument_order_problem(args: Node<'_>) -> Option<(Node<'_>, &'static str)> {
    let mut cursor = args.walk();
    let mut keyword = false;
    let mut double_star = false;
    for arg in args.named_children(&mut cursor) {
        match arg.kind() {
            "comment" => {}
            "keyword_argument" => keyword = true,
            "dictionary_splat" => double_star = true,
            "list_splat" if double_star => {
                return Some((arg, "iterable argument unpacking follows keyword argument unpacking"));
            }
            "list_splat" => {}
            _ if double_star => {
                return Some((arg, "positional argument follows keyword argument unpacking"));
            }
            _ if keyword => return Some((arg, "positional argument follows keyword argument")),
            _ => {}
        }
    }
    None
}

/// First problem in document order, as `(row, message)`.
fn first_problem(root: Node<'_>) -> Option<(usize, String)> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() {
            return Some((node.start_position().row, "invalid syntax".to_string()));
        }
        if node.is_missing() {
            return Some((node.start_position().row, format!("missing {}", node.kind())));
        }
        match node.kind() {
            "function_definition" | "class_definition" => {
                let has_body = node
                    .child_by_field_name("body")
                    .is_some_and(block_has_statement);
                if !has_body {
                    return Some((
                        node.start_position().row,
                        "expected an indented block".to_string(),
                    ));
                }
            }
            "block" if !block_has_statement(node) => {
                return Some((
                    node.start_position().row,
                    "expected an indented block".to_string(),
                ));
            }
            "parameters" | "lambda_parameters" => {
                if let Some(param) = parameter_order_problem(node) {
                    return Some((
                        param.start_position().row,
                        "non-default argument follows default argument".to_string(),
                    ));
                }
            }
            "argument_list" => {
                if let Some((arg, message)) = argument_order_problem(node) {
                    return Some((arg.start_position().row, message.to_string()));
                }
            }
            _ => {}
        }
        for i in (0..node.child_count()).rev() {
            if let Some(child) = node.child(i) {
                stack.push(child);
            }
        }
    }
    None
}

/// Parse and report the first error as `Line N: <message>`.
pub fn check_syntax(source: &str) -> UnpycResult<Tree> {
    let tree = parse_python(source)
        .ok_or_else(|| UnpycError::SyntaxInvalid("Line 1: parser unavailable".to_string()))?;
    match first_problem(tree.root_node()) {
        Some((row, message)) => Err(UnpycError::SyntaxInvalid(format!("Line {}: {message}", row + 1))),
        None => Ok(tree),
    }
}

pub fn is_valid(source: &str) -> bool {
    check_syntax(source).is_ok()
}

/// `(valid, error)` pair for Python callers.
#[pyfunction]
pub fn validate_syntax(source: &str) -> (bool, Option<String>) {
    match check_syntax(source) {
        Ok(_) => (true, None),
        Err(UnpycError::SyntaxInvalid(message)) => (false, Some(message)),
        Err(other) => (false, Some(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// Names bound at module level: class/def names, assignment and annotated
/// targets, plus every imported alias anywhere in the file. `None` when the
/// source does not parse.
pub fn top_level_bindings(source: &str) -> Option<BTreeSet<String>> {
    let tree = check_syntax(source).ok()?;
    let root = tree.root_node();
    let mut names = BTreeSet::new();
    collect_scope(root, source, &mut names);
    collect_imports(root, source, &mut names);
    Some(names)
}

fn collect_scope(scope: Node<'_>, source: &str, names: &mut BTreeSet<String>) {
    let mut cursor = scope.walk();
    for child in scope.named_children(&mut cursor) {
        match child.kind() {
            "function_definition" | "class_definition" => bind_definition(child, source, names),
            "decorated_definition" => {
                if let Some(def) = child.child_by_field_name("definition") {
                    bind_definition(def, source, names);
                }
            }
            "expression_statement" => {
                let mut inner = child.walk();
                for expr in child.named_children(&mut inner) {
                    if expr.kind() == "assignment" {
                        bind_assignment(expr, source, names);
                    }
                }
            }
            kind if MODULE_SCOPE_COMPOUNDS.contains(&kind) => collect_scope(child, source, names),
            _ => {}
        }
    }
}

fn bind_definition(def: Node<'_>, source: &str, names: &mut BTreeSet<String>) {
    if let Some(name) = def.child_by_field_name("name") {
        names.insert(node_text(name, source).to_string());
    }
}

/// `a = b = 1` nests the second assignment in `right`.
fn bind_assignment(assign: Node<'_>, source: &str, names: &mut BTreeSet<String>) {
    let mut current = Some(assign);
    while let Some(node) = current.filter(|n| n.kind() == "assignment") {
        if let Some(left) = node.child_by_field_name("left") {
            bind_target(left, source, names);
        }
        current = node.child_by_field_name("right");
    }
}

fn bind_target(target: Node<'_>, source: &str, names: &mut BTreeSet<String>) {
    match target.kind() {
        "identifier" => {
            names.insert(node_text(target, source).to_string());
        }
        "pattern_list" | "tuple_pattern" | "list_pattern" | "list_splat_pattern"
        | "parenthesized_expression" => {
            let mut cursor = target.walk();
            for child in target.named_children(&mut cursor) {
                bind_target(child, source, names);
            }
        }
        _ => {}
    }
}

fn collect_imports(root: Node<'_>, source: &str, names: &mut BTreeSet<String>) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "import_statement" => {
                let mut cursor = node.walk();
                for name in node.children_by_field_name("name", &mut cursor) {
                    bind_import(name, source, names, true);
                }
            }
            "import_from_statement" | "future_import_statement" => {
                let mut cursor = node.walk();
                for name in node.children_by_field_name("name", &mut cursor) {
                    bind_import(name, source, names, false);
                }
            }
            _ => {
                let mut cursor = node.walk();
                stack.extend(node.named_children(&mut cursor));
            }
        }
    }
}

/// `import a.b` binds `a`; `from m import a.b` cannot occur; aliases win.
fn bind_import(name: Node<'_>, source: &str, names: &mut BTreeSet<String>, plain: bool) {
    if name.kind() == "aliased_import" {
        if let Some(alias) = name.child_by_field_name("alias") {
            names.insert(node_text(alias, source).to_string());
        }
        return;
    }
    let text = node_text(name, source);
    let bound = if plain {
        text.split('.').next().unwrap_or(text)
    } else {
        text
    };
    names.insert(bound.trim().to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_source() {
        assert_eq!(validate_syntax("def f(x):\n    return x + 1\n"), (true, None));
        assert!(is_valid(""));
    }

    #[test]
    fn test_reports_line_of_error() {
        let (ok, err) = validate_syntax("x = 1\ny = (\n");
        assert!(!ok);
        let err = err.unwrap();
        assert!(err.starts_with("Line "), "{err}");
    }

    #[test]
    fn test_comment_only_body_is_invalid() {
        let source = "class A:\n    # WARNING: Decompyle incomplete\n";
        let (ok, err) = validate_syntax(source);
        assert!(!ok);
        assert!(err.unwrap().starts_with("Line "));
        assert!(!is_valid("def f():\n"));
    }

    #[test]
    fn test_parameter_order_enforced() {
        let (ok, err) = validate_syntax("def f(a=1, b):\n    pass\n");
        assert!(!ok);
        assert_eq!(err.unwrap(), "Line 1: non-default argument follows default argument");
        assert!(!is_valid("g = lambda a=1, b: a\n"));
        assert!(!is_valid("def f(a: int = 1, b: int):\n    pass\n"));

        for fine in [
            "def f(a, b=1, *args, c, d=2, **kw):\n    pass\n",
            "def f(a=1, *, b):\n    pass\n",
            "def f(a=1, /, b=2):\n    pass\n",
            "def f(a=1, *args: int, b):\n    pass\n",
        ] {
            assert!(is_valid(fine), "{fine}");
        }
    }

    #[test]
    fn test_argument_order_enforced() {
        let (ok, err) = validate_syntax("x = 1\nf(x=1, 2)\n");
        assert!(!ok);
        assert_eq!(err.unwrap(), "Line 2: positional argument follows keyword argument");
        assert!(!is_valid("f(**kw, 2)\n"));
        assert!(!is_valid("f(**kw, *rest)\n"));
        assert!(!is_valid("class A(metaclass=M, Base):\n    pass\n"));

        for fine in ["f(1, *rest, x=1, *more, **kw)\n", "f(a, b=2, **kw, c=3)\n", "f(x for x in y)\n"] {
            assert!(is_valid(fine), "{fine}");
        }
    }

    #[test]
    fn test_check_syntax_error_variant() {
        match check_syntax("def broken(:\n") {
            Err(UnpycError::SyntaxInvalid(message)) => assert!(message.starts_with("Line 1")),
            other => panic!("expected SyntaxInvalid, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_top_level_bindings() {
        let source = "\
from __future__ import annotations
import os.path
import numpy as np
from .base import Base, helper as h

A = B = 1
C: int = 2
D, (E, F) = 3, (4, 5)
obj.attr = 6

if True:
    G = 7

class Widget(Base):
    inner = 1
    def method(self):
        import json
        local = 2

@decorator
def build():
    pass
";
        let names = top_level_bindings(source).unwrap();
        for expected in [
            "annotations", "os", "np", "Base", "h", "A", "B", "C", "D", "E", "F", "G", "Widget",
            "build", "json",
        ] {
            assert!(names.contains(expected), "missing {expected}");
        }
        for absent in ["inner", "local", "method", "obj", "attr", "numpy", "helper"] {
            assert!(!names.contains(absent), "unexpected {absent}");
        }
    }

    #[test]
    fn test_bindings_none_on_invalid_source() {
        assert!(top_level_bindings("def broken(:\n").is_none());
    }
}
