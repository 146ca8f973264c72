//! Prompt templates for coding agents.
//!
//! Placeholders are `{name}`; substitution is a single pass over the
//! template so inserted source text is never re-scanned.

pub const FUNCTION_PROMPT: &str = r#"Reconstruct this incomplete Python function from its bytecode.

## Incomplete Source (from pycdc):
```python
{incomplete_source}
```

## Bytecode Disassembly (from pycdas):
```
{bytecode}
```

## Context (imports and class):
```python
{context}
```

Rules:
- Output ONLY the complete Python function/method
- Preserve the exact signature and indentation level
- Use bytecode constants and names to infer implementation
- No explanations, just code in a Python code block

Output the complete Python code:"#;

pub const CLASS_PROMPT: &str = r#"Reconstruct this incomplete Python class from its bytecode.

## Incomplete Source (shows class with just 'pass'):
```python
{incomplete_source}
```

## Class Bytecode (from pycdas):
```
{bytecode}
```

## Methods this class should have (from bytecode):
{methods}

## Context (imports):
```python
{context}
```

Rules:
- Output ONLY the complete Python class
- Include all methods listed above with FULL implementations
- NEVER use 'pass' as a method body - always infer the real implementation from bytecode
- Look at [Constants], [Names], [Disassembly] sections to understand what each method does
- Preserve the class name and base class
- No explanations, just code in a Python code block

Output the complete Python class:"#;

pub const SYNTAX_FIX_PROMPT: &str = r#"Fix the syntax errors in this Python code from a decompiler.

## Source with syntax errors:
```python
{source}
```

## Syntax error:
{error}

## Bytecode for reference (from pycdas):
```
{bytecode}
```

Rules:
- Fix ONLY the syntax errors, preserve everything else
- Use bytecode to understand what the code should do
- Keep all function/class signatures intact
- Output the complete fixed Python code in a code block
- No explanations, just the fixed code

Output the fixed Python code:"#;

pub const WHOLE_FILE_PROMPT: &str = r#"The decompiler produced invalid Python code. Reconstruct valid Python from bytecode.

## Invalid Source (from pycdc - has syntax errors):
```python
{source}
```

## Bytecode Disassembly (from pycdas):
```
{bytecode}
```

Rules:
- Output ONLY valid Python code
- Preserve the structure (imports, classes, functions)
- Use bytecode to infer correct implementation
- No explanations, just code in a Python code block

Output the complete valid Python code:"#;

/// Substitute `{key}` placeholders. Unknown braces are copied through.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + values.iter().map(|(_, v)| v.len()).sum::<usize>());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let hit = values.iter().find(|(key, _)| {
            tail.len() > key.len() + 1
                && tail[1..].starts_with(key)
                && tail[1 + key.len()..].starts_with('}')
        });
        match hit {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len() + 2..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn function_prompt(signature: &str, bytecode: &str, context: &str) -> String {
    let incomplete = format!("{signature}:\n    pass");
    fill(
        FUNCTION_PROMPT,
        &[
            ("incomplete_source", &incomplete),
            ("bytecode", bytecode),
            ("context", context),
        ],
    )
}

pub fn class_prompt(name: &str, base: &str, members: &[String], bytecode: &str, context: &str) -> String {
    let incomplete = format!("class {name}({base}):\n    pass");
    let methods = if members.is_empty() {
        "unknown".to_string()
    } else {
        members.join(", ")
    };
    fill(
        CLASS_PROMPT,
        &[
            ("incomplete_source", &incomplete),
            ("bytecode", bytecode),
            ("methods", &methods),
            ("context", context),
        ],
    )
}

pub fn syntax_fix_prompt(source: &str, error: &str, bytecode: &str) -> String {
    fill(
        SYNTAX_FIX_PROMPT,
        &[("source", source), ("error", error), ("bytecode", bytecode)],
    )
}

pub fn whole_file_prompt(source: &str, bytecode: &str) -> String {
    fill(WHOLE_FILE_PROMPT, &[("source", source), ("bytecode", bytecode)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_is_single_pass() {
        let out = fill("a {x} b {y} {z}", &[("x", "{y}"), ("y", "2")]);
        assert_eq!(out, "a {y} b 2 {z}");
    }

    #[test]
    fn test_function_prompt_sections() {
        let prompt = function_prompt("def connect(self, port)", "Object Name: connect", "import os");
        assert!(prompt.contains("```python\ndef connect(self, port):\n    pass\n```"));
        assert!(prompt.contains("```\nObject Name: connect\n```"));
        assert!(prompt.contains("```python\nimport os\n```"));
        assert!(!prompt.contains("{context}"));
    }

    #[test]
    fn test_class_prompt_lists_members() {
        let prompt = class_prompt("Mixer", "object", &["update".into(), "reset".into()], "", "");
        assert!(prompt.contains("class Mixer(object):\n    pass"));
        assert!(prompt.contains("(from bytecode):\nupdate, reset\n"));
        let prompt = class_prompt("Mixer", "object", &[], "", "");
        assert!(prompt.contains("(from bytecode):\nunknown\n"));
    }

    #[test]
    fn test_syntax_fix_prompt_carries_error() {
        let prompt = syntax_fix_prompt("def f(:", "Line 1: invalid syntax", "listing");
        assert!(prompt.contains("## Syntax error:\nLine 1: invalid syntax\n"));
        assert!(whole_file_prompt("x", "y").starts_with("The decompiler produced invalid Python code."));
    }
}
