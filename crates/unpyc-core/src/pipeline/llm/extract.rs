//! Pulling Python code out of free-form agent responses.

use std::sync::LazyLock;

use regex::Regex;

use crate::source::syntax::is_valid;

static PYTHON_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```python\n(.*?)```").unwrap());
static PLAIN_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```\n(.*?)```").unwrap());

const CODE_PREFIXES: &[&str] = &["def ", "class ", "async def ", "@"];

/// Remove the longest common leading whitespace of non-blank lines.
pub fn dedent(text: &str) -> String {
    let margin = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| &l[..l.len() - l.trim_start().len()])
        .reduce(|common, prefix| {
            let shared = common
                .char_indices()
                .zip(prefix.chars())
                .find(|((_, a), b)| a != b)
                .map_or(common.len().min(prefix.len()), |((idx, _), _)| idx);
            &common[..shared]
        })
        .unwrap_or("");
    if margin.is_empty() {
        return text.to_string();
    }
    text.split('\n')
        .map(|line| line.strip_prefix(margin).unwrap_or_else(|| line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn fenced(response: &str) -> Option<String> {
    [&*PYTHON_FENCE_RE, &*PLAIN_FENCE_RE]
        .iter()
        .find_map(|re| re.captures(response))
        .and_then(|caps| caps.get(1))
        .map(|m| trim_blank_edges(m.as_str()))
}

/// Drop surrounding blank lines and trailing whitespace, keeping the
/// indentation of the first code line.
fn trim_blank_edges(text: &str) -> String {
    let text = text.trim_end();
    let start = text
        .char_indices()
        .take_while(|(_, c)| c.is_whitespace())
        .filter(|(_, c)| *c == '\n')
        .last()
        .map_or(0, |(idx, _)| idx + 1);
    text[start..].to_string()
}

/// Everything from the first line that opens a definition.
fn from_first_definition(response: &str) -> Option<String> {
    let lines: Vec<&str> = response.lines().collect();
    let first = lines.iter().position(|line| {
        let t = line.trim_start();
        CODE_PREFIXES.iter().any(|p| t.starts_with(p))
    })?;
    Some(lines[first..].join("\n"))
}

/// Code from a fenced block, else from the first `def`/`class`/decorator
/// line, dedented. `None` unless it parses.
pub fn extract_code(response: &str) -> Option<String> {
    let code = match fenced(response) {
        Some(code) => code,
        None => trim_blank_edges(&from_first_definition(response)?),
    };
    if code.trim().is_empty() {
        return None;
    }
    let code = dedent(&code);
    is_valid(&code).then_some(code)
}
