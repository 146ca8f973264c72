//! Reader and writer for the disassembler's text report.
//!
//! The report is an indentation-structured listing: a `(Python X.Y)` banner,
//! then one `[Code]` block per code object with `Key: value` fields and
//! bracketed sections (`[Names]`, `[Var Names]`, `[Constants]`,
//! `[Disassembly]`, ...). Nested code objects appear as `[Code]` entries in
//! their parent's constant table. Unknown sections are skipped.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

use crate::bytecode::code::CodeUnit;
use crate::bytecode::literal::parse_literal;
use crate::bytecode::opcodes::{Instruction, Opcode};
use crate::bytecode::value::{str_repr, PyValue};
use crate::bytecode::{PyVersion, UnitId};
use crate::errors::{UnpycError, UnpycResult};
use crate::guards::MAX_OBJECT_DEPTH;

/// Oldest and newest report versions the parser understands.
pub const MIN_REPORT_VERSION: PyVersion = PyVersion::new(3, 6);
pub const MAX_REPORT_VERSION: PyVersion = PyVersion::new(3, 13);

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(Python (\d+)\.(\d+)").unwrap());

/// Code units parsed from one report plus the report text of each unit.
pub struct ParsedReport {
    pub version: PyVersion,
    pub units: Vec<CodeUnit>,
    pub slices: Vec<String>,
    pub root: UnitId,
}

struct Line<'a> {
    indent: usize,
    text: &'a str,
    raw: &'a str,
}

pub fn parse_report(report: &str) -> UnpycResult<ParsedReport> {
    let lines: Vec<Line<'_>> = report
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|raw| {
            let text = raw.trim();
            let indent = raw.len() - raw.trim_start().len();
            Line { indent, text, raw }
        })
        .collect();

    let first_code = lines
        .iter()
        .position(|l| l.text == "[Code]")
        .ok_or_else(|| UnpycError::Corrupt("report contains no code objects".to_string()))?;

    let version = lines[..first_code]
        .iter()
        .find_map(|l| VERSION_RE.captures(l.text))
        .and_then(|caps| {
            let major = caps[1].parse::<u8>().ok()?;
            let minor = caps[2].parse::<u8>().ok()?;
            Some(PyVersion::new(major, minor))
        })
        .ok_or_else(|| {
            UnpycError::UnsupportedFormat("report has no (Python X.Y) banner".to_string())
        })?;
    if version < MIN_REPORT_VERSION || version > MAX_REPORT_VERSION {
        return Err(UnpycError::UnsupportedFormat(format!(
            "report is for Python {version}, expected {MIN_REPORT_VERSION}..={MAX_REPORT_VERSION}"
        )));
    }

    let mut parser = ReportParser {
        lines,
        pos: first_code,
        version,
        units: Vec::new(),
        slices: Vec::new(),
        depth: 0,
    };
    let indent = parser.lines[first_code].indent;
    let root = parser.parse_code_block(indent)?;
    Ok(ParsedReport {
        version,
        units: parser.units,
        slices: parser.slices,
        root,
    })
}

struct ReportParser<'a> {
    lines: Vec<Line<'a>>,
    pos: usize,
    version: PyVersion,
    units: Vec<CodeUnit>,
    slices: Vec<String>,
    depth: usize,
}

impl<'a> ReportParser<'a> {
    fn inside(&self, indent: usize) -> bool {
        self.pos < self.lines.len() && self.lines[self.pos].indent > indent
    }

    fn skip_block(&mut self, indent: usize) {
        while self.inside(indent) {
            self.pos += 1;
        }
    }

    fn parse_code_block(&mut self, indent: usize) -> UnpycResult<UnitId> {
        if self.depth >= MAX_OBJECT_DEPTH {
            return Err(UnpycError::Corrupt(format!(
                "code objects nested too deep near report line {}",
                self.pos + 1
            )));
        }
        self.depth += 1;
        let start = self.pos;
        self.pos += 1;

        let mut unit = CodeUnit::empty("", self.version);
        let mut qualname: Option<String> = None;

        while self.inside(indent) {
            let line = &self.lines[self.pos];
            let text = line.text;
            let line_indent = line.indent;
            if text.starts_with('[') && text.ends_with(']') && text.len() > 2 {
                self.pos += 1;
                match &text[1..text.len() - 1] {
                    "Names" => unit.names = self.parse_names(line_indent),
                    "Var Names" | "Locals+Names" => unit.varnames = self.parse_names(line_indent),
                    "Free Vars" => unit.freevars = self.parse_names(line_indent),
                    "Cell Vars" => unit.cellvars = self.parse_names(line_indent),
                    "Constants" => unit.consts = self.parse_consts(line_indent)?,
                    "Disassembly" => unit.instructions = self.parse_disassembly(line_indent),
                    _ => self.skip_block(line_indent),
                }
                continue;
            }
            self.pos += 1;
            let Some((key, value)) = text.split_once(':') else {
                continue;
            };
            let value = value.trim();
            let number = || value.split_whitespace().next().and_then(|v| v.parse::<u32>().ok());
            match key.trim() {
                "File Name" => unit.filename = value.to_string(),
                "Object Name" => unit.name = value.to_string(),
                "Qualified Name" => qualname = Some(value.to_string()),
                "Arg Count" => unit.argcount = number().unwrap_or(0),
                "Pos Only Arg Count" => unit.posonly_argcount = number().unwrap_or(0),
                "KW Only Arg Count" => unit.kwonly_argcount = number().unwrap_or(0),
                "Stack Size" => unit.stacksize = number().unwrap_or(0),
                "First Line" => unit.first_line = number().unwrap_or(0),
                "Flags" => {
                    let token = value.split_whitespace().next().unwrap_or("0");
                    let hex = token.trim_start_matches("0x").trim_start_matches("0X");
                    unit.flags = u32::from_str_radix(hex, 16).unwrap_or(0);
                }
                _ => {}
            }
        }

        unit.qualname = qualname.unwrap_or_else(|| unit.name.clone());
        unit.code_size = unit
            .instructions
            .last()
            .map(|ins| ins.offset as usize + 2)
            .unwrap_or(0);
        unit.children = unit.consts.iter().filter_map(PyValue::as_code).collect();

        let slice = self.lines[start..self.pos]
            .iter()
            .map(|l| l.raw.get(indent..).unwrap_or(l.text))
            .collect::<Vec<_>>()
            .join("\n");
        self.units.push(unit);
        self.slices.push(slice);
        self.depth -= 1;
        Ok(UnitId(self.units.len() - 1))
    }

    fn parse_names(&mut self, indent: usize) -> Vec<String> {
        let mut names = Vec::new();
        while self.inside(indent) {
            let text = self.lines[self.pos].text;
            self.pos += 1;
            names.push(name_entry(text));
        }
        names
    }

    fn parse_consts(&mut self, indent: usize) -> UnpycResult<Vec<PyValue>> {
        let mut consts = Vec::new();
        while self.inside(indent) {
            consts.push(self.parse_const()?);
        }
        Ok(consts)
    }

    fn parse_const(&mut self) -> UnpycResult<PyValue> {
        let line = &self.lines[self.pos];
        let (text, indent) = (line.text, line.indent);
        let close = match text {
            "[Code]" => return Ok(PyValue::Code(self.parse_code_block(indent)?)),
            "(" => ")",
            "[" => "]",
            "{" => "}",
            "frozenset({" => "})",
            _ => {
                self.pos += 1;
                return Ok(parse_literal(text).unwrap_or_else(|_| PyValue::Opaque(text.to_string())));
            }
        };
        self.pos += 1;
        let mut items = Vec::new();
        while self.inside(indent) {
            items.push(self.parse_const()?);
        }
        if self.pos < self.lines.len() && self.lines[self.pos].text == close {
            self.pos += 1;
        }
        Ok(match text {
            "(" => PyValue::Tuple(items),
            "[" => PyValue::List(items),
            "{" => PyValue::Set(items),
            _ => PyValue::FrozenSet(items),
        })
    }

    fn parse_disassembly(&mut self, indent: usize) -> Vec<Instruction> {
        let mut instructions = Vec::new();
        while self.inside(indent) {
            let text = self.lines[self.pos].text;
            self.pos += 1;
            let mut tokens = text.split_whitespace();
            let Some(offset) = tokens.next().and_then(|t| t.parse::<u32>().ok()) else {
                continue;
            };
            let Some(opname) = tokens.next() else {
                continue;
            };
            let arg = tokens
                .next()
                .and_then(|t| t.trim_end_matches(':').parse::<u32>().ok())
                .unwrap_or(0);
            instructions.push(Instruction {
                offset,
                op: Opcode::from_name(opname),
                arg,
            });
        }
        instructions
    }
}

/// `'name'` or `'name' (kind)` entries of name tables.
fn name_entry(text: &str) -> String {
    if let Ok(PyValue::Str(s)) = parse_literal(text) {
        return s;
    }
    let head = text.split_whitespace().next().unwrap_or(text);
    match parse_literal(head) {
        Ok(PyValue::Str(s)) => s,
        _ => head.trim_matches(|c| c == '\'' || c == '"').to_string(),
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render a full report for `root` and everything nested under it.
pub fn render_report(units: &[CodeUnit], root: UnitId, version: PyVersion) -> String {
    let filename = units.get(root.0).map(|u| u.filename.as_str()).unwrap_or("");
    let mut out = format!("{filename} (Python {version})\n");
    render_unit_into(&mut out, units, root, 0);
    out
}

/// Render one code object (children included) in report format.
pub fn render_unit(units: &[CodeUnit], id: UnitId) -> String {
    let mut out = String::new();
    render_unit_into(&mut out, units, id, 0);
    out.trim_end().to_string()
}

fn render_unit_into(out: &mut String, units: &[CodeUnit], id: UnitId, depth: usize) {
    let Some(unit) = units.get(id.0) else {
        return;
    };
    let pad = "    ".repeat(depth);
    let field = format!("{pad}    ");
    let item = format!("{pad}        ");

    let _ = writeln!(out, "{pad}[Code]");
    let _ = writeln!(out, "{field}File Name: {}", unit.filename);
    let _ = writeln!(out, "{field}Object Name: {}", unit.name);
    let _ = writeln!(out, "{field}Qualified Name: {}", unit.qualname);
    let _ = writeln!(out, "{field}Arg Count: {}", unit.argcount);
    let _ = writeln!(out, "{field}Pos Only Arg Count: {}", unit.posonly_argcount);
    let _ = writeln!(out, "{field}KW Only Arg Count: {}", unit.kwonly_argcount);
    let _ = writeln!(out, "{field}Stack Size: {}", unit.stacksize);
    let _ = writeln!(out, "{field}Flags: 0x{:08X}", unit.flags);

    for (title, names) in [
        ("Names", &unit.names),
        ("Var Names", &unit.varnames),
        ("Free Vars", &unit.freevars),
        ("Cell Vars", &unit.cellvars),
    ] {
        let _ = writeln!(out, "{field}[{title}]");
        for name in names {
            let _ = writeln!(out, "{item}{}", str_repr(name));
        }
    }

    let _ = writeln!(out, "{field}[Constants]");
    for value in &unit.consts {
        match value {
            PyValue::Code(child) if depth < MAX_OBJECT_DEPTH => {
                render_unit_into(out, units, *child, depth + 2)
            }
            other => {
                let _ = writeln!(out, "{item}{}", other.repr());
            }
        }
    }

    let _ = writeln!(out, "{field}[Disassembly]");
    for ins in &unit.instructions {
        let _ = write!(out, "{item}{:<8}{:<30}", ins.offset, ins.op.name());
        let detail = match ins.op {
            Opcode::LoadConst => unit.const_at(ins.arg).map(|c| match c {
                PyValue::Code(child) => units
                    .get(child.0)
                    .map(|u| format!("<CODE> {}", u.name))
                    .unwrap_or_default(),
                other => other.repr(),
            }),
            Opcode::LoadName | Opcode::StoreName | Opcode::StoreGlobal => {
                unit.name_at(ins.arg).map(str::to_string)
            }
            _ => None,
        };
        match detail {
            Some(d) => {
                let _ = writeln!(out, "{}: {d}", ins.arg);
            }
            None => {
                let _ = writeln!(out, "{}", ins.arg);
            }
        }
    }
}
