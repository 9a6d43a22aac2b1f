//! Static pre-execution scan of proposed change content.
//!
//! Fail-closed: anything that cannot be analyzed counts as an issue, and any
//! single issue rejects the whole change-set. The scan runs before a byte of
//! the change-set is written into the sandbox.

use crate::core::config::{NETWORK_MODULES, SimulationConfig};
use crate::core::error::HarnessError;
use crate::harness::model::Change;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

static PY_FROM_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*from\s+(\.*[A-Za-z_][\w.]*|\.+)\s+import\s+\S").expect("valid from-import regex")
});
static PY_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s+(.+)$").expect("valid import regex"));
static PY_DOTTED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_]\w*(\.[A-Za-z_]\w*)*(\s+as\s+[A-Za-z_]\w*)?$").expect("valid name regex")
});
static JS_IMPORT_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:import|export)\s+(?:[^'"]*?\s+from\s+)?['"]([^'"]+)['"]"#)
        .expect("valid js import regex")
});
static JS_REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:require|import)\s*\(\s*['"]([^'"]+)['"]\s*\)"#).expect("valid require regex")
});
static IMPORT_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bimport\b").expect("valid import keyword regex"));
static COMPOUND_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(?:el)?if|else|for|while|with|try|except|finally|def|class|async\s+(?:def|for|with))\b")
        .expect("valid compound header regex")
});

/// Primitives that execute code built at runtime; flagged whether or not
/// they appear in the forbidden list.
static DYNAMIC_EXEC: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("eval", r"(?m)(?:^|[^.\w])eval\s*\("),
        ("exec", r"(?m)(?:^|[^.\w])exec\s*\("),
        ("compile", r"(?m)(?:^|[^.\w])compile\s*\("),
        (
            "builtins",
            r#"\b(?:__builtins__|builtins)\s*(?:\.\s*(?:eval|exec|compile|__import__)\s*\(|\[\s*['"](?:eval|exec|compile|__import__)['"]\s*\])"#,
        ),
        ("getattr(builtins)", r"\bgetattr\s*\(\s*(?:__builtins__|builtins)\b"),
        ("__import__", r"__import__\s*\("),
        ("importlib.import_module", r"importlib\s*\.\s*import_module\s*\("),
        ("new Function", r"\bnew\s+Function\s*\("),
        ("vm.runInContext", r"\bvm\s*\.\s*runIn\w*Context\s*\("),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid dynamic-exec regex")))
    .collect()
});

/// One module reference found in content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub line: usize,
    /// Top-level module name (`os` for `os.path`, `@scope/pkg` for scoped packages).
    pub module: String,
    pub relative: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn into_result(self) -> Result<(), HarnessError> {
        if self.ok {
            Ok(())
        } else {
            Err(HarnessError::SecurityViolation(self.issues))
        }
    }
}

pub struct SecurityValidator {
    forbidden_operations: BTreeSet<String>,
    allowed_imports: BTreeSet<String>,
    enable_networking: bool,
}

impl SecurityValidator {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            forbidden_operations: config.forbidden_operations.clone(),
            allowed_imports: config.allowed_imports.clone(),
            enable_networking: config.enable_networking,
        }
    }

    /// Scan raw content strings, labelled by position.
    pub fn validate<S: AsRef<str>>(&self, contents: &[S]) -> ValidationReport {
        let mut issues = Vec::new();
        for (idx, content) in contents.iter().enumerate() {
            self.scan(&format!("content[{}]", idx), content.as_ref(), &mut issues);
        }
        finish(issues)
    }

    /// Scan every change that carries content, labelled by its path.
    pub fn validate_changes(&self, changes: &[Change]) -> ValidationReport {
        let mut issues = Vec::new();
        for change in changes {
            if let Some(content) = change.content() {
                self.scan(change.path(), content, &mut issues);
            }
        }
        finish(issues)
    }

    fn scan(&self, label: &str, content: &str, issues: &mut Vec<String>) {
        if content.contains('\0') {
            issues.push(format!("{}: content is not text and cannot be analyzed", label));
            return;
        }

        for op in &self.forbidden_operations {
            if !op.is_empty() && content.contains(op.as_str()) {
                issues.push(format!("{}: forbidden operation '{}'", label, op));
            }
        }

        match extract_imports(content) {
            Ok(imports) => {
                let mut seen = BTreeSet::new();
                for import in imports.into_iter().filter(|i| !i.relative) {
                    if !seen.insert(import.module.clone()) {
                        continue;
                    }
                    if !self.enable_networking && is_network_module(&import.module) {
                        issues.push(format!(
                            "{}: network import '{}' while networking is disabled (line {})",
                            label, import.module, import.line
                        ));
                    } else if !self.allowed_imports.contains(&import.module) {
                        issues.push(format!(
                            "{}: disallowed import '{}' (line {})",
                            label, import.module, import.line
                        ));
                    }
                }
            }
            Err(line) => issues.push(format!(
                "{}: unparseable import statement at line {}",
                label, line
            )),
        }

        for (name, pattern) in DYNAMIC_EXEC.iter() {
            if pattern.is_match(content) {
                issues.push(format!("{}: dynamic code execution via '{}'", label, name));
            }
        }
    }
}

fn finish(issues: Vec<String>) -> ValidationReport {
    ValidationReport {
        ok: issues.is_empty(),
        issues,
    }
}

fn is_network_module(module: &str) -> bool {
    let bare = module.strip_prefix("node:").unwrap_or(module);
    NETWORK_MODULES.contains(&bare)
}

/// Extract module references from Python- and JavaScript-style import
/// statements. Each physical line is split into logical statements on `;`
/// and after a compound header's `:`. `Err(line)` marks a statement that
/// mentions `import` but cannot be attributed to a module.
pub fn extract_imports(content: &str) -> Result<Vec<ImportRef>, usize> {
    let mut out = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        for statement in logical_statements(raw) {
            parse_statement(statement, idx + 1, &mut out)?;
        }
    }
    Ok(out)
}

fn parse_statement(statement: &str, line_no: usize, out: &mut Vec<ImportRef>) -> Result<(), usize> {
    let (head, body) = split_compound(statement);
    let trimmed = head.trim_start();
    if trimmed.starts_with("//") {
        return Ok(());
    }

    let before = out.len();
    if let Some(caps) = JS_IMPORT_FROM.captures(head) {
        out.push(js_ref(&caps[1], line_no));
    } else if trimmed.starts_with("from ") && trimmed.contains(" import") {
        let Some(caps) = PY_FROM_IMPORT.captures(head) else {
            return Err(line_no);
        };
        let module = &caps[1];
        out.push(ImportRef {
            line: line_no,
            module: top_segment(module.trim_start_matches('.')),
            relative: module.starts_with('.'),
        });
    } else if let Some(caps) = PY_IMPORT.captures(head) {
        for part in caps[1].split(',') {
            let part = part.trim();
            if !PY_DOTTED_NAME.is_match(part) {
                return Err(line_no);
            }
            let name = part.split_whitespace().next().unwrap_or(part);
            out.push(ImportRef {
                line: line_no,
                module: top_segment(name),
                relative: false,
            });
        }
    }
    for caps in JS_REQUIRE.captures_iter(head) {
        out.push(js_ref(&caps[1], line_no));
    }

    if out.len() == before {
        let code = mask_strings(head).replace("import.meta", "");
        if IMPORT_KEYWORD.is_match(&code) {
            return Err(line_no);
        }
    }

    match body {
        Some(body) => parse_statement(body, line_no, out),
        None => Ok(()),
    }
}

/// Tracks whether a character sits inside a string literal.
#[derive(Default)]
struct Quotes {
    open: Option<char>,
    escaped: bool,
}

impl Quotes {
    /// True when `ch` is code, false when it belongs to a literal.
    fn code(&mut self, ch: char) -> bool {
        match self.open {
            Some(quote) => {
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if ch == quote {
                    self.open = None;
                }
                false
            }
            None if matches!(ch, '\'' | '"' | '`') => {
                self.open = Some(ch);
                false
            }
            None => true,
        }
    }
}

/// `;`-separated statements of one line, with any trailing `#` comment dropped.
fn logical_statements(line: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut quotes = Quotes::default();
    let mut start = 0;
    let mut end = line.len();
    let mut prev = ' ';
    for (i, ch) in line.char_indices() {
        if quotes.code(ch) {
            if ch == ';' {
                out.push(&line[start..i]);
                start = i + 1;
            } else if ch == '#' && prev.is_whitespace() {
                end = i;
                break;
            }
        }
        prev = ch;
    }
    out.push(&line[start..end]);
    out
}

/// Split `if x: body` style statements at the header's `:`.
fn split_compound(statement: &str) -> (&str, Option<&str>) {
    if !COMPOUND_HEADER.is_match(statement) {
        return (statement, None);
    }
    let mut quotes = Quotes::default();
    let mut depth = 0i32;
    for (i, ch) in statement.char_indices() {
        if !quotes.code(ch) {
            continue;
        }
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ':' if depth == 0 && !statement[i + 1..].starts_with('=') => {
                return (&statement[..i], Some(&statement[i + 1..]));
            }
            _ => {}
        }
    }
    (statement, None)
}

fn mask_strings(statement: &str) -> String {
    let mut quotes = Quotes::default();
    statement
        .chars()
        .map(|ch| if quotes.code(ch) { ch } else { ' ' })
        .collect()
}

fn top_segment(dotted: &str) -> String {
    dotted.split('.').next().unwrap_or(dotted).to_string()
}

fn js_ref(spec: &str, line: usize) -> ImportRef {
    let relative = spec.starts_with('.') || spec.starts_with('/');
    let bare = spec.strip_prefix("node:").unwrap_or(spec);
    let module = if relative {
        spec.to_string()
    } else if bare.starts_with('@') {
        bare.splitn(3, '/').take(2).collect::<Vec<_>>().join("/")
    } else {
        bare.split('/').next().unwrap_or(bare).to_string()
    };
    ImportRef {
        line,
        module,
        relative,
    }
}
