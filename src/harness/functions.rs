//! Named callables for `function`-kind tests.
//!
//! A callable receives the sandbox workspace and the test's JSON arguments.
//! `Ok(true)` passes; `Ok(false)` and `Err(_)` fail the test. Built-ins cover
//! every check emitted by the generator; callers may register their own.

use crate::core::digest::sha256_hex;
use crate::core::sandbox::resolve_within;
use crate::harness::analysis::count_secrets;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use walkdir::WalkDir;

pub type TestFunction = Arc<dyn Fn(&Path, &Value) -> Result<bool, String> + Send + Sync>;

/// Extensions whose bracket structure is checked.
const BRACKETED_EXTENSIONS: &[&str] = &[
    "py", "js", "mjs", "cjs", "ts", "tsx", "jsx", "rs", "go", "java", "c", "h", "cc", "cpp",
    "hpp", "cs", "rb", "json", "kt", "swift",
];

static TOP_LEVEL_DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:async\s+)?(?:pub\s+)?(?:def|class|function|fn)\s+([A-Za-z_]\w*)")
        .expect("valid definition regex")
});

#[derive(Clone)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, TestFunction>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("file_exists", file_exists);
        registry.register("file_absent", file_absent);
        registry.register("file_digest", file_digest);
        registry.register("file_contains", file_contains);
        registry.register("brackets_balanced", brackets_balanced);
        registry.register("file_size_within", file_size_within);
        registry.register("repeated_read", repeated_read);
        registry.register("definitions_unique", definitions_unique);
        registry.register("no_hardcoded_secrets", no_hardcoded_secrets);
        registry.register("utf8_tree", utf8_tree);
        registry.register("tree_walkable", tree_walkable);
        registry.register("change_set_consistent", change_set_consistent);
        registry
    }

    /// Register (or replace) a callable under `name`.
    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&Path, &Value) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<TestFunction> {
        self.functions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.functions.keys().map(String::as_str).collect()
    }
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing string argument '{}'", key))
}

fn arg_u64(args: &Value, key: &str) -> Result<u64, String> {
    args.get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| format!("missing integer argument '{}'", key))
}

fn arg_paths(args: &Value, key: &str) -> Result<Vec<String>, String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("'{}' must contain strings", key))
            })
            .collect(),
        Some(_) => Err(format!("'{}' must be an array", key)),
    }
}

fn target(workspace: &Path, args: &Value) -> Result<PathBuf, String> {
    let rel = arg_str(args, "path")?;
    resolve_within(workspace, rel).map_err(|e| e.to_string())
}

fn read_text(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))
}

fn file_exists(workspace: &Path, args: &Value) -> Result<bool, String> {
    Ok(target(workspace, args)?.is_file())
}

fn file_absent(workspace: &Path, args: &Value) -> Result<bool, String> {
    Ok(!target(workspace, args)?.exists())
}

fn file_digest(workspace: &Path, args: &Value) -> Result<bool, String> {
    let path = target(workspace, args)?;
    let expected = arg_str(args, "digest")?;
    let bytes = fs::read(&path).map_err(|e| format!("{}: {}", path.display(), e))?;
    Ok(sha256_hex(&bytes) == expected)
}

fn file_contains(workspace: &Path, args: &Value) -> Result<bool, String> {
    let path = target(workspace, args)?;
    let needle = arg_str(args, "needle")?;
    Ok(read_text(&path)?.contains(needle))
}

fn brackets_balanced(workspace: &Path, args: &Value) -> Result<bool, String> {
    let path = target(workspace, args)?;
    let content = read_text(&path)?;
    let checked = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| BRACKETED_EXTENSIONS.contains(&ext));
    if !checked {
        return Ok(true);
    }
    Ok(balanced(&content))
}

/// Bracket balance outside single-line string literals and line comments.
pub fn balanced(content: &str) -> bool {
    let mut stack = Vec::new();
    for line in content.lines() {
        let mut quote: Option<char> = None;
        let mut escaped = false;
        let mut prev = '\0';
        for c in line.chars() {
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                prev = c;
                continue;
            }
            match c {
                '#' => break,
                '/' if prev == '/' => break,
                '"' | '\'' | '`' => quote = Some(c),
                '(' | '[' | '{' => stack.push(c),
                ')' | ']' | '}' => {
                    let open = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    if stack.pop() != Some(open) {
                        return false;
                    }
                }
                _ => {}
            }
            prev = c;
        }
    }
    stack.is_empty()
}

fn file_size_within(workspace: &Path, args: &Value) -> Result<bool, String> {
    let path = target(workspace, args)?;
    let max = arg_u64(args, "max_bytes")?;
    let meta = fs::metadata(&path).map_err(|e| format!("{}: {}", path.display(), e))?;
    Ok(meta.len() <= max)
}

fn repeated_read(workspace: &Path, args: &Value) -> Result<bool, String> {
    let path = target(workspace, args)?;
    let iterations = arg_u64(args, "iterations")?.max(1);
    let first = fs::read(&path).map_err(|e| format!("{}: {}", path.display(), e))?;
    for _ in 1..iterations {
        let again = fs::read(&path).map_err(|e| format!("{}: {}", path.display(), e))?;
        if again != first {
            return Ok(false);
        }
    }
    Ok(true)
}

fn definitions_unique(workspace: &Path, args: &Value) -> Result<bool, String> {
    let content = read_text(&target(workspace, args)?)?;
    let mut seen = BTreeSet::new();
    for caps in TOP_LEVEL_DEFINITION.captures_iter(&content) {
        if !seen.insert(caps[1].to_string()) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn no_hardcoded_secrets(workspace: &Path, args: &Value) -> Result<bool, String> {
    let content = read_text(&target(workspace, args)?)?;
    Ok(count_secrets(&content) == 0)
}

fn utf8_tree(workspace: &Path, _args: &Value) -> Result<bool, String> {
    for entry in WalkDir::new(workspace) {
        let entry = entry.map_err(|e| e.to_string())?;
        if !entry.file_type().is_file() {
            continue;
        }
        let bytes = fs::read(entry.path()).map_err(|e| e.to_string())?;
        let head = &bytes[..bytes.len().min(8000)];
        // Binary files are out of scope for text compatibility.
        if head.contains(&0) {
            continue;
        }
        if std::str::from_utf8(&bytes).is_err() {
            return Ok(false);
        }
    }
    Ok(true)
}

fn tree_walkable(workspace: &Path, _args: &Value) -> Result<bool, String> {
    for entry in WalkDir::new(workspace) {
        entry.map_err(|e| e.to_string())?;
    }
    Ok(true)
}

fn change_set_consistent(workspace: &Path, args: &Value) -> Result<bool, String> {
    for rel in arg_paths(args, "present")? {
        let path = resolve_within(workspace, &rel).map_err(|e| e.to_string())?;
        if !path.is_file() {
            return Ok(false);
        }
    }
    for rel in arg_paths(args, "absent")? {
        let path = resolve_within(workspace, &rel).map_err(|e| e.to_string())?;
        if path.exists() {
            return Ok(false);
        }
    }
    Ok(true)
}
