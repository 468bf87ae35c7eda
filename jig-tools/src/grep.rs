//! The `grep` tool: regex search over the workspace
//!
//! Honors `.gitignore` and the sibling `.jigignore`. Compiled patterns are
//! cached; the cache is append-only and shared across calls, so each
//! distinct pattern compiles at most once.

use crate::{Deps, IGNORE_FILE};
use async_trait::async_trait;
use jig_core::tool::{Tool, ToolCallInput, ToolError, ToolInfo, ToolOutput};
use jig_core::{RunContext, Schema};
use parking_lot::RwLock;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Matches reported before the listing is cut off
const MAX_MATCHES: usize = 250;

#[derive(Deserialize, JsonSchema)]
struct GrepInput {
    /// Regular expression to search for
    pattern: String,
    /// Directory or file to search; defaults to the working directory
    path: Option<String>,
    /// Restrict to files whose name matches this glob (e.g. `*.rs`)
    include: Option<String>,
    /// Treat the pattern as a literal string
    #[serde(default)]
    literal: bool,
}

pub struct GrepTool {
    #[allow(dead_code)]
    deps: Deps,
    cache: Arc<RegexCache>,
}

impl GrepTool {
    pub fn new(deps: Deps) -> Self {
        Self {
            deps,
            cache: Arc::new(RegexCache::new()),
        }
    }
}

/// Append-only compiled-pattern cache
pub struct RegexCache {
    patterns: RwLock<HashMap<String, Arc<Regex>>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self {
            patterns: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, pattern: &str) -> Result<Arc<Regex>, regex::Error> {
        if let Some(regex) = self.patterns.read().get(pattern) {
            return Ok(regex.clone());
        }
        let compiled = Arc::new(Regex::new(pattern)?);
        // A racing caller may have inserted meanwhile; keep the first.
        let mut patterns = self.patterns.write();
        Ok(patterns
            .entry(pattern.to_string())
            .or_insert(compiled)
            .clone())
    }

    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn info(&self) -> ToolInfo {
        ToolInfo::new(
            "grep",
            "Search file contents with a regular expression, honoring \
             .gitignore. Returns path:line: matches. Use include to restrict \
             file names, literal for exact-string search.",
            Schema::of::<GrepInput>(),
        )
    }

    async fn run(&self, ctx: &RunContext, call: ToolCallInput) -> Result<ToolOutput, ToolError> {
        let input: GrepInput = call.parse()?;
        let root = ctx.resolve_path(input.path.as_deref().unwrap_or("."));

        let pattern = if input.literal {
            regex::escape(&input.pattern)
        } else {
            input.pattern.clone()
        };
        let regex = self
            .cache
            .get(&pattern)
            .map_err(|e| ToolError::InvalidInput(format!("invalid pattern: {}", e)))?;

        let include = match &input.include {
            Some(pattern) => Some(
                glob::Pattern::new(pattern)
                    .map_err(|e| ToolError::InvalidInput(format!("invalid include: {}", e)))?,
            ),
            None => None,
        };

        let ctx_check = ctx.clone();
        let result = tokio::task::spawn_blocking(move || {
            search(&root, &regex, include.as_ref(), &ctx_check)
        })
        .await
        .map_err(|e| ToolError::Custom(e.to_string()))?;

        let (matches, truncated) = result;
        if matches.is_empty() {
            return Ok(ToolOutput::text("no matches"));
        }
        let mut content = matches.join("\n");
        if truncated {
            content.push_str(&format!(
                "\n... (stopped after {} matches)",
                MAX_MATCHES
            ));
        }
        Ok(ToolOutput::text_capped(content))
    }
}

fn search(
    root: &Path,
    regex: &Regex,
    include: Option<&glob::Pattern>,
    ctx: &RunContext,
) -> (Vec<String>, bool) {
    let mut matches = Vec::new();
    let mut truncated = false;

    let walker = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .add_custom_ignore_filename(IGNORE_FILE)
        .build();

    'outer: for entry in walker.flatten() {
        if ctx.is_canceled() {
            break;
        }
        let path = entry.path();
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if let Some(include) = include {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !include.matches(name) {
                continue;
            }
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            // Binary or unreadable files are skipped silently.
            Err(_) => continue,
        };
        for (line_no, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(format!("{}:{}: {}", path.display(), line_no + 1, line.trim()));
                if matches.len() >= MAX_MATCHES {
                    truncated = true;
                    break 'outer;
                }
            }
        }
    }

    (matches, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_compiles_once_per_pattern() {
        let cache = RegexCache::new();
        let a = cache.get("fn \\w+").unwrap();
        let b = cache.get("fn \\w+").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);

        cache.get("struct \\w+").unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_cache_rejects_invalid_pattern() {
        let cache = RegexCache::new();
        assert!(cache.get("(unclosed").is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_search_finds_matches_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.rs"),
            "fn main() {}\nfn helper() {}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("b.txt"), "nothing here\n").unwrap();

        let regex = Regex::new("fn \\w+").unwrap();
        let ctx = RunContext::new("s", dir.path());
        let (matches, truncated) = search(dir.path(), &regex, None, &ctx);

        assert!(!truncated);
        assert_eq!(matches.len(), 2);
        assert!(matches[0].contains("a.rs:1:"));
        assert!(matches[1].contains("a.rs:2:"));
    }

    #[test]
    fn test_search_include_filter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "target\n").unwrap();
        std::fs::write(dir.path().join("a.md"), "target\n").unwrap();

        let regex = Regex::new("target").unwrap();
        let include = glob::Pattern::new("*.rs").unwrap();
        let ctx = RunContext::new("s", dir.path());
        let (matches, _) = search(dir.path(), &regex, Some(&include), &ctx);

        assert_eq!(matches.len(), 1);
        assert!(matches[0].contains("a.rs"));
    }

    #[test]
    fn test_search_honors_custom_ignore_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(IGNORE_FILE), "vendored/\n").unwrap();
        std::fs::create_dir(dir.path().join("vendored")).unwrap();
        std::fs::write(dir.path().join("vendored/big.rs"), "needle\n").unwrap();
        std::fs::write(dir.path().join("mine.rs"), "needle\n").unwrap();

        let regex = Regex::new("needle").unwrap();
        let ctx = RunContext::new("s", dir.path());
        let (matches, _) = search(dir.path(), &regex, None, &ctx);

        assert_eq!(matches.len(), 1);
        assert!(matches[0].contains("mine.rs"));
    }

    #[tokio::test]
    async fn test_literal_mode_escapes_metacharacters() {
        // Exercised through the cache: the escaped pattern is distinct.
        let cache = RegexCache::new();
        let escaped = regex::escape("foo(bar)");
        let regex = cache.get(&escaped).unwrap();
        assert!(regex.is_match("call foo(bar) here"));
        assert!(!regex.is_match("foobar"));
    }
}
