//! Variable resolution for configuration values
//!
//! Config values may reference the environment (`$VAR`, `${VAR}`,
//! `${VAR:-default}`) or a command (`$(cmd args)`), resolved at runtime so
//! secrets never need to live in the config file itself.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unknown variable: {0}")]
    Unknown(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves `$VAR` and `$(cmd)` references in config values
#[async_trait]
pub trait VariableResolver: Send + Sync {
    /// Resolve a single key (without the `$` sigil)
    async fn resolve(&self, key: &str) -> Result<String, ResolveError>;

    /// Expand every reference embedded in `input`
    async fn expand(&self, input: &str) -> Result<String, ResolveError> {
        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch != '$' {
                result.push(ch);
                continue;
            }
            match chars.peek() {
                // $(command args)
                Some('(') => {
                    chars.next();
                    let mut cmd = String::new();
                    let mut depth = 1usize;
                    for c in chars.by_ref() {
                        match c {
                            '(' => depth += 1,
                            ')' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        cmd.push(c);
                    }
                    result.push_str(&self.resolve(&format!("({})", cmd)).await?);
                }
                // ${VAR} or ${VAR:-default}
                Some('{') => {
                    chars.next();
                    let mut name = String::new();
                    let mut default = None;
                    while let Some(&c) = chars.peek() {
                        chars.next();
                        if c == '}' {
                            break;
                        }
                        if c == ':' && chars.peek() == Some(&'-') {
                            chars.next();
                            let mut d = String::new();
                            for dc in chars.by_ref() {
                                if dc == '}' {
                                    break;
                                }
                                d.push(dc);
                            }
                            default = Some(d);
                            break;
                        }
                        name.push(c);
                    }
                    match self.resolve(&name).await {
                        Ok(v) => result.push_str(&v),
                        Err(e) => match default {
                            Some(d) => result.push_str(&d),
                            None => return Err(e),
                        },
                    }
                }
                // bare $VAR
                Some(c) if c.is_ascii_alphabetic() || *c == '_' => {
                    let mut name = String::new();
                    while let Some(&c) = chars.peek() {
                        if c.is_ascii_alphanumeric() || c == '_' {
                            name.push(c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    result.push_str(&self.resolve(&name).await?);
                }
                _ => result.push('$'),
            }
        }

        Ok(result)
    }
}

/// Resolver backed by the process environment and `sh -c` for commands
#[derive(Debug, Default)]
pub struct ShellResolver {
    /// Overrides consulted before the environment (config `env` maps)
    overrides: HashMap<String, String>,
}

impl ShellResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(overrides: HashMap<String, String>) -> Self {
        Self { overrides }
    }
}

#[async_trait]
impl VariableResolver for ShellResolver {
    async fn resolve(&self, key: &str) -> Result<String, ResolveError> {
        if let Some(cmd) = key.strip_prefix('(').and_then(|k| k.strip_suffix(')')) {
            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(cmd)
                .output()
                .await?;
            if !output.status.success() {
                return Err(ResolveError::Command(format!(
                    "`{}` exited with {}",
                    cmd, output.status
                )));
            }
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        if let Some(v) = self.overrides.get(key) {
            return Ok(v.clone());
        }
        std::env::var(key).map_err(|_| ResolveError::Unknown(key.to_string()))
    }
}

/// Resolver over a fixed map, for tests and reload no-op checks
#[derive(Debug, Default)]
pub struct MapResolver {
    values: HashMap<String, String>,
}

impl MapResolver {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

#[async_trait]
impl VariableResolver for MapResolver {
    async fn resolve(&self, key: &str) -> Result<String, ResolveError> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| ResolveError::Unknown(key.to_string()))
    }
}
