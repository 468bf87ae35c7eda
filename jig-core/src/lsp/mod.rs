//! LSP client supervisor
//!
//! One language-server subprocess per configured server, speaking LSP over
//! stdio. The runtime's interest is narrow: keep servers fed with
//! open/change notifications after `view`/`edit`/`write`, and read back
//! `publishDiagnostics` so edit tools can append warnings to their output.

mod client;
mod supervisor;

pub use client::LspClient;
pub use supervisor::{LspServerState, LspSupervisor};

use serde::{Deserialize, Serialize};

/// Errors from the LSP subsystem
#[derive(Debug, thiserror::Error)]
pub enum LspError {
    #[error("failed to spawn '{0}': {1}")]
    Spawn(String, std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server '{0}' timed out")]
    Timeout(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server exited")]
    ServerExited,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A zero-based position in a document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// A range in a document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// One published diagnostic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: Range,
    #[serde(default)]
    pub severity: Option<u8>,
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn severity_label(&self) -> &'static str {
        match self.severity {
            Some(1) => "error",
            Some(2) => "warning",
            Some(3) => "info",
            Some(4) => "hint",
            _ => "diagnostic",
        }
    }

    /// One-line rendering appended to edit tool output
    pub fn render(&self, path: &std::path::Path) -> String {
        format!(
            "{}:{}:{} {}: {}",
            path.display(),
            self.range.start.line + 1,
            self.range.start.character + 1,
            self.severity_label(),
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_render_one_based() {
        let diag = Diagnostic {
            range: Range {
                start: Position {
                    line: 4,
                    character: 7,
                },
                end: Position::default(),
            },
            severity: Some(1),
            message: "unused variable".to_string(),
            source: Some("rustc".to_string()),
        };
        assert_eq!(
            diag.render(std::path::Path::new("/src/main.rs")),
            "/src/main.rs:5:8 error: unused variable"
        );
    }

    #[test]
    fn test_severity_labels() {
        let mut diag = Diagnostic {
            range: Range::default(),
            severity: Some(2),
            message: String::new(),
            source: None,
        };
        assert_eq!(diag.severity_label(), "warning");
        diag.severity = None;
        assert_eq!(diag.severity_label(), "diagnostic");
    }

    #[test]
    fn test_diagnostic_deserializes_from_lsp_payload() {
        let json = r#"{
            "range": {"start": {"line": 0, "character": 2}, "end": {"line": 0, "character": 9}},
            "severity": 2,
            "message": "unused import",
            "source": "rust-analyzer",
            "code": "unused_imports"
        }"#;
        let diag: Diagnostic = serde_json::from_str(json).unwrap();
        assert_eq!(diag.severity, Some(2));
        assert_eq!(diag.range.start.character, 2);
    }
}
