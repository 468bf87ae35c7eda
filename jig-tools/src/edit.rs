//! The `edit` and `batch_edit` tools: targeted string replacement
//!
//! Replacements require the file to have been viewed and unchanged since
//! (the tracker's staleness check), and the `old_string` to be unique
//! unless `replace_all` is set. Writes are atomic (temp file + rename), a
//! file version is snapshotted for the session, and LSP diagnostics are
//! appended to the response.

use crate::{Deps, FileTracker};
use async_trait::async_trait;
use jig_core::permission::PermissionRequest;
use jig_core::tool::{Tool, ToolCallInput, ToolError, ToolInfo, ToolOutput};
use jig_core::{RunContext, Schema};
use schemars::JsonSchema;
use serde::Deserialize;
use similar::TextDiff;
use std::path::Path;

#[derive(Deserialize, Clone)]
pub(crate) struct Replacement {
    pub old_string: String,
    pub new_string: String,
}

#[derive(Deserialize, JsonSchema)]
struct EditInput {
    /// The file to edit
    path: String,
    /// Exact text to replace; must appear exactly once unless replace_all
    old_string: String,
    /// Replacement text
    new_string: String,
    /// Replace every occurrence instead of requiring uniqueness
    #[serde(default)]
    replace_all: bool,
}

#[derive(Deserialize)]
struct BatchEditInput {
    path: String,
    edits: Vec<Replacement>,
}

fn batch_edit_schema() -> Schema {
    let replacement = Schema::object(
        [
            (
                "old_string",
                Schema::string("Exact text to replace; must match uniquely"),
            ),
            ("new_string", Schema::string("Replacement text")),
        ],
        &["old_string", "new_string"],
    );
    Schema::object(
        [
            ("path", Schema::string("The file to edit")),
            (
                "edits",
                Schema::array_of(
                    replacement,
                    "Replacements applied in order; each must match uniquely",
                ),
            ),
        ],
        &["path", "edits"],
    )
}

pub struct EditTool {
    deps: Deps,
}

pub struct BatchEditTool {
    deps: Deps,
}

impl EditTool {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }
}

impl BatchEditTool {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn info(&self) -> ToolInfo {
        ToolInfo::new(
            "edit",
            "Replace an exact string in a previously viewed file. The \
             old_string must match uniquely; include surrounding lines to \
             disambiguate, or set replace_all. Returns a unified diff.",
            Schema::of::<EditInput>(),
        )
    }

    async fn run(&self, ctx: &RunContext, call: ToolCallInput) -> Result<ToolOutput, ToolError> {
        let input: EditInput = call.parse()?;
        let replacements = vec![Replacement {
            old_string: input.old_string,
            new_string: input.new_string,
        }];
        apply_edits(
            &self.deps,
            ctx,
            &call,
            "edit",
            &input.path,
            &replacements,
            input.replace_all,
        )
        .await
    }
}

#[async_trait]
impl Tool for BatchEditTool {
    fn name(&self) -> &str {
        "batch_edit"
    }

    fn info(&self) -> ToolInfo {
        ToolInfo::new(
            "batch_edit",
            "Apply several unique string replacements to one file in a \
             single atomic write. Each old_string must match exactly once.",
            batch_edit_schema(),
        )
    }

    async fn run(&self, ctx: &RunContext, call: ToolCallInput) -> Result<ToolOutput, ToolError> {
        let input: BatchEditInput = call.parse()?;
        if input.edits.is_empty() {
            return Ok(ToolOutput::error("no edits given"));
        }
        apply_edits(
            &self.deps,
            ctx,
            &call,
            "batch_edit",
            &input.path,
            &input.edits,
            false,
        )
        .await
    }
}

async fn apply_edits(
    deps: &Deps,
    ctx: &RunContext,
    call: &ToolCallInput,
    tool_name: &str,
    path: &str,
    replacements: &[Replacement],
    replace_all: bool,
) -> Result<ToolOutput, ToolError> {
    let path = ctx.resolve_path(path);

    if let Some(refusal) = mutation_refusal(deps.tracker(), &path) {
        return Ok(refusal);
    }

    let old_content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| ToolError::Custom(format!("cannot read {}: {}", path.display(), e)))?;

    let mut new_content = old_content.clone();
    for replacement in replacements {
        new_content = match replace_unique(&new_content, replacement, replace_all) {
            Ok(content) => content,
            Err(message) => return Ok(ToolOutput::error(message)),
        };
    }
    if new_content == old_content {
        return Ok(ToolOutput::error("edit produced no change"));
    }

    let request = PermissionRequest::new(
        ctx,
        call.call_id.clone(),
        tool_name,
        "edit",
        format!("edit {}", path.display()),
        call.params(),
    )
    .with_path(&path);
    if !deps.permissions()?.request(ctx, request).await {
        return Err(ToolError::PermissionDenied);
    }

    let diff = unified_diff(&path, &old_content, &new_content);
    atomic_write(&path, &new_content).await?;
    finish_mutation(deps, ctx, &path, &new_content).await;

    let diagnostics = collect_diagnostics(deps, &path).await;
    let mut content = diff;
    if !diagnostics.is_empty() {
        content.push_str("\n\nDiagnostics:\n");
        content.push_str(&diagnostics);
    }
    Ok(ToolOutput::text_capped(content))
}

/// The staleness gate shared by edit/write
pub(crate) fn mutation_refusal(tracker: &FileTracker, path: &Path) -> Option<ToolOutput> {
    match tracker.freshness(path) {
        crate::tracker::Freshness::Fresh => None,
        crate::tracker::Freshness::NotRead => Some(ToolOutput::error(format!(
            "{} has not been viewed yet; view it before modifying it",
            path.display()
        ))),
        crate::tracker::Freshness::Stale => Some(ToolOutput::error(format!(
            "{} changed on disk after it was last viewed; view it again first",
            path.display()
        ))),
    }
}

fn replace_unique(
    content: &str,
    replacement: &Replacement,
    replace_all: bool,
) -> Result<String, String> {
    let count = content.matches(&replacement.old_string).count();
    match count {
        0 => Err(format!(
            "old_string not found in file: {:?}",
            preview(&replacement.old_string)
        )),
        1 => Ok(content.replacen(&replacement.old_string, &replacement.new_string, 1)),
        n if replace_all => {
            let _ = n;
            Ok(content.replace(&replacement.old_string, &replacement.new_string))
        }
        n => Err(format!(
            "old_string appears {} times; add surrounding context to make it \
             unique, or set replace_all",
            n
        )),
    }
}

fn preview(s: &str) -> String {
    if s.len() > 80 {
        format!("{}…", &s[..80])
    } else {
        s.to_string()
    }
}

pub(crate) fn unified_diff(path: &Path, old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    diff.unified_diff()
        .context_radius(3)
        .header(
            &format!("{} (before)", path.display()),
            &format!("{} (after)", path.display()),
        )
        .to_string()
}

/// Write via a sibling temp file and rename, so readers never see a torn
/// file.
pub(crate) async fn atomic_write(path: &Path, content: &str) -> Result<(), ToolError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(
        ".{}.jig-tmp-{}",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string()),
        std::process::id()
    ));
    tokio::fs::write(&tmp, content).await?;
    match tokio::fs::rename(&tmp, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            Err(e.into())
        }
    }
}

/// Post-write bookkeeping: refresh the read timestamp, snapshot the file
/// version for the session, and feed the LSP servers.
pub(crate) async fn finish_mutation(deps: &Deps, ctx: &RunContext, path: &Path, content: &str) {
    deps.tracker().mark_read(path);
    if let Ok(sessions) = deps.sessions() {
        if let Err(e) = sessions
            .snapshot_file_version(ctx.session_id(), path, content)
            .await
        {
            log::debug!("file snapshot failed for {}: {}", path.display(), e);
        }
    }
    if let Ok(lsp) = deps.lsp() {
        if lsp.handles(path) {
            lsp.sync_file(path, content).await;
        }
    }
}

/// Rendered diagnostics after a mutation (bounded wait), empty when no
/// server covers the file.
pub(crate) async fn collect_diagnostics(deps: &Deps, path: &Path) -> String {
    let lsp = match deps.lsp() {
        Ok(lsp) if lsp.handles(path) => lsp,
        _ => return String::new(),
    };
    lsp.diagnostics(path, true)
        .await
        .iter()
        .map(|d| d.render(path))
        .collect::<Vec<_>>()
        .join("\n")
}
