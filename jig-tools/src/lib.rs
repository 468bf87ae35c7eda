//! # jig-tools
//!
//! The built-in tools of the `jig` agent runtime: `shell`, `view`, `edit`,
//! `batch_edit`, `write`, `grep`, `glob`, `ls`, `fetch`, `download` and
//! `todo`. Each implements [`jig_core::Tool`]; side-effecting tools ask the
//! permission service before acting, file mutations go through the
//! read-timestamp tracker, and edits surface LSP diagnostics.

mod download;
mod edit;
mod fetch;
mod glob_tool;
mod grep;
mod ls;
mod shell;
mod todo;
mod tracker;
mod view;
mod write;

pub use download::DownloadTool;
pub use edit::{BatchEditTool, EditTool};
pub use fetch::FetchTool;
pub use glob_tool::GlobTool;
pub use grep::GrepTool;
pub use ls::LsTool;
pub use shell::ShellTool;
pub use todo::TodoTool;
pub use tracker::FileTracker;
pub use view::ViewTool;
pub use write::WriteTool;

use jig_core::permission::PermissionService;
use jig_core::runtime::Runtime;
use jig_core::session::SessionFacade;
use jig_core::tool::ToolError;
use jig_core::RuntimeOptions;
use std::sync::{Arc, Weak};

/// Shared handles the built-in tools run against
#[derive(Clone)]
pub struct Deps {
    runtime: Weak<Runtime>,
    tracker: Arc<FileTracker>,
    pub(crate) todos: Arc<todo::TodoStore>,
}

impl Deps {
    pub fn new(runtime: &Arc<Runtime>) -> Self {
        Self {
            runtime: Arc::downgrade(runtime),
            tracker: Arc::new(FileTracker::new()),
            todos: Arc::new(todo::TodoStore::new()),
        }
    }

    fn runtime(&self) -> Result<Arc<Runtime>, ToolError> {
        self.runtime
            .upgrade()
            .ok_or_else(|| ToolError::Custom("runtime is shutting down".to_string()))
    }

    fn permissions(&self) -> Result<Arc<PermissionService>, ToolError> {
        Ok(self.runtime()?.permissions().clone())
    }

    fn sessions(&self) -> Result<Arc<SessionFacade>, ToolError> {
        Ok(self.runtime()?.sessions().clone())
    }

    fn lsp(&self) -> Result<Arc<jig_core::lsp::LspSupervisor>, ToolError> {
        Ok(self.runtime()?.lsp())
    }

    fn options(&self) -> Result<RuntimeOptions, ToolError> {
        Ok(self.runtime()?.options())
    }

    pub fn tracker(&self) -> &Arc<FileTracker> {
        &self.tracker
    }
}

/// Register every built-in tool on the runtime's registry
pub fn register_builtins(runtime: &Arc<Runtime>) {
    let deps = Deps::new(runtime);
    runtime.register_tool(Arc::new(ShellTool::new(deps.clone())));
    runtime.register_tool(Arc::new(ViewTool::new(deps.clone())));
    runtime.register_tool(Arc::new(EditTool::new(deps.clone())));
    runtime.register_tool(Arc::new(BatchEditTool::new(deps.clone())));
    runtime.register_tool(Arc::new(WriteTool::new(deps.clone())));
    runtime.register_tool(Arc::new(GrepTool::new(deps.clone())));
    runtime.register_tool(Arc::new(GlobTool::new(deps.clone())));
    runtime.register_tool(Arc::new(LsTool::new(deps.clone())));
    runtime.register_tool(Arc::new(FetchTool::new(deps.clone())));
    runtime.register_tool(Arc::new(DownloadTool::new(deps.clone())));
    runtime.register_tool(Arc::new(TodoTool::new(deps)));
}

/// The ignore file consulted alongside `.gitignore` by grep/glob/ls
pub(crate) const IGNORE_FILE: &str = ".jigignore";
