//! The `todo` tool: a per-session task list
//!
//! The model replaces the whole list each call; the store keeps one list
//! per session so concurrent sessions do not see each other's plans.

use crate::Deps;
use async_trait::async_trait;
use jig_core::tool::{Tool, ToolCallInput, ToolError, ToolInfo, ToolOutput};
use jig_core::{RunContext, Schema};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
}

#[derive(Deserialize)]
struct TodoInput {
    /// The full task list; replaces the previous one. Omitted = read-only.
    todos: Option<Vec<TodoItem>>,
}

fn todo_schema() -> Schema {
    let status = Schema::String {
        description: Some("Task state".to_string()),
        enum_values: vec![
            "pending".to_string(),
            "in_progress".to_string(),
            "completed".to_string(),
        ],
    };
    let item = Schema::object(
        [
            ("content", Schema::string("What needs doing")),
            ("status", status),
        ],
        &["content", "status"],
    );
    Schema::object(
        [(
            "todos",
            Schema::array_of(
                item,
                "The full task list; replaces the previous one. Omit to read \
                 the current list.",
            ),
        )],
        &[],
    )
}

/// Per-session task lists
#[derive(Default)]
pub struct TodoStore {
    lists: Mutex<HashMap<String, Vec<TodoItem>>>,
}

impl TodoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Vec<TodoItem> {
        self.lists
            .lock()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn replace(&self, session_id: &str, todos: Vec<TodoItem>) {
        self.lists.lock().insert(session_id.to_string(), todos);
    }
}

pub struct TodoTool {
    deps: Deps,
}

impl TodoTool {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Tool for TodoTool {
    fn name(&self) -> &str {
        "todo"
    }

    fn info(&self) -> ToolInfo {
        ToolInfo::new(
            "todo",
            "Track the plan for multi-step work. Pass the full todos list to \
             replace it (statuses: pending, in_progress, completed); call \
             with no arguments to read the current list.",
            todo_schema(),
        )
    }

    async fn run(&self, ctx: &RunContext, call: ToolCallInput) -> Result<ToolOutput, ToolError> {
        let input: TodoInput = call.parse()?;
        let store = &self.deps.todos;

        let todos = match input.todos {
            Some(todos) => {
                store.replace(ctx.session_id(), todos.clone());
                todos
            }
            None => store.get(ctx.session_id()),
        };

        if todos.is_empty() {
            return Ok(ToolOutput::text("no todos"));
        }
        let rendered = todos
            .iter()
            .map(|item| {
                let marker = match item.status {
                    TodoStatus::Pending => "[ ]",
                    TodoStatus::InProgress => "[~]",
                    TodoStatus::Completed => "[x]",
                };
                format!("{} {}", marker, item.content)
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ToolOutput::text(rendered))
    }
}
