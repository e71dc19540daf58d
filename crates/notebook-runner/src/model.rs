use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pulseboard_core_types::{CellId, ExecutionId, NotebookId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    Markdown,
    Query,
    Visualization,
    Insight,
}

impl CellType {
    /// Markdown cells carry notes only; the server never produces output for them.
    pub fn is_executable(self) -> bool {
        !matches!(self, CellType::Markdown)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    #[serde(rename = "type")]
    pub cell_type: CellType,
    #[serde(default)]
    pub content: String,
}

impl Cell {
    pub fn new(cell_type: CellType, content: impl Into<String>) -> Self {
        Self {
            id: CellId::new(),
            cell_type,
            content: content.into(),
        }
    }
}

/// A notebook as the user edits it. Cell outputs are not stored here; they
/// belong to the execution that produced them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub id: NotebookId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub cells: Vec<Cell>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Notebook {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: NotebookId::new(),
            title: title.into(),
            description: None,
            cells: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn from_template(template: &NotebookTemplate) -> Self {
        let mut notebook = Self::new(template.name.clone());
        notebook.description = template.description.clone();
        for cell in &template.cells {
            notebook.add_cell(cell.cell_type, cell.content.clone());
        }
        notebook
    }

    pub fn cell(&self, id: &CellId) -> Option<&Cell> {
        self.cells.iter().find(|cell| &cell.id == id)
    }

    pub fn add_cell(&mut self, cell_type: CellType, content: impl Into<String>) -> CellId {
        let cell = Cell::new(cell_type, content);
        let id = cell.id.clone();
        self.cells.push(cell);
        id
    }

    pub fn remove_cell(&mut self, id: &CellId) -> Option<Cell> {
        let index = self.position(id)?;
        Some(self.cells.remove(index))
    }

    /// Moves a cell to `index`, clamped to the end of the list.
    pub fn move_cell(&mut self, id: &CellId, index: usize) -> bool {
        let Some(from) = self.position(id) else {
            return false;
        };
        let cell = self.cells.remove(from);
        let to = index.min(self.cells.len());
        self.cells.insert(to, cell);
        true
    }

    pub fn update_cell_content(&mut self, id: &CellId, content: impl Into<String>) -> bool {
        match self.cells.iter_mut().find(|cell| &cell.id == id) {
            Some(cell) => {
                cell.content = content.into();
                true
            }
            None => false,
        }
    }

    fn position(&self, id: &CellId) -> Option<usize> {
        self.cells.iter().position(|cell| &cell.id == id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotebookTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cells: Vec<Cell>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellResultKind {
    QueryResult,
    Visualization,
    Insights,
    Error,
}

/// Output of one cell. The coordinator carries `data` opaquely; only the
/// presentation layer interprets its shape, keyed by `kind`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellResult {
    #[serde(rename = "type")]
    pub kind: CellResultKind,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl CellResult {
    pub fn new(kind: CellResultKind, data: Map<String, Value>) -> Self {
        Self { kind, data }
    }

    pub fn is_error(&self) -> bool {
        self.kind == CellResultKind::Error
    }

    pub fn error_message(&self) -> Option<&str> {
        if !self.is_error() {
            return None;
        }
        self.data
            .get("error")
            .or_else(|| self.data.get("message"))
            .and_then(Value::as_str)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[serde(alias = "pending", alias = "queued")]
    Running,
    #[serde(alias = "success", alias = "succeeded")]
    Completed,
    #[serde(alias = "error")]
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// What the remote `execute` and `get execution` operations return.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    #[serde(alias = "execution_id")]
    pub id: ExecutionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notebook_id: Option<NotebookId>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub results: BTreeMap<CellId, CellResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        alias = "completed_at",
        skip_serializing_if = "Option::is_none"
    )]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionReport {
    pub fn running(id: ExecutionId) -> Self {
        Self {
            id,
            notebook_id: None,
            status: ExecutionStatus::Running,
            results: BTreeMap::new(),
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_result(mut self, cell: impl Into<CellId>, result: CellResult) -> Self {
        self.results.insert(cell.into(), result);
        self
    }
}

/// Client-side view of one notebook run. Only the coordinator mutates it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub notebook_id: NotebookId,
    pub status: ExecutionStatus,
    pub results: BTreeMap<CellId, CellResult>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub cancelled: bool,
    pub polls: u32,
}

impl Execution {
    pub fn from_report(notebook_id: NotebookId, report: ExecutionReport) -> Self {
        let mut execution = Self {
            id: report.id.clone(),
            notebook_id: report.notebook_id.clone().unwrap_or(notebook_id),
            status: ExecutionStatus::Running,
            results: BTreeMap::new(),
            started_at: report.started_at.unwrap_or_else(Utc::now),
            ended_at: None,
            error: None,
            cancelled: false,
            polls: 0,
        };
        execution.merge(report);
        execution
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// No further updates will be applied: terminal or cancelled.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || self.cancelled
    }

    pub fn result(&self, cell: &CellId) -> Option<&CellResult> {
        self.results.get(cell)
    }

    /// Replaces the results present in `report` by key, leaving the others
    /// untouched, then takes over its status. Returns whether the execution is
    /// now terminal. Reports arriving after a terminal status are ignored.
    pub fn merge(&mut self, report: ExecutionReport) -> bool {
        if self.is_terminal() {
            return true;
        }
        self.results.extend(report.results);
        self.status = report.status;
        if report.error.is_some() {
            self.error = report.error;
        }
        if self.status.is_terminal() {
            self.ended_at = Some(report.ended_at.unwrap_or_else(Utc::now));
        }
        self.is_terminal()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunnerConfig {
    pub poll_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
        }
    }
}
