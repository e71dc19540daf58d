//! Notebook model and the coordinator that runs notebooks to completion.

pub mod api;
pub mod coordinator;
pub mod error;
pub mod model;

pub use api::ExecutionApi;
pub use coordinator::{ExecutionCoordinator, ExecutionHandle};
pub use error::RunnerError;
pub use model::{
    Cell, CellResult, CellResultKind, CellType, Execution, ExecutionReport, ExecutionStatus,
    Notebook, NotebookTemplate, RunnerConfig,
};
