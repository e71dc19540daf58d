use std::sync::Arc;

use async_trait::async_trait;
use pulseboard_core_types::{ExecutionId, NotebookId, SyncError};

use crate::model::ExecutionReport;

/// Remote operations the coordinator needs. The REST client implements this;
/// tests substitute scripted versions.
#[async_trait]
pub trait ExecutionApi: Send + Sync {
    /// Starts a run. Side-effecting: callers must not retry it blindly.
    async fn execute_notebook(&self, notebook_id: &NotebookId) -> Result<ExecutionReport, SyncError>;
    async fn get_execution(&self, execution_id: &ExecutionId) -> Result<ExecutionReport, SyncError>;
}

#[async_trait]
impl<A> ExecutionApi for Arc<A>
where
    A: ExecutionApi + ?Sized,
{
    async fn execute_notebook(&self, notebook_id: &NotebookId) -> Result<ExecutionReport, SyncError> {
        (**self).execute_notebook(notebook_id).await
    }

    async fn get_execution(&self, execution_id: &ExecutionId) -> Result<ExecutionReport, SyncError> {
        (**self).get_execution(execution_id).await
    }
}
