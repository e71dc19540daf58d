use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use pulseboard_core_types::NotebookId;
use pulseboard_notebook_runner::{
    Execution, ExecutionApi, ExecutionCoordinator, ExecutionStatus, Notebook,
};
use tokio::time::{sleep_until, Instant};
use tracing::info;

use super::context::CliContext;
use super::output::{print_document, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct NotebookArgs {
    #[command(subcommand)]
    pub action: NotebookAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum NotebookAction {
    /// List notebooks
    List,

    /// Show one notebook and its cells
    Show {
        /// Notebook id
        id: String,
    },

    /// List the templates new notebooks can start from
    Templates,

    /// Execute a notebook and follow it until it finishes
    Run {
        /// Notebook id
        id: String,

        /// Give up (and stop polling) after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
}

pub async fn cmd_notebook(args: NotebookArgs, ctx: &CliContext) -> Result<()> {
    let services = ctx.services().await?;
    let api = &services.api;
    match args.action {
        NotebookAction::List => {
            let notebooks = api.list_notebooks().await.context("Failed to list notebooks")?;
            if ctx.output() == OutputFormat::Human {
                print_notebook_table(&notebooks);
                Ok(())
            } else {
                print_document(ctx.output(), &notebooks)
            }
        }
        NotebookAction::Show { id } => {
            let notebook = api
                .get_notebook(&NotebookId::from(id.as_str()))
                .await
                .with_context(|| format!("Failed to load notebook {id}"))?;
            print_document(ctx.output(), &notebook)
        }
        NotebookAction::Templates => {
            let templates = api
                .notebook_templates()
                .await
                .context("Failed to list notebook templates")?;
            print_document(ctx.output(), &templates)
        }
        NotebookAction::Run { id, timeout } => {
            let coordinator =
                ExecutionCoordinator::new(services.api.clone(), ctx.config().runner_config());
            let finished = run_to_completion(
                &coordinator,
                &NotebookId::from(id.as_str()),
                timeout.map(Duration::from_secs),
                ctx.output(),
            )
            .await;
            coordinator.dispose();
            let execution = finished?;
            print_document(ctx.output(), &execution)?;
            if execution.cancelled {
                bail!("execution {} was cancelled before finishing", execution.id);
            }
            if execution.status == ExecutionStatus::Failed {
                bail!(
                    "execution {} failed: {}",
                    execution.id,
                    execution.error.as_deref().unwrap_or("no error message")
                );
            }
            Ok(())
        }
    }
}

async fn run_to_completion<A>(
    coordinator: &ExecutionCoordinator<A>,
    notebook_id: &NotebookId,
    timeout: Option<Duration>,
    format: OutputFormat,
) -> Result<Execution>
where
    A: ExecutionApi + 'static,
{
    let handle = coordinator
        .submit(notebook_id)
        .await
        .with_context(|| format!("Failed to submit notebook {notebook_id}"))?;
    info!(execution = %handle.id, "notebook submitted");

    let mut updates = handle.updates();
    let deadline = timeout.map(|limit| Instant::now() + limit);
    let mut reported_cells = 0usize;
    loop {
        let current = updates.borrow_and_update().clone();
        if format == OutputFormat::Human && current.results.len() != reported_cells {
            reported_cells = current.results.len();
            eprintln!(
                "{}: {} ({} cell result(s))",
                current.id, current.status, reported_cells
            );
        }
        if current.is_settled() {
            return Ok(current);
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(handle.snapshot());
                }
            }
            _ = wait_for(deadline) => {
                coordinator.cancel(&handle.id)?;
                bail!(
                    "execution {} did not finish within {}",
                    handle.id,
                    humantime::format_duration(timeout.unwrap_or_default())
                );
            }
            _ = tokio::signal::ctrl_c() => {
                coordinator.cancel(&handle.id)?;
                eprintln!("Interrupted; stopped polling {}", handle.id);
                return Ok(handle.snapshot());
            }
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn print_notebook_table(notebooks: &[Notebook]) {
    if notebooks.is_empty() {
        println!("No notebooks");
        return;
    }
    println!("{:<38} {:<6} TITLE", "ID", "CELLS");
    for notebook in notebooks {
        println!(
            "{:<38} {:<6} {}",
            notebook.id.as_str(),
            notebook.cells.len(),
            notebook.title
        );
    }
}
