use anyhow::{Context, Result};
use clap::Args;
use pulseboard_core_types::ProjectId;
use pulseboard_state_center::DashboardService;

use super::context::CliContext;
use super::output::print_document;

#[derive(Args, Clone, Debug)]
pub struct SummaryArgs {
    /// Narrow the summary to one project
    #[arg(long, value_name = "ID")]
    pub project: Option<String>,

    /// Bypass any cached summary
    #[arg(long)]
    pub refresh: bool,
}

pub async fn cmd_summary(args: SummaryArgs, ctx: &CliContext) -> Result<()> {
    let services = ctx.services().await?;
    let dashboard = DashboardService::new(services.api.clone(), ctx.config().dashboard_ttl());
    dashboard.set_scope(args.project.map(ProjectId::from));

    let fetched = if args.refresh {
        dashboard.refresh().await
    } else {
        dashboard.current().await
    };
    let summary = fetched.context("Failed to fetch dashboard summary")?;

    print_document(ctx.output(), &summary)
}
