use super::cache::cmd_cache;
use super::config::cmd_config;
use super::cpi::cmd_cpi;
use super::env::CliArgs;
use super::info::cmd_info;
use super::notebook::cmd_notebook;
use super::summary::cmd_summary;
use super::watch::cmd_watch;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Watch(args) => cmd_watch(args, ctx).await,
        Commands::Summary(args) => cmd_summary(args, ctx).await,
        Commands::Notebook(args) => cmd_notebook(args, ctx).await,
        Commands::Cpi(args) => cmd_cpi(args, ctx).await,
        Commands::Cache(args) => cmd_cache(args, ctx).await,
        Commands::Config(args) => cmd_config(args, ctx),
        Commands::Info => cmd_info(ctx),
    }
}
