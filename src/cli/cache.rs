use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use super::context::CliContext;
use super::output::print_document;

#[derive(Args, Clone, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum CacheAction {
    /// Show server cache statistics
    Stats,

    /// Clear the server cache
    Clear,
}

pub async fn cmd_cache(args: CacheArgs, ctx: &CliContext) -> Result<()> {
    let services = ctx.services().await?;
    match args.action {
        CacheAction::Stats => {
            let stats = services
                .api
                .cache_stats()
                .await
                .context("Failed to fetch cache stats")?;
            print_document(ctx.output(), &stats)
        }
        CacheAction::Clear => {
            services
                .api
                .clear_server_cache()
                .await
                .context("Failed to clear server cache")?;
            println!("Server cache cleared");
            Ok(())
        }
    }
}
