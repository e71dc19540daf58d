use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::Value;

use super::context::CliContext;
use super::output::print_document;

#[derive(Args, Clone, Debug)]
pub struct CpiArgs {
    #[command(subcommand)]
    pub action: CpiAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum CpiAction {
    /// Compare cost per interaction across the periods or segments in the request
    Compare {
        /// Comparison request as a JSON document, or @FILE to read it from disk
        #[arg(long)]
        request: String,
    },
}

pub async fn cmd_cpi(args: CpiArgs, ctx: &CliContext) -> Result<()> {
    match args.action {
        CpiAction::Compare { request } => {
            let body = read_request(&request).await?;
            let services = ctx.services().await?;
            let result = services
                .api
                .compare_cpi(&body)
                .await
                .context("CPI comparison failed")?;
            print_document(ctx.output(), &result)
        }
    }
}

async fn read_request(raw: &str) -> Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read request file {path}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("Request is not valid JSON")
}
