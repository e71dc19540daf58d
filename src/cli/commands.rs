use clap::Subcommand;

use super::cache::CacheArgs;
use super::config::ConfigArgs;
use super::cpi::CpiArgs;
use super::notebook::NotebookArgs;
use super::summary::SummaryArgs;
use super::watch::WatchArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Follow the live event stream and the flows it reports
    Watch(WatchArgs),

    /// Show the dashboard summary
    Summary(SummaryArgs),

    /// List, inspect and run notebooks
    Notebook(NotebookArgs),

    /// Cost-per-interaction analysis
    Cpi(CpiArgs),

    /// Inspect or clear the server-side cache
    Cache(CacheArgs),

    /// Show the effective configuration
    Config(ConfigArgs),

    /// Show build and connection information
    Info,
}
