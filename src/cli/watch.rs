use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use pulseboard_event_bus::{EventEnvelope, EventKind};
use pulseboard_state_center::FlowBoard;
use pulseboard_stream_client::{ConnectionStatus, HttpStreamTransport, StreamClient};
use tracing::{info, warn};

use super::context::CliContext;
use super::output::OutputFormat;

#[derive(Args, Clone, Debug)]
pub struct WatchArgs {
    /// Only print these event kinds (comma separated, e.g. flow-started,cost-alert)
    #[arg(long, value_delimiter = ',')]
    pub kinds: Vec<String>,

    /// Write the final flow board to this file on exit
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,

    /// Connect timeout in seconds for each stream attempt
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,
}

pub fn parse_kinds(raw: &[String]) -> Result<Vec<EventKind>> {
    if raw.is_empty() {
        return Ok(EventKind::ALL.to_vec());
    }
    raw.iter()
        .map(|kind| {
            kind.trim()
                .parse::<EventKind>()
                .with_context(|| format!("unknown event kind '{kind}'"))
        })
        .collect()
}

pub async fn cmd_watch(args: WatchArgs, ctx: &CliContext) -> Result<()> {
    let kinds = parse_kinds(&args.kinds)?;
    let services = ctx.services().await?;
    let config = ctx.config();
    let endpoint = services
        .api
        .config()
        .url_for(&config.stream.path)
        .context("Invalid stream.path")?;
    let token = services.tokens.access_token().unwrap_or_default();

    let transport = Arc::new(
        HttpStreamTransport::new(Duration::from_secs(args.connect_timeout.max(1)))
            .context("Failed to build stream transport")?,
    );
    let client = StreamClient::new(transport, config.stream_config())
        .with_token_store(Arc::clone(&services.tokens))
        .with_refresh_hook(services.session.clone());

    let board = Arc::new(FlowBoard::default());
    board.attach(&client.bus());

    let format = ctx.output();
    for kind in kinds {
        client.subscribe(kind, move |envelope| print_envelope(format, envelope));
    }
    client.on_connection_change(|status| match status {
        ConnectionStatus::Connected => info!("stream connected"),
        ConnectionStatus::Disconnected => warn!("stream disconnected; reconnecting"),
        ConnectionStatus::Failed { attempts } => {
            warn!(attempts, "stream gave up reconnecting; press Ctrl-C to exit")
        }
    });

    client
        .connect(endpoint.as_str(), token)
        .context("Failed to start stream")?;
    eprintln!("Watching {endpoint} (Ctrl-C to stop)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    client.disconnect();

    let stats = board.stats();
    let active = board.active_flows();
    eprintln!(
        "Stopped. {} active flow(s); started {}, completed {}, failed {}; {} cost alert(s)",
        active.len(),
        stats.flows_started,
        stats.flows_completed,
        stats.flows_failed,
        stats.cost_alerts
    );
    for flow in active {
        eprintln!("  still running: {}", flow.id);
    }
    if let Some(path) = args.snapshot {
        board
            .write_snapshot(&path)
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        eprintln!("Board snapshot written to {}", path.display());
    }
    Ok(())
}

fn print_envelope(format: OutputFormat, envelope: &EventEnvelope) {
    match format {
        OutputFormat::Json | OutputFormat::Yaml => match serde_json::to_string(envelope) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(?err, "failed to encode envelope"),
        },
        OutputFormat::Human => {
            let subject = envelope
                .subject_id
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            if envelope.payload.is_null() {
                println!("{:<22} {}", envelope.kind.as_str(), subject);
            } else {
                println!("{:<22} {} {}", envelope.kind.as_str(), subject, envelope.payload);
            }
        }
    }
}
