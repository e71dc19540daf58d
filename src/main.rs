use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    pulseboard_cli::cli::app::run().await
}
