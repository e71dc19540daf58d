use anyhow::Result;

use super::context::CliContext;

pub fn cmd_info(ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    println!("Pulseboard v{}", env!("CARGO_PKG_VERSION"));
    println!("  commit:      {} ({})", env!("GIT_HASH"), env!("GIT_BRANCH"));
    println!("  built:       {}", env!("BUILD_DATE"));
    println!("  config:      {}", ctx.config_path().display());
    println!("  api:         {}", config.api.base_url);
    println!("  stream path: {}", config.stream.path);
    println!(
        "  credentials: {}",
        match (&config.auth.access_token, &config.auth.refresh_token) {
            (Some(_), Some(_)) => "access + refresh token",
            (Some(_), None) => "access token only",
            (None, Some(_)) => "refresh token only",
            (None, None) => "none",
        }
    );
    Ok(())
}
