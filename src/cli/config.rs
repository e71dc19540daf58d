use anyhow::Result;
use clap::{Args, Subcommand};

use super::context::CliContext;
use super::output::{print_document, OutputFormat};
use crate::config::Config;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration (file plus environment overrides)
    Show,

    /// Print the configuration file path in use
    Path,
}

pub fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let redacted = redact(ctx.config());
            if ctx.output() == OutputFormat::Human {
                println!("Current configuration ({}):", ctx.config_path().display());
            }
            print_document(ctx.output(), &redacted)
        }
        ConfigAction::Path => {
            println!("{}", ctx.config_path().display());
            Ok(())
        }
    }
}

/// Tokens are never echoed back.
pub fn redact(config: &Config) -> Config {
    let mut redacted = config.clone();
    let mask = |token: &mut Option<String>| {
        if token.is_some() {
            *token = Some("********".to_string());
        }
    };
    mask(&mut redacted.auth.access_token);
    mask(&mut redacted.auth.refresh_token);
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_tokens_only() {
        let mut config = Config::default();
        config.auth.access_token = Some("secret".into());
        let redacted = redact(&config);
        assert_eq!(redacted.auth.access_token.as_deref(), Some("********"));
        assert_eq!(redacted.auth.refresh_token, None);
        assert_eq!(redacted.api, config.api);
    }
}
