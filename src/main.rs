// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use commands::{PromoteArgs, SyncArgs};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = commands::load_config(cli.config.as_deref(), cli.root)?;

    match cli.command {
        Commands::List {
            channel,
            name,
            os,
            newest,
            json,
        } => commands::cmd_list(&config, &channel, name, os, newest, json),

        Commands::Promote {
            name,
            from,
            to,
            os,
            version,
            exclude,
            dry_run,
            force,
            no_sign_check,
            advisories,
            advisories_format,
            json,
        } => commands::cmd_promote(
            &config,
            PromoteArgs {
                name,
                from,
                to,
                os,
                version,
                exclude,
                dry_run,
                force,
                no_sign_check,
                advisories,
                advisories_format,
                json,
            },
        ),

        Commands::Sync {
            source,
            bucket,
            prefix,
            mirror,
            delete,
            compare,
            since,
            concurrency,
            dry_run,
            json,
        } => commands::cmd_sync(
            &config,
            SyncArgs {
                source,
                bucket,
                prefix,
                mirror,
                delete,
                compare,
                since,
                concurrency,
                dry_run,
                json,
            },
        ),

        Commands::Delink { path, fast } => commands::cmd_delink(&config, path, fast),
    }
}
