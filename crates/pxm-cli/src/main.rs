use std::io::{self, Write};

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use pxm_store::Config;
use serde_json::json;

mod cli;
mod commands;

use cli::PxmCli;
use commands::Outcome;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = PxmCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let mut config = Config::from_env().map_err(|err| eyre!("{err:?}"))?;
    if let Some(serverdir) = &cli.serverdir {
        config = config.with_serverdir(serverdir.clone());
    }
    tracing::debug!(
        serverdir = %config.serverdir().path.display(),
        source = config.serverdir().source,
        command = cli.command.name(),
        "resolved configuration"
    );

    let outcome = commands::execute(&config, &cli.command).map_err(|err| eyre!("{err:?}"))?;
    emit_output(&cli, outcome)
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!(
        "pxm={level},pxm_cli={level},pxm_store={level},pxm_keyfs={level},pxm_index={level}"
    );
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn emit_output(cli: &PxmCli, outcome: Outcome) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match outcome {
        Outcome::Bytes(content) => out.write_all(&content)?,
        Outcome::Lines(documents) => {
            for document in documents {
                writeln!(out, "{}", serde_json::to_string(&document)?)?;
            }
        }
        Outcome::Message { message, details } => {
            if cli.json {
                let payload = json!({
                    "status": "ok",
                    "command": cli.command.name(),
                    "message": message,
                    "details": details,
                });
                writeln!(out, "{}", serde_json::to_string_pretty(&payload)?)?;
            } else {
                writeln!(out, "{message}")?;
            }
        }
    }
    out.flush()?;
    Ok(())
}
