use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "pxm",
    author,
    version,
    about = "Package index mirror file store",
    disable_help_subcommand = true
)]
pub struct PxmCli {
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)", global = true)]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v", global = true)]
    pub trace: bool,
    #[arg(
        long,
        value_name = "DIR",
        help = "Server directory holding the keyfs (overrides PXM_SERVERDIR)",
        global = true
    )]
    pub serverdir: Option<PathBuf>,
    #[arg(long, help = "Emit {status,message,details} JSON envelopes", global = true)]
    pub json: bool,
    #[command(subcommand)]
    pub command: CommandKind,
}

#[derive(Subcommand, Debug)]
pub enum CommandKind {
    #[command(about = "Download a link into the store, verifying size and hash.")]
    Fetch {
        #[arg(value_name = "URL", help = "Upstream link, optionally with #<algo>=<hex> or #egg=<name>")]
        url: String,
    },
    #[command(about = "Store a local file as an upload to USER/INDEX.")]
    Upload {
        #[arg(value_name = "USER/INDEX")]
        target: String,
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    #[command(about = "Write a cached blob to stdout.")]
    Cat {
        #[arg(value_name = "RELPATH")]
        relpath: String,
    },
    #[command(about = "Remove an entry and its blob.")]
    Rm {
        #[arg(value_name = "RELPATH")]
        relpath: String,
    },
    #[command(about = "List recorded entries.")]
    Ls,
    #[command(about = "Emit one search-index document per project of a model snapshot.")]
    Index {
        #[arg(value_name = "MODEL_JSON")]
        model: PathBuf,
    },
}

impl CommandKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Fetch { .. } => "fetch",
            CommandKind::Upload { .. } => "upload",
            CommandKind::Cat { .. } => "cat",
            CommandKind::Rm { .. } => "rm",
            CommandKind::Ls => "ls",
            CommandKind::Index { .. } => "index",
        }
    }
}
