use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod utils;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Container image layer explorer")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export an image from the container engine and list its layers
    Analyze {
        /// Image name or id (e.g., alpine:3.20)
        image: String,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// List the layers of an image already exported with `docker save`
    Archive {
        /// Path to the exported tar archive
        path: PathBuf,
        #[command(flatten)]
        view: ViewArgs,
    },
}

#[derive(Args)]
pub struct ViewArgs {
    /// Print the file tree of the layer with this index
    #[arg(short, long)]
    tree: Option<usize>,
    /// Maximum depth of the printed tree
    #[arg(short, long, default_value = "3")]
    depth: usize,
    /// Keep going when a layer archive is corrupt
    #[arg(long)]
    allow_partial: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let result = match cli.command {
        Commands::Analyze { image, view } => {
            commands::analyze::execute(&image, &view, &cancel).await
        }
        Commands::Archive { path, view } => {
            commands::archive::execute(&path, &view, &cancel).await
        }
    };

    if let Err(e) = result {
        utils::print_error(&e.to_string());
        std::process::exit(1);
    }
}
