use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "fireplan",
    about = "FIRE planner (net-worth snapshots + cash-flow forecast + retirement projection)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server and web UI
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(
            long,
            help = "Data directory for persisted records; defaults to ~/.fireplan"
        )]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { port, data_dir } => {
            let data_dir = data_dir.unwrap_or_else(fireplan::store::Store::default_path);
            if let Err(e) = fireplan::api::run_http_server(port, data_dir).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
    }
}
