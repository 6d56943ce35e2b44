//! lakeforge CLI: declarative data and ML platform stacks.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "lakeforge",
    version,
    about = "Compose per-environment data lake and ML platform stacks, deployed through the provider CLI"
)]
struct Cli {
    #[command(flatten)]
    globals: lakeforge::cli::GlobalArgs,

    #[command(subcommand)]
    command: lakeforge::cli::Commands,
}

fn main() {
    let filter = EnvFilter::try_from_env("LAKEFORGE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(e) = lakeforge::cli::dispatch(&cli.globals, cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
