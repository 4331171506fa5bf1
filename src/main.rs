use clap::Parser;
use tracing_subscriber::EnvFilter;

use inferload::cli::Cli;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = Cli::parse().run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
