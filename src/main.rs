use clap::Parser;

use toolbridge::commands::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = toolbridge::init_tracing(&toolbridge::data_dir()) {
        eprintln!("warning: file logging disabled: {e}");
    }

    if let Err(e) = commands::run(cli).await {
        tracing::error!(error = %format!("{e:#}"), "command failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
