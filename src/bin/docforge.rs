use std::sync::Arc;

use clap::Parser;
use docforge::cli::Cli;
use docforge::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(Config::from_env());
    docforge::logging::init(config.log_root.clone(), "docforge")?;

    let cli = Cli::parse();

    let exit_code = docforge::cli::run(cli, config).await;
    std::process::exit(exit_code);
}
