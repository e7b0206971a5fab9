// pow-ledger node - CLI

use clap::Parser;
use pow_ledger::{Cli, CliHandler, NodeConfig};

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let config = match NodeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let handler = CliHandler::new(config);
    if let Err(e) = handler.handle(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
