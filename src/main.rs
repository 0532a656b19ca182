use clap::Parser;

use tinycoin::cli::{run, Cli};

#[tokio::main]
async fn main() {
    env_logger::init();

    let node_id = match std::env::var("NODE_ID") {
        Ok(id) if !id.is_empty() => id,
        _ => {
            eprintln!("NODE_ID env is not set");
            std::process::exit(1);
        }
    };

    let cli = Cli::parse();
    if let Err(e) = run(cli, &node_id).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
