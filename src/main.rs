// src/main.rs

use watchrun::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();

    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("watchrun: failed to set up logging: {err:#}");
        std::process::exit(1);
    }

    if let Err(err) = run(args).await {
        eprintln!("watchrun: {err:#}");
        std::process::exit(1);
    }
}
