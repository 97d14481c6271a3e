//! Terminal chat client.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin chatlink-client -- --user-id alice --url ws://127.0.0.1:8080/ws
//! ```

use chatlink_client::{Args, run_client};
use chatlink_shared::logger::setup_logger;
use clap::Parser;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), &args.log_level);

    if let Err(e) = run_client(args).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
