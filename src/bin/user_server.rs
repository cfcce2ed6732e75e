//! Demo MCP peer serving an in-memory user directory over stdio.

use clap::Parser;
use passerelle::core::logging;
use passerelle::demo::{build_server, UserDirectory};
use std::error::Error;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "passerelle-user-server", version)]
#[command(about = "Serve a demo user directory as an MCP peer on stdin/stdout")]
struct Args {
    /// Log requests to stderr
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    logging::init(args.verbose);

    let server = build_server(Arc::new(UserDirectory::new()));
    info!(server = %server.name(), "Serving on stdio");
    server.serve_stdio().await?;
    Ok(())
}
