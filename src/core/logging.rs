//! Tracing setup shared by the binaries.
//!
//! Output always goes to stderr: stdout carries JSON-RPC frames for the stdio
//! server and command output for the client CLI.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "PASSERELLE_LOG";
const DEFAULT_DIRECTIVE: &str = "warn";

/// Resolves the filter from `PASSERELLE_LOG`, then `RUST_LOG`, then the default.
pub fn env_filter(verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV_VAR) {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    if verbose {
        EnvFilter::new("passerelle=debug")
    } else {
        EnvFilter::new(DEFAULT_DIRECTIVE)
    }
}

/// Installs the global subscriber. Calling it twice is harmless.
pub fn init(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
