pub mod data;
pub mod io;

pub use data::{CompletionConfig, Config, PeerConfig};
pub use io::ConfigError;

#[cfg(test)]
mod tests;
