//! Command-line interface parsing and handling
//!
//! Every subcommand except `peers` connects to one configured peer, runs
//! through [`McpBridge`] and closes the connection before returning.

mod render;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::completion::{complete_prompt, interpret, CompletionService, OpenAiCompatibleClient};
use crate::core::config::{Config, ConfigError};
use crate::core::logging;
use crate::mcp::capability::CapabilityKind;
use crate::mcp::events::PeerNotification;
use crate::mcp::value::{arguments_from_json, ArgumentValue, Arguments};
use crate::mcp::{McpBridge, McpPeer};

pub use render::{
    render_descriptors, render_event, render_peers, render_prompt, render_result,
};

#[derive(Parser, Debug)]
#[command(name = "passerelle", version)]
#[command(about = "Discover, invoke and watch the capabilities of MCP peers")]
#[command(
    long_about = "Passerelle connects to a Model Context Protocol peer listed in its configuration \
file and lets you list, call and watch the tools, resources and prompts it exposes.\n\n\
Peers are configured in config.toml under [[peers]]. With a single enabled peer, --peer \
may be omitted.\n\n\
Environment Variables:\n\
  PASSERELLE_LOG    Log filter (falls back to RUST_LOG, default: warn)\n\
  OPENAI_API_KEY    API key for `ask` and `prompt --complete` unless [completion] names another"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file to use instead of the platform default
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Peer id to connect to
    #[arg(short = 'p', long, global = true, value_name = "PEER")]
    pub peer: Option<String>,

    /// Log protocol traffic to stderr
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List configured peers
    Peers,
    /// List the tools a peer exposes
    Tools,
    /// List the resources a peer exposes
    Resources,
    /// List the prompt templates a peer exposes
    Prompts,
    /// Call a tool
    Call {
        tool: String,
        /// Argument as KEY=VALUE; VALUE is parsed as JSON when possible
        #[arg(short = 'a', long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,
        /// All arguments as one JSON object; --arg entries override it
        #[arg(long, value_name = "JSON")]
        json: Option<String>,
    },
    /// Read a resource by URI or name
    Read { uri: String },
    /// Render a prompt template
    Prompt {
        name: String,
        #[arg(short = 'a', long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,
        /// Send the rendered messages to the completion endpoint
        #[arg(long)]
        complete: bool,
    },
    /// Print change notifications and cache activity until interrupted
    Watch,
    /// Read a resource and ask the completion endpoint about it
    Ask {
        uri: String,
        #[arg(required = true, trailing_var_arg = true)]
        instruction: Vec<String>,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    logging::init(args.verbose);
    let succeeded = tokio::runtime::Runtime::new()?.block_on(async_main(args))?;
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

/// Returns `Ok(false)` when the peer reported a failure.
async fn async_main(args: Args) -> Result<bool, Box<dyn Error>> {
    let config = load_config(&args)?;

    if let Commands::Peers = args.command {
        print!("{}", render_peers(&config));
        return Ok(true);
    }

    let (bridge, notifications) = connect(&config, args.peer.as_deref()).await?;
    let outcome = run(&bridge, &config, args.command, notifications).await;
    bridge.close().await;
    outcome
}

fn load_config(args: &Args) -> Result<Config, ConfigError> {
    let config = Config::load(args.config.as_deref())?;
    debug!(peers = config.peers.len(), "Configuration loaded");
    Ok(config)
}

async fn connect(
    config: &Config,
    peer: Option<&str>,
) -> Result<(McpBridge, mpsc::UnboundedReceiver<PeerNotification>), Box<dyn Error>> {
    let peer_config = config.select_peer(peer)?;
    let (peer, notifications) = McpPeer::connect(peer_config).await?;
    Ok((McpBridge::new(peer), notifications))
}

async fn run(
    bridge: &McpBridge,
    config: &Config,
    command: Commands,
    notifications: mpsc::UnboundedReceiver<PeerNotification>,
) -> Result<bool, Box<dyn Error>> {
    match command {
        Commands::Peers => Ok(true),
        Commands::Tools => list(bridge, CapabilityKind::Tool).await,
        Commands::Resources => list(bridge, CapabilityKind::Resource).await,
        Commands::Prompts => list(bridge, CapabilityKind::Prompt).await,
        Commands::Call { tool, args, json } => {
            let arguments = parse_arguments(&args, json.as_deref())?;
            let result = bridge.call_tool(&tool, &arguments).await?;
            Ok(print_result(&render_result(&result), result.is_error))
        }
        Commands::Read { uri } => {
            let result = bridge.read_resource(&uri).await?;
            Ok(print_result(&render_result(&result), result.is_error))
        }
        Commands::Prompt {
            name,
            args,
            complete,
        } => {
            let arguments = parse_arguments(&args, None)?;
            let prompt = bridge.get_prompt(&name, &arguments).await?;
            if prompt.is_error || !complete {
                return Ok(print_result(&render_prompt(&prompt), prompt.is_error));
            }
            let service = completion_client(config)?;
            println!("{}", complete_prompt(&service, &prompt).await?);
            Ok(true)
        }
        Commands::Watch => watch(bridge, notifications).await,
        Commands::Ask { uri, instruction } => {
            let result = bridge.read_resource(&uri).await?;
            if result.is_error {
                return Ok(print_result(&render_result(&result), true));
            }
            let service = completion_client(config)?;
            println!("{}", interpret(&service, &instruction.join(" "), &result).await?);
            Ok(true)
        }
    }
}

async fn list(bridge: &McpBridge, kind: CapabilityKind) -> Result<bool, Box<dyn Error>> {
    let entries = bridge.registry().list(kind).await?;
    print!("{}", render_descriptors(kind, &entries));
    Ok(true)
}

/// Successful output goes to stdout; peer failures go to stderr verbatim.
fn print_result(rendered: &str, is_error: bool) -> bool {
    if is_error {
        eprintln!("{rendered}");
    } else {
        println!("{rendered}");
    }
    !is_error
}

fn completion_client(config: &Config) -> Result<impl CompletionService, Box<dyn Error>> {
    let completion = config
        .completion
        .as_ref()
        .ok_or("No [completion] section in the configuration file.")?;
    Ok(OpenAiCompatibleClient::from_config(completion)?)
}

async fn watch(
    bridge: &McpBridge,
    notifications: mpsc::UnboundedReceiver<PeerNotification>,
) -> Result<bool, Box<dyn Error>> {
    let mut events = bridge.subscribe();
    let subscriber = bridge.spawn_subscriber(notifications);
    for kind in CapabilityKind::ALL {
        let entries = bridge.registry().list(kind).await?;
        println!("{}s: {} cached", kind.label(), entries.len());
    }
    println!("Watching {} (Ctrl+C to stop)", bridge.peer().display_name());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(line) = render_event(&event) {
                        println!("{line}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    println!("... {skipped} events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    subscriber.shutdown().await;
    Ok(true)
}

/// Builds an argument map from an optional JSON object plus `KEY=VALUE`
/// pairs, later pairs winning.
pub fn parse_arguments(pairs: &[String], json: Option<&str>) -> Result<Arguments, String> {
    let mut arguments = match json {
        Some(raw) => {
            let value: serde_json::Value =
                serde_json::from_str(raw).map_err(|err| format!("Invalid --json: {err}"))?;
            if !value.is_object() {
                return Err("--json must be a JSON object.".to_string());
            }
            arguments_from_json(Some(&value))
        }
        None => Arguments::new(),
    };
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("Expected KEY=VALUE, got `{pair}`."))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Missing argument name in `{pair}`."));
        }
        arguments.insert(key.to_string(), ArgumentValue::parse_literal(value));
    }
    Ok(arguments)
}

#[cfg(test)]
mod tests;
