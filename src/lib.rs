//! Passerelle bridges an application to the tools, resources and prompts a
//! Model Context Protocol peer exposes.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`mcp`] holds the bridge itself: transports, the invocation client
//!   ([`mcp::McpPeer`]), the capability cache ([`mcp::registry`]), content
//!   extraction, the change-notification subscriber, and a server side for
//!   exposing capabilities.
//! - [`completion`] and [`api`] turn extracted content into a generative
//!   completion through an OpenAI-compatible endpoint.
//! - [`core`] owns configuration and logging setup.
//! - [`demo`] is a user-directory peer used by the `passerelle-user-server`
//!   binary and by end-to-end tests.
//!
//! The `passerelle` binary routes through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod completion;
pub mod core;
pub mod demo;
pub mod mcp;
