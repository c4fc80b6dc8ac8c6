//! Toolgate is an OpenAI-compatible gateway that routes chat completions to
//! remote LLM providers and lets the model call tools mid-generation.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns configuration, the canonical stream event type, the
//!   announcement codec, and the tool-call orchestration loop that drives
//!   provider streams and resolves tool invocations.
//! - [`provider`] adapts each provider family's native streaming protocol
//!   into the canonical event stream.
//! - [`tools`] defines the tool abstraction and the registry that derives
//!   provider-shaped schemas from declared tool signatures.
//! - [`mcp`] bridges remote Model Context Protocol servers, wrapping their
//!   tools as locally callable ones over cached connections.
//! - [`api`] defines the chat-completions wire payloads and translates
//!   canonical events back into them.
//! - [`server`] exposes the HTTP surface.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::run`], which loads configuration and starts
//! [`server::serve`].

pub mod api;
pub mod cli;
pub mod core;
pub mod mcp;
pub mod provider;
pub mod server;
pub mod tools;
pub mod utils;
