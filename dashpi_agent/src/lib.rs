//! dashpi_agent: remote management agent for small single-board hosts.
//!
//! `/ws` streams host telemetry per dashboard page and runs page commands;
//! `/ws/term` bridges an interactive shell.

pub mod config;
pub mod executor;
pub mod metrics;
pub mod outbound;
pub mod proto;
pub mod sampler;
pub mod server;
pub mod services;
pub mod session;
pub mod software;
pub mod state;
pub mod terminal;
pub mod tls;
pub mod types;
pub mod ws;
