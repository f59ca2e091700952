//! Ambient application concerns shared by `eventide-peer-demo`: layered
//! configuration and tracing setup. Not part of the peer protocol itself —
//! a binary embedding `eventide-rt`/`eventide-jsonrpc` elsewhere doesn't
//! need this crate at all.

pub mod config;
pub mod logging;

pub use config::{AppConfig, CliArgs, LoggingConfig, PeerConfig, ServerConfig};
pub use logging::init_logging_from_config;
