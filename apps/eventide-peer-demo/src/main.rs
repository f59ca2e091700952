//! Demo binary: a JSON-RPC peer speaking line-delimited JSON over stdio.
//!
//! Registers a couple of toy methods (`ping`, `math/add`) and an
//! `echo`-style notification, then serves the peer until stdin closes.

use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::thread;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use eventide_jsonrpc::{Peer, RpcError, Transport};
use eventide_rt::wait_op::WaitOp;
use eventide_rt::EventLoop;
use eventide_runtime::{AppConfig, CliArgs};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reads one line at a time off stdin on a dedicated OS thread per call
/// (mirroring `eventide_rt::reactor::sleep`'s one-thread-per-op shape), and
/// writes newline-delimited JSON to stdout.
struct StdioTransport {
    stdout: RefCell<io::Stdout>,
}

impl StdioTransport {
    fn new() -> Self {
        Self {
            stdout: RefCell::new(io::stdout()),
        }
    }
}

#[async_trait(?Send)]
impl Transport for StdioTransport {
    async fn read_message(&self) -> Option<String> {
        let (handle, waiter) = WaitOp::new();
        thread::spawn(move || {
            let mut line = String::new();
            let result = match io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line.trim_end().to_string()),
            };
            handle.complete(result);
        });
        waiter.await
    }

    async fn write_message(&self, payload: String) -> bool {
        let mut out = self.stdout.borrow_mut();
        writeln!(out, "{payload}").and_then(|_| out.flush()).is_ok()
    }
}

#[derive(Debug, Serialize, Deserialize, eventide_jsonrpc::RpcMethod)]
#[rpc(method = "math/add", result = "i64")]
struct AddParams {
    a: i64,
    b: i64,
}

/// Eventide JSON-RPC peer demo
#[derive(Parser)]
#[command(name = "eventide-peer-demo")]
#[command(about = "A stdio JSON-RPC peer built on eventide-rt")]
struct Cli {
    /// Path to a YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Default timeout (ms) applied to outbound requests without their own.
    #[arg(long)]
    request_timeout_ms: Option<u64>,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,

    /// Log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the peer over stdio (the default).
    Run,
    /// Validate configuration and exit.
    Check,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        request_timeout_ms: cli.request_timeout_ms,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.clone().unwrap_or_default();
    eventide_runtime::init_logging_from_config(&logging_config, Path::new(&config.server.home_dir));
    tracing::info!("eventide-peer-demo starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_peer(),
        Commands::Check => check_config(&config),
    }
}

fn check_config(config: &AppConfig) -> Result<()> {
    tracing::info!("configuration is valid");
    println!("{}", config.to_yaml()?);
    Ok(())
}

fn run_peer() -> Result<()> {
    let loop_ = EventLoop::new();
    let transport: Rc<dyn Transport> = Rc::new(StdioTransport::new());
    let peer = Peer::new(transport, loop_.clone());

    peer.on_request_named("ping", |_ctx, _params: Value| async move {
        Ok::<Value, RpcError>(Value::Bool(true))
    });

    peer.on_request::<AddParams, _, _>(|_ctx, params| async move {
        Ok::<i64, RpcError>(params.a + params.b)
    });

    peer.on_notification::<Value, _, _>("log", |_ctx, params| async move {
        tracing::info!(?params, "notification received");
    });

    loop_.run_until(async move { peer.run().await });
    tracing::info!("eventide-peer-demo stopped: transport closed");
    Ok(())
}
