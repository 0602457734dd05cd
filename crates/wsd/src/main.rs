//! wsd: WebSocket server daemon, entry point.
//!
//! This binary binds a WebSocket listener (optionally TLS-terminated) plus the
//! legacy cross-domain policy listener, echoes WebSocket messages back to
//! their sender, and answers `<policy-file-request/>` probes.
//!
//! # Usage
//!
//! ```text
//! wsd [OPTIONS]
//!
//! Options:
//!   -c, --config <PATH>     TOML configuration file
//!       --address <IP>      Bind address [default from config: 0.0.0.0]
//!       --port <PORT>       WebSocket port [default from config: 8080]
//!       --tls-cert <PATH>   PEM certificate chain (enables TLS)
//!       --tls-key <PATH>    PEM private key (enables TLS)
//!       --log-level <LVL>   tracing filter when RUST_LOG is unset
//!       --print-config      Print the effective configuration and exit
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence over environment variables, which take
//! precedence over the configuration file.
//!
//! | Variable        | Description                        |
//! |-----------------|------------------------------------|
//! | `WSD_CONFIG`    | Path of the TOML configuration     |
//! | `WSD_ADDRESS`   | Bind address                       |
//! | `WSD_PORT`      | WebSocket port                     |
//! | `WSD_TLS_CERT`  | PEM certificate chain              |
//! | `WSD_TLS_KEY`   | PEM private key                    |
//! | `WSD_LOG_LEVEL` | Fallback log filter                |
//!
//! # Ports
//!
//! The policy listener binds `0.0.0.0:843` when `--port 80` is used and
//! `{address}:8843` otherwise.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wsd::infrastructure::config_file::FileConfig;
use wsd::{HookResult, Reactor, Server, TracingLogger, WebSocketHandler, SERVER_VERSION};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket server daemon.
///
/// The `#[derive(Parser)]` macro from `clap` generates the argument parser
/// automatically from the struct fields and their `#[arg(...)]` attributes.
#[derive(Debug, Parser)]
#[command(
    name = "wsd",
    about = "WebSocket server with TLS termination and a legacy policy listener",
    version
)]
struct Cli {
    /// TOML configuration file.  Every setting has a default, so the file
    /// is optional.
    #[arg(short, long, env = "WSD_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind.  `0.0.0.0` accepts connections on every interface.
    #[arg(long, env = "WSD_ADDRESS")]
    address: Option<String>,

    /// WebSocket port.  Out-of-range values are rejected with a clear error.
    #[arg(long, env = "WSD_PORT", allow_negative_numbers = true)]
    port: Option<i64>,

    /// PEM certificate chain.  Setting a certificate or key enables TLS.
    #[arg(long, env = "WSD_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    /// PEM private key.
    #[arg(long, env = "WSD_TLS_KEY")]
    tls_key: Option<PathBuf>,

    /// `tracing` filter used when `RUST_LOG` is not set.
    #[arg(long, env = "WSD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// Loads the configuration file (if any) and applies CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed.
    fn into_file_config(self) -> anyhow::Result<FileConfig> {
        let mut file = match &self.config {
            Some(path) => FileConfig::load(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))?,
            None => FileConfig::default(),
        };

        if let Some(address) = self.address {
            file.server.address = address;
        }
        if let Some(port) = self.port {
            file.server.port = port;
        }
        if self.tls_cert.is_some() || self.tls_key.is_some() {
            file.tls.enabled = true;
        }
        if let Some(cert) = self.tls_cert {
            file.tls.cert_path = Some(cert);
        }
        if let Some(key) = self.tls_key {
            file.tls.key_path = Some(key);
        }
        if let Some(level) = self.log_level {
            file.server.log_level = level;
        }

        Ok(file)
    }
}

// ── Hooks ─────────────────────────────────────────────────────────────────────

fn describe(addr: Option<SocketAddr>) -> String {
    addr.map_or_else(|| "unbound".to_string(), |addr| addr.to_string())
}

/// Spawns a task that stops the server on Ctrl+C (SIGINT on Unix).
///
/// The task holds a weak handle so it does not keep the server alive.
fn stop_on_ctrl_c(reactor: &Reactor, server: &Server) -> HookResult {
    let server = server.downgrade();
    reactor.spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                if let Some(server) = server.upgrade() {
                    if let Err(e) = server.stop() {
                        error!("shutdown failed: {e}");
                    }
                }
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// There is no `#[tokio::main]` here: the [`Reactor`] owns its own
/// current-thread runtime and `Server::run` drives it.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed and merged over the configuration file.
/// 2. `tracing_subscriber` is initialised; `RUST_LOG` wins over the
///    configured level.
/// 3. The configuration is validated into a `ServerConfig` and a policy file.
/// 4. The reactor, handler and server are built and the hooks registered.
/// 5. `create()` binds both listeners; `run()` blocks until Ctrl+C.
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let print_config = cli.print_config;
    let file_config = cli.into_file_config()?;

    if print_config {
        print!("{}", file_config.to_toml_string()?);
        return Ok(());
    }

    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&file_config.server.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = file_config
        .server_config()
        .context("invalid server configuration")?;
    let policy = file_config
        .policy_file()
        .context("invalid policy configuration")?;

    info!(
        "{SERVER_VERSION} starting: ws={}, tls={}",
        config.bind_target(),
        config.is_tls_enabled()
    );

    // ── Server assembly ───────────────────────────────────────────────────────
    let reactor = Rc::new(Reactor::new()?);
    let handler = Rc::new(WebSocketHandler::new(policy));
    let server = Server::builder(Rc::clone(&reactor), config, handler)
        .logger(Rc::new(TracingLogger))
        .build();

    server.on_create(|server| {
        if let Some(addrs) = server.listener_addrs() {
            info!(
                "listening on {} (policy listener on {})",
                describe(addrs.primary),
                describe(addrs.policy)
            );
        }
        Ok(())
    });
    server.on_start(stop_on_ctrl_c);
    server.on_stop(|_, _| {
        info!("closing listeners");
        Ok(())
    });

    // ── Main loop ─────────────────────────────────────────────────────────────
    server.create(None).context("failed to start wsd")?;
    server.run()?;

    info!("{SERVER_VERSION} stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
