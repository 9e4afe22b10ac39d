use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use mcp_http_bridge::config::{BridgeConfig, DEFAULT_HOST, DEFAULT_PORT};
use mcp_http_bridge::server::BridgeServer;
use mcp_http_bridge::supervisor::{self, BridgeClient, LaunchSpec, StateDir, StopOutcome};

/// Expose a stdio MCP server over HTTP
#[derive(Parser)]
#[command(name = "mcp-http-bridge", version, about)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Directory for the background bridge's PID, address and log files
    #[arg(long, global = true, env = "MCP_BRIDGE_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge in the foreground
    Serve(ServeArgs),
    /// Run the bridge in the background
    Start(ServeArgs),
    /// Stop the background bridge
    Stop {
        /// SIGKILL the bridge if it ignores SIGTERM
        #[arg(long)]
        force: bool,
    },
    /// Show whether the background bridge is running
    Status,
    /// List the tools the MCP server advertises
    ListTools(TargetArgs),
    /// Forward one call through the bridge
    Call {
        /// JSON-RPC method, e.g. `tools/call`
        method: String,
        /// JSON object with the call parameters
        params: Option<String>,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Print the end of the background bridge's log
    Logs {
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
}

#[derive(Args, Clone)]
struct ServeArgs {
    /// Listen address [env: MCP_BRIDGE_HOST, default: 127.0.0.1]
    #[arg(long)]
    host: Option<String>,
    /// Listen port [env: MCP_BRIDGE_PORT, default: 3000]
    #[arg(short, long)]
    port: Option<u16>,
    /// Seconds before a call is abandoned, 0 for no limit [env: MCP_BRIDGE_TIMEOUT_SECS, default: 60]
    #[arg(short, long)]
    timeout: Option<u64>,
    /// MCP server command and its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    server: Vec<String>,
}

impl ServeArgs {
    fn into_config(self) -> Result<BridgeConfig> {
        let (command, args) = self
            .server
            .split_first()
            .ok_or_else(|| anyhow!("no MCP server command given"))?;
        let mut config = BridgeConfig::from_env(command.clone(), args.to_vec())?;
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.timeout {
            config = config.with_timeout_secs(secs);
        }
        Ok(config)
    }
}

#[derive(Args, Clone)]
struct TargetArgs {
    /// Bridge host; defaults to the background bridge's address
    #[arg(long)]
    host: Option<String>,
    /// Bridge port; defaults to the background bridge's address
    #[arg(short, long)]
    port: Option<u16>,
}

impl TargetArgs {
    fn client(&self, state: &StateDir) -> Result<BridgeClient> {
        let recorded = state.read_addr()?;
        let host = self
            .host
            .clone()
            .or_else(|| recorded.as_ref().map(|(h, _)| h.clone()))
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = self
            .port
            .or(recorded.map(|(_, p)| p))
            .unwrap_or(DEFAULT_PORT);
        Ok(BridgeClient::new(&host, port)?)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("mcp-http-bridge: cannot initialise logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins over `--verbose`/`--quiet`. Logs go to stderr.
fn init_logging(cli: &Cli) -> Result<()> {
    let default = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow!("{e}"))
}

async fn run(cli: Cli) -> Result<()> {
    let state = StateDir::resolve(cli.state_dir);

    match cli.command {
        Commands::Serve(args) => {
            let config = args.into_config()?;
            BridgeServer::new(config).run().await?;
        }
        Commands::Start(args) => {
            let config = args.into_config()?;
            let spec = LaunchSpec {
                host: config.host.clone(),
                port: config.port,
                timeout_secs: Some(config.call_timeout.map_or(0, |t| t.as_secs())),
                command: config.command.clone(),
                args: config.args.clone(),
            };
            let pid = supervisor::start(&state, &spec).await?;
            println!(
                "{} bridge running on {} (PID {pid})",
                "✓".green().bold(),
                format!("http://{}:{}", config.host, config.port).cyan()
            );
            println!("  log: {}", state.log_file().display());
        }
        Commands::Stop { force } => match supervisor::stop(&state, force).await? {
            StopOutcome::NotRunning => println!("{}", "bridge is not running".yellow()),
            StopOutcome::StaleCleaned(pid) => {
                println!("{} removed stale PID file (PID {pid})", "!".yellow().bold())
            }
            StopOutcome::Stopped(pid) => println!("{} stopped bridge (PID {pid})", "✓".green().bold()),
        },
        Commands::Status => {
            let report = supervisor::status(&state).await?;
            match (report.pid, report.alive) {
                (Some(pid), true) => {
                    let addr = report
                        .addr
                        .map(|(host, port)| format!("http://{host}:{port}"))
                        .unwrap_or_else(|| "unknown address".into());
                    let health = if report.responding {
                        "responding".green()
                    } else {
                        "not responding".red()
                    };
                    println!("{} PID {pid} on {} ({health})", "running".green().bold(), addr.cyan());
                }
                (Some(pid), false) => {
                    println!("{} PID file names dead process {pid}", "stale".yellow().bold())
                }
                (None, _) => println!("{}", "not running".bright_black()),
            }
        }
        Commands::ListTools(target) => {
            let tools = target.client(&state)?.list_tools().await?;
            if tools.is_empty() {
                println!("{}", "no tools".bright_black());
            }
            for tool in tools {
                match tool.description {
                    Some(description) => println!("{}  {description}", tool.name.bold()),
                    None => println!("{}", tool.name.bold()),
                }
            }
        }
        Commands::Call {
            method,
            params,
            target,
        } => {
            let params: Value = match params {
                Some(raw) => serde_json::from_str(&raw).context("params must be JSON")?,
                None => Value::Object(Default::default()),
            };
            let outcome = target.client(&state)?.call(&method, &params).await?;
            println!("{}", serde_json::to_string_pretty(&outcome.body)?);
            if !outcome.status.is_success() {
                bail!("bridge answered {}", outcome.status);
            }
        }
        Commands::Logs { lines } => {
            for line in state.tail_log(lines)? {
                println!("{line}");
            }
        }
    }
    Ok(())
}
