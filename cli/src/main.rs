//! CLI entrypoint for codemode
//!
//! Three modes: `run` executes code (or a script file) against a local
//! workspace, `serve` starts the container session server, and `kernel`
//! is the internal subprocess-kernel entrypoint spawned by the
//! SubprocessExecutor.
//!
//! Exit codes: 0 success, 1 misconfiguration, 2 fatal runtime error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codemode_application::{Session, SessionOptions, StorageBackend};
use codemode_domain::StorageAccess;
use codemode_infrastructure::bootstrap::discover_tools_path;
use codemode_infrastructure::execution::subprocess::kernel;
use codemode_infrastructure::server;
use codemode_infrastructure::{
    FileStorage, InProcessConfig, InProcessExecutor, KvStorage, ServerConfig, ServerError,
    SubprocessConfig, SubprocessExecutor,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

const EXIT_CONFIG: i32 = 1;
const EXIT_FATAL: i32 = 2;

#[derive(Parser)]
#[command(name = "codemode", version, about = "Code-execution session service for AI agents")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute code against a workspace and print the result as JSON
    Run(RunArgs),
    /// Start the session server (the in-container entrypoint)
    Serve(ServeArgs),
    /// Internal: subprocess kernel, driven over stdio by the host
    #[command(hide = true)]
    Kernel,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Workspace directory (skills/, artifacts/, tools/, requirements.txt)
    #[arg(long, env = "CODEMODE_BASE_PATH")]
    base: Option<PathBuf>,

    /// Redis URL for KV storage instead of a workspace directory
    #[arg(long, env = "CODEMODE_REDIS_URL", conflicts_with = "base")]
    redis_url: Option<String>,

    /// Key prefix for KV storage
    #[arg(long, default_value = "codemode")]
    prefix: String,

    /// Directory of tool YAML files (default: <base>/tools when present)
    #[arg(long, env = "CODEMODE_TOOLS_PATH")]
    tools: Option<PathBuf>,

    /// Inline code to execute; mutually exclusive with FILE
    #[arg(short = 'e', long = "eval", conflicts_with = "file")]
    code: Option<String>,

    /// Script file to execute
    file: Option<PathBuf>,

    /// Execution timeout in seconds
    #[arg(long, default_value_t = 30.0)]
    timeout: f64,

    /// Run the code in an isolated subprocess kernel
    #[arg(long)]
    isolated: bool,

    /// Install declared dependencies before executing
    #[arg(long)]
    sync_deps: bool,

    /// Forbid deps.add / deps.remove from agent code
    #[arg(long)]
    no_runtime_deps: bool,
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Workspace directory; falls back to CODEMODE_STORAGE / CODEMODE_BASE_PATH
    #[arg(long)]
    base: Option<PathBuf>,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Directory of tool YAML files
    #[arg(long)]
    tools: Option<PathBuf>,

    /// Bearer token clients must present
    #[arg(long, env = "CODEMODE_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Serve without authentication (local development only)
    #[arg(long, env = "CODEMODE_AUTH_DISABLED")]
    auth_disabled: bool,

    /// Forbid deps mutation through the API and agent code
    #[arg(long)]
    no_runtime_deps: bool,
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let outcome = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Serve(args) => serve(args).await,
        Command::Kernel => kernel::run_kernel()
            .await
            .context("kernel terminated abnormally"),
    };

    if let Err(err) = outcome {
        error!("{err:#}");
        let code = if err.is::<ServerError>() || err.is::<ConfigError>() {
            EXIT_CONFIG
        } else {
            EXIT_FATAL
        };
        std::process::exit(code);
    }
}

/// Marker for misconfiguration surfaced from `run`, so main can pick the
/// right exit code out of an anyhow chain.
#[derive(Debug)]
struct ConfigError(String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ConfigError {}

async fn open_storage(
    base: Option<PathBuf>,
    redis_url: Option<String>,
    prefix: &str,
) -> Result<(Arc<dyn StorageBackend>, Option<PathBuf>)> {
    match (base, redis_url) {
        (_, Some(url)) => {
            let storage = KvStorage::connect(url, prefix.to_string())
                .await
                .context("connecting to KV storage")?;
            Ok((Arc::new(storage) as Arc<dyn StorageBackend>, None))
        }
        (Some(base), None) => {
            let storage = FileStorage::open(&base).context("opening workspace")?;
            Ok((Arc::new(storage) as Arc<dyn StorageBackend>, Some(base)))
        }
        (None, None) => anyhow::bail!(ConfigError(
            "either --base or --redis-url is required".into()
        )),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let code = match (&args.code, &args.file) {
        (Some(code), None) => code.clone(),
        (None, Some(file)) => std::fs::read_to_string(file)
            .with_context(|| format!("reading {}", file.display()))?,
        _ => anyhow::bail!(ConfigError("pass either --eval CODE or a script FILE".into())),
    };

    let (storage, base) = open_storage(args.base, args.redis_url, &args.prefix).await?;
    let tools_path = args
        .tools
        .or_else(|| base.as_deref().and_then(discover_tools_path));

    let executor: Box<dyn codemode_application::Executor> = if args.isolated {
        Box::new(SubprocessExecutor::new(SubprocessConfig {
            tools_path,
            default_timeout: Some(Duration::from_secs_f64(args.timeout)),
            allow_runtime_deps: !args.no_runtime_deps,
            ..Default::default()
        }))
    } else {
        Box::new(InProcessExecutor::new(InProcessConfig {
            tools_path,
            default_timeout: Some(Duration::from_secs_f64(args.timeout)),
            allow_runtime_deps: !args.no_runtime_deps,
            deps_tree: None,
            installer: None,
        }))
    };

    let mut session = Session::open(
        storage,
        executor,
        SessionOptions {
            sync_deps_on_start: args.sync_deps,
        },
    )
    .await?;

    let result = session.run(&code, None).await;
    session.close().await.ok();
    let result = result?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.is_success() {
        std::process::exit(EXIT_FATAL);
    }
    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = match args.base {
        Some(base) => {
            let mut config = ServerConfig::new(StorageAccess::File {
                base_path: base.clone(),
            });
            config.tools_path = args
                .tools
                .clone()
                .or_else(|| discover_tools_path(&base));
            config
        }
        None => ServerConfig::from_env()?,
    };

    config.host = args.host;
    config.port = args.port;
    if args.tools.is_some() {
        config.tools_path = args.tools;
    }
    if args.auth_token.is_some() {
        config.auth_token = args.auth_token;
    }
    if args.auth_disabled {
        config.auth_disabled = true;
    }
    if args.no_runtime_deps {
        config.allow_runtime_deps = false;
    }
    config.validate_auth()?;

    server::serve(config).await?;
    Ok(())
}
