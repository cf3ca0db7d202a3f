//! # Offload CLI Entry Point
//!
//! Main binary for the computation offloading system.
//!
//! ## Usage
//!
//! ```bash
//! # Start an execution host on a compute node
//! offload host -b 0.0.0.0:5000 --cache-dir /var/cache/offload
//!
//! # Start the gateway over two nodes
//! offload gateway -b 0.0.0.0:4322 -n node-a=10.0.0.5:5000 -n node-b=10.0.0.6:5000
//!
//! # Keep node status in an inventory file and power nodes through a script
//! offload gateway --inventory nodes.json --power-on-cmd "wake.sh {address}"
//!
//! # Run one call through the gateway (outputs raw JSON)
//! offload call 127.0.0.1:4322 --app com.example.App --artifact calc.js \
//!     --type Calc --method add --param-types int,int --params '[2, 3]'
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use argh::FromArgs;

use offload_cli::setup;
use offload_client::{CodeStatus, OffloadClient};
use offload_common::CallResult;
use offload_gateway::{Gateway, GatewayConfig};
use offload_host::{ArtifactCache, ExecutionHost, ScriptLoader};

#[derive(FromArgs)]
/// computation offloading gateway, execution host and client
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Gateway(GatewayArgs),
    Host(HostArgs),
    Call(CallArgs),
}

// offload gateway -b 0.0.0.0:4322 -n node-a=10.0.0.5:5000 --execution-log exec.log
#[derive(FromArgs)]
#[argh(subcommand, name = "gateway")]
/// start the connection gateway
struct GatewayArgs {
    /// address clients connect to
    #[argh(option, short = 'b', default = "\"0.0.0.0:4322\".into()")]
    bind: String,

    /// compute node as id=host:port
    ///
    /// Can be specified multiple times. With --inventory these only seed a
    /// missing inventory file.
    #[argh(option, short = 'n', long = "node")]
    nodes: Vec<String>,

    /// json file holding the node table and its statuses
    #[argh(option, long = "inventory")]
    inventory: Option<PathBuf>,

    /// command run to power a node on ({id}, {address}, {port} are replaced)
    #[argh(option, long = "power-on-cmd")]
    power_on_cmd: Option<String>,

    /// command run to power a node off ({id}, {address}, {port} are replaced)
    #[argh(option, long = "power-off-cmd")]
    power_off_cmd: Option<String>,

    /// file receiving one "<ms>\t<session>" line per completed computation
    #[argh(option, long = "execution-log")]
    execution_log: Option<PathBuf>,

    /// seconds to keep trying an unreachable node; 0 retries forever
    #[argh(option, long = "connect-deadline-secs", default = "60")]
    connect_deadline_secs: u64,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "host")]
/// start an execution host on this compute node
struct HostArgs {
    /// address the gateway's session bridges connect to
    #[argh(option, short = 'b', default = "\"0.0.0.0:5000\".into()")]
    bind: String,

    /// directory for cached artifacts and transferred files
    #[argh(option, long = "cache-dir")]
    cache_dir: PathBuf,
}

// Prints the result as raw JSON on stdout for piping into `jq`. Call
// errors are printed the same way and exit non-zero.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// run one offloaded call through a gateway
struct CallArgs {
    /// gateway address (host:port)
    #[argh(positional)]
    gateway: String,

    /// fully qualified application identifier
    #[argh(option, long = "app")]
    app: String,

    /// code artifact sent if the node does not have it cached
    #[argh(option, long = "artifact")]
    artifact: PathBuf,

    /// target type name
    #[argh(option, long = "type")]
    target_type: String,

    /// method name
    #[argh(option, long = "method")]
    method: String,

    /// comma-separated parameter type names
    #[argh(option, long = "param-types", default = "String::new()")]
    param_types: String,

    /// parameter values as a JSON array
    #[argh(option, long = "params", default = "\"[]\".into()")]
    params: String,

    /// receiver state as JSON
    #[argh(option, long = "receiver", default = "\"null\".into()")]
    receiver: String,

    /// client identifier sent before registering
    #[argh(option, long = "client-id")]
    client_id: Option<String>,

    /// auxiliary file sent with the call
    #[argh(option, long = "file")]
    file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call keeps stdout clean for scripting
    if !matches!(cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Gateway(args) => run_gateway(args).await,
        Commands::Host(args) => run_host(args).await,
        Commands::Call(args) => run_call(args).await,
    }
}

async fn run_gateway(args: GatewayArgs) -> Result<()> {
    let pool = setup::build_pool(
        &args.nodes,
        args.inventory.as_deref(),
        args.power_on_cmd.as_deref(),
        args.power_off_cmd.as_deref(),
    )?;
    tracing::info!("{} of {} node(s) available", pool.available_count().await, pool.snapshot().await.len());

    let mut config = GatewayConfig::default()
        .with_bind(args.bind)
        .with_retry(setup::retry_config(args.connect_deadline_secs));
    if let Some(path) = args.execution_log {
        config = config.with_execution_log(path);
    }

    let gateway = Gateway::bind(config, Arc::new(pool)).await?;

    tokio::select! {
        result = gateway.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            let stats = gateway.pool().stats();
            tracing::info!(
                "Shutting down: {} lease(s) granted, {} refused, {} released",
                stats.acquired,
                stats.rejected,
                stats.released
            );
        }
    }

    Ok(())
}

async fn run_host(args: HostArgs) -> Result<()> {
    let cache = ArtifactCache::open(&args.cache_dir)?;
    tracing::info!("Artifact cache at {}", cache.root().display());

    let host = ExecutionHost::bind(&args.bind, cache, Box::new(ScriptLoader))?;
    let serving = tokio::task::spawn_blocking(move || host.serve());

    tokio::select! {
        joined = serving => joined.map_err(|e| anyhow!("host thread failed: {}", e))??,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    Ok(())
}

async fn run_call(args: CallArgs) -> Result<()> {
    let envelope = setup::build_envelope(
        &args.target_type,
        &args.method,
        &args.param_types,
        &args.params,
        &args.receiver,
    )?;
    let artifact = std::fs::read(&args.artifact)
        .map_err(|e| anyhow!("Failed to read artifact {}: {}", args.artifact.display(), e))?;

    let mut client = OffloadClient::connect(&args.gateway).await?;
    if let Some(id) = &args.client_id {
        client.authenticate(id).await?;
    }
    if client.register_code(&args.app, &artifact).await? == CodeStatus::Transferred {
        eprintln!("artifact transferred ({} bytes)", artifact.len());
    }

    let result = match &args.file {
        Some(path) => {
            let data = std::fs::read(path)
                .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
            client
                .compute_with_file(&path.to_string_lossy(), &data, &envelope)
                .await?
        }
        None => client.compute(&envelope).await?,
    };
    client.disconnect().await?;

    println!("{}", serde_json::to_string(&setup::render_result(&result))?);

    match result {
        CallResult::Error(err) => Err(err.into()),
        CallResult::Value { .. } => Ok(()),
    }
}
