use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use jobmaster::config::{DispatcherConfig, PersistenceBackend};
use jobmaster::dispatcher::start_dispatcher;
use jobmaster::fatal::ProcessExitFatalHandler;
use jobmaster::persistence::create_persistence;
use jobmaster::rpc::RpcService;
use jobmaster::shutdown::install_shutdown_handler;
use jobmaster::worker::ChannelAllocator;

#[derive(Parser, Debug)]
#[command(name = "jobmaster")]
#[command(version)]
#[command(about = "A cluster job dispatcher with durable recovery")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a jobmaster dispatcher process
    Serve(ServeArgs),
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Address this dispatcher registers its gateway under
    #[arg(long, default_value = "127.0.0.1:6070")]
    bind: SocketAddr,

    /// Durable store backing the job set
    #[arg(long, value_enum, default_value = "memory")]
    backend: BackendArg,

    /// Store file location (required with --backend file)
    #[arg(long, required_if_eq("backend", "file"))]
    store_path: Option<PathBuf>,

    /// Default timeout for gateway calls, in milliseconds
    #[arg(long, default_value = "10000")]
    rpc_timeout_ms: u64,

    /// How long terminal jobs are retained before tombstoning, in milliseconds
    #[arg(long, default_value = "3600000")]
    retention_ms: u64,

    /// Retention sweep interval, in milliseconds
    #[arg(long, default_value = "60000")]
    sweep_interval_ms: u64,
}

#[derive(Debug, Clone, ValueEnum)]
enum BackendArg {
    Memory,
    File,
}

impl From<BackendArg> for PersistenceBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Memory => PersistenceBackend::Memory,
            BackendArg::File => PersistenceBackend::File,
        }
    }
}

async fn run_server(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = DispatcherConfig::new(args.bind)
        .with_persistence(args.backend.into(), args.store_path)
        .with_rpc_timeout_ms(args.rpc_timeout_ms)
        .with_retention(args.retention_ms, args.sweep_interval_ms);

    tracing::info!(
        bind_addr = %config.bind_addr,
        backend = %config.persistence.backend,
        rpc_timeout_ms = config.rpc_timeout_ms,
        "Starting jobmaster dispatcher"
    );

    let persistence = create_persistence(&config.persistence).await?;
    let rpc_service = RpcService::new(config.rpc_timeout(), config.rpc_timeout());

    // Worker side of the allocation seam: this process only logs the
    // hand-off; real workers consume the same channel.
    let (allocator, mut dispatched_rx) = ChannelAllocator::new();
    tokio::spawn(async move {
        while let Some((job, cause)) = dispatched_rx.recv().await {
            tracing::info!(
                job_id = %job.id,
                command = %job.payload.command,
                cause = %cause,
                "Job handed to worker allocation"
            );
        }
    });

    let dispatcher = start_dispatcher(
        config,
        persistence,
        Arc::new(allocator),
        Arc::new(ProcessExitFatalHandler),
        &rpc_service,
    )
    .await?;
    tracing::info!(address = %dispatcher.address(), "Dispatcher started");

    let shutdown = install_shutdown_handler();
    let status = tokio::select! {
        status = dispatcher.shutdown_future() => status,
        _ = shutdown.cancelled() => {
            dispatcher.close_async().await;
            dispatcher.shutdown_future().await
        }
    };

    tracing::info!(status = %status, "Dispatcher shut down");
    if status.exit_code() != 0 {
        std::process::exit(status.exit_code());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => run_server(serve_args).await?,
    }
    Ok(())
}
