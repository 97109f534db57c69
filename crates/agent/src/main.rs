use anyhow::Context;
use clap::Parser;

/// aurora-agent is a daemon which polls solar-activity data providers,
/// normalizes their measurements into a shared event stream, evaluates
/// user alert rules against it, and delivers triggered notifications.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path of the YAML pipeline configuration.
    #[clap(long = "config", env = "AURORA_CONFIG")]
    config: std::path::PathBuf,
    /// Grace period for draining in-flight work at shutdown.
    #[clap(
        long = "shutdown-grace",
        env = "SHUTDOWN_GRACE",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    shutdown_grace: std::time::Duration,
}

fn main() -> Result<(), anyhow::Error> {
    // Use reasonable defaults for printing structured logs to stderr.
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = Args::parse();
    tracing::info!(?args, "started!");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let shutdown_grace = args.shutdown_grace;
    let task = runtime.spawn(async move { async_main(args).await });
    let result = runtime.block_on(task);

    tracing::info!(?result, "main function completed, shutting down runtime");
    runtime.shutdown_timeout(shutdown_grace);
    result?
}

async fn async_main(args: Args) -> Result<(), anyhow::Error> {
    let config = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading config {}", args.config.display()))?;
    let config: models::Config =
        serde_yaml::from_str(&config).context("parsing pipeline configuration")?;

    let pipeline = runtime::Pipeline::from_config(config).context("building pipeline")?;

    // Share-able signal which cancels when the agent should drain and exit.
    let shutdown = tokio_util::sync::CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("received interrupt, draining pipeline"),
                Err(error) => tracing::error!(%error, "failed to listen for interrupt, draining"),
            }
            shutdown.cancel();
        }
    });

    pipeline.run(shutdown).await
}
