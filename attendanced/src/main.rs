use anyhow::Context;
use attendanced::config::DaemonConfig;
use attendanced::daemon::DaemonRuntime;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    SyncOnce,
    Status,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--sync-once" => mode = CliMode::SyncOnce,
            "--status" => mode = CliMode::Status,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "attendanced=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: attendanced [--sync-once | --status]");
        println!("  --sync-once   Run one push-then-pull cycle and exit");
        println!("  --status      Print the sync status as JSON and exit");
        return Ok(());
    }

    init_tracing();
    let config = DaemonConfig::from_env()?;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    match mode {
        CliMode::SyncOnce => {
            let outcome = daemon.sync_once().await?;
            tracing::info!(?outcome, "sync finished");
            daemon.orchestrator().dispose().await;
            Ok(())
        }
        CliMode::Status => {
            let status = daemon.status().await?;
            let json =
                serde_json::to_string_pretty(&status).context("failed to encode sync status")?;
            println!("{json}");
            Ok(())
        }
        CliMode::Run | CliMode::Help => daemon.run().await,
    }
}
