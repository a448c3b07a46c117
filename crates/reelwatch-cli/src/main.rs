use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use reelwatch_client::{InvalidItemLog, NewznabFeedSource, RadarrOptions, RadarrSink};
use reelwatch_core::{
    ConfigPaths, DedupLedger, PipelineRunner, RetryingClient, Secrets, Settings,
    TracingPipelineReporter, Trigger, selftest, trigger_channel,
};

mod triggers;

#[derive(Parser)]
#[command(
    name = "reelwatch",
    version,
    about = "Watch an indexer feed and send matching movies to Radarr"
)]
struct Cli {
    /// Directory holding config.yaml, .env, the ledger and log files
    #[arg(
        long,
        env = "REELWATCH_CONFIG_DIR",
        default_value = "config",
        global = true
    )]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Run a pass now, then on every interval and manual trigger (default)
    Run,
    /// Run a single pass and exit
    Once,
    /// Check the filter engine against built-in titles, without network access
    SelfTest,
    /// Load and validate the configuration, then exit
    CheckConfig,
}

type Runner = PipelineRunner<NewznabFeedSource, RadarrSink, InvalidItemLog>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::SelfTest = command {
        init_tracing(false, None)?;
        return cmd_self_test();
    }

    let paths = ConfigPaths::new(&cli.config_dir);
    paths.ensure_present()?;
    dotenvy::from_path(paths.env_file())
        .with_context(|| format!("Failed to load {}", paths.env_file().display()))?;
    let settings = Settings::load(&paths.dir)?;

    let log_file = matches!(command, Commands::Run | Commands::Once).then(|| paths.log_file());
    let _log_guard = init_tracing(settings.debug_logging, log_file.as_deref())?;

    let secrets = Secrets::from_env()?;
    let filter = settings.pattern_filter()?;
    tracing::info!(
        include = filter.include_count(),
        exclude = filter.exclude_count(),
        "Loaded {} match patterns and {} exclusion patterns",
        filter.include_count(),
        filter.exclude_count()
    );

    if let Commands::CheckConfig = command {
        println!("Configuration in {} is valid", paths.dir.display());
        println!("  interval:        {} min", settings.execution_interval);
        println!("  ledger bound:    {}", settings.max_stored_guids);
        println!("  feed:            {}", settings.feed.url);
        println!("  radarr:          {}", secrets.radarr_url);
        println!("  quality profile: {}", settings.quality_profile);
        println!(
            "  patterns:        {} include, {} exclude",
            filter.include_count(),
            filter.exclude_count()
        );
        return Ok(());
    }

    let feed = NewznabFeedSource::new(&settings.feed, &secrets.indexer_api_key)?;
    let options = RadarrOptions::new(&settings.movie_folder, &settings.quality_profile)
        .with_list_exclusions(settings.respect_list_exclusions);
    let sink = RadarrSink::new(secrets.radarr_url.clone(), &secrets.radarr_api_key, options)?;

    let feed_client = RetryingClient::new("feed", settings.feed_retry.to_policy());
    let sink_client = RetryingClient::new("radarr", settings.sink_retry.to_policy());

    let profile_id = sink_client
        .execute(|| sink.verify())
        .await
        .context("Failed to connect to Radarr")?;
    tracing::info!(
        profile = %settings.quality_profile,
        profile_id,
        "Connected to Radarr successfully"
    );

    let ledger = if settings.debug_mode {
        tracing::warn!("Debug mode: processed items are not persisted");
        DedupLedger::in_memory(settings.max_stored_guids)
    } else {
        DedupLedger::load(paths.ledger(), settings.max_stored_guids)?
    };

    let mut runner: Runner = PipelineRunner::new(
        feed,
        sink,
        InvalidItemLog::new(paths.invalid_log()),
        filter,
        ledger,
        feed_client,
        sink_client,
        settings.runner_config(),
    );

    match command {
        Commands::Once => cmd_once(&mut runner).await,
        _ => cmd_run(&mut runner, &settings).await,
    }
}

async fn cmd_run(runner: &mut Runner, settings: &Settings) -> Result<()> {
    let cancel_token = CancellationToken::new();
    let (handle, receiver) = trigger_channel();

    if settings.use_keyboard {
        triggers::spawn_stdin_listener(handle.clone());
    } else {
        tracing::info!("Keyboard trigger is disabled (use_keyboard: false)");
    }
    triggers::spawn_signal_listener(handle);

    let token = cancel_token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    runner
        .run(receiver, cancel_token, &TracingPipelineReporter)
        .await?;
    tracing::info!("Terminated gracefully");
    Ok(())
}

async fn cmd_once(runner: &mut Runner) -> Result<()> {
    runner
        .run_once(Trigger::Manual, &TracingPipelineReporter)
        .await
        .context("Pass aborted")?;
    Ok(())
}

fn cmd_self_test() -> Result<()> {
    let report = selftest::run();
    for result in &report.results {
        let mark = if result.passed() { "ok  " } else { "FAIL" };
        match &result.actual {
            Ok(actual) => println!(
                "{mark} {} (title {:?}: expected {}, got {actual})",
                result.name, result.title, result.expected
            ),
            Err(e) => println!("{mark} {} ({e})", result.name),
        }
    }
    println!("{report}");
    if !report.all_passed() {
        bail!("{} filter checks failed", report.failed());
    }
    Ok(())
}

/// Log to stderr, and also to `log_file` when given.
fn init_tracing(debug: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let directive = if debug {
        "reelwatch=debug"
    } else {
        "reelwatch=info"
    };
    let filter = EnvFilter::from_default_env().add_directive(directive.parse()?);

    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .context("Log file path has no file name")?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received, finishing current pass");
}
