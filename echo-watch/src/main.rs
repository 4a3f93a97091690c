//! echo-watch - Daemon that echoes new posts from a watched account
//!
//! Polls the watched account for new posts and publishes a reply mentioning
//! a third party for each one, emailing an alert when fetching fails.

use clap::Parser;
use libechocast::config::{self, Secrets};
use libechocast::feed::x::XClient;
use libechocast::feed::FeedClient;
use libechocast::logging;
use libechocast::notifier::EmailNotifier;
use libechocast::{Config, EchocastError, Result, Scheduler};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "echo-watch")]
#[command(version)]
#[command(about = "Echo new posts from a watched account with a mention")]
#[command(long_about = "\
echo-watch - Echo new posts from a watched account

DESCRIPTION:
    echo-watch is a long-running daemon. Every poll interval it fetches the
    newest posts of the watched account, skips the ones it has already seen
    since it started, and publishes a reply mentioning a third party for
    each new one. Rate limits are waited out; other fetch failures send an
    alert email and are retried on the next cycle.

USAGE:
    # Run in foreground (logs to stderr, errors also to app.log)
    echo-watch

    # Check credentials and exit
    echo-watch --verify

    # Run with custom poll interval
    echo-watch --poll-interval 30

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes current cycle)

CONFIGURATION:
    Configuration file: ~/.config/echocast/config.toml (or $ECHOCAST_CONFIG)
    Credentials: environment, seeded from keys.env when present

    [watch]
    handle = \"snafudefi\"   # account to watch (or USER_HANDLE)
    mention = \"elonmusk\"   # account mentioned in every reply
    poll_interval = 60     # seconds between cycles

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or authentication error
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Dotenv file with credentials (default: keys.env if present)
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Verify credentials, print the account name and exit
    #[arg(long)]
    verify: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        error!("echo-watch stopped: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    config::load_env_file(cli.env_file.as_deref())?;

    let mut config = Config::load()?;
    if let Some(interval) = cli.poll_interval {
        config.watch.poll_interval = interval;
        config.validate()?;
    }

    logging::init_default(cli.verbose, Some(PathBuf::from(&config.logging.error_log)))?;
    info!("echo-watch starting");

    let secrets = Secrets::from_env()?;
    let notifier = EmailNotifier::from_secrets(&config.email, &secrets)?;
    let feed: Arc<dyn FeedClient> = Arc::new(XClient::from_secrets(&config.x, secrets)?);

    if cli.verify {
        return verify(feed.as_ref()).await;
    }

    let mut scheduler = Scheduler::from_config(&config, feed, Arc::new(notifier));
    info!(
        "Watching @{} every {}s",
        config.watch.handle, config.watch.poll_interval
    );

    if cli.once {
        scheduler.run_guarded().await;
        info!("echo-watch: ran one cycle, exiting");
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;
    scheduler.run(&shutdown).await;

    info!("echo-watch stopped");
    Ok(())
}

async fn verify(feed: &dyn FeedClient) -> Result<()> {
    info!("Verifying credentials...");
    let identity = feed.verify_credentials().await?;
    println!("Authenticated as @{}", identity.username);
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| EchocastError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping after the current cycle...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}
