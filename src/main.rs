use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ball_rtc::config::{self, AppConfig};
use ball_rtc::display::{DisplaySink, NullDisplay, SnapshotDisplay};
use ball_rtc::{client, server};

/// Snapshot cadence of the client display (one per second at 30 fps)
const SNAPSHOT_EVERY: u64 = 30;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// ball-rtc command line arguments
#[derive(Parser, Debug)]
#[command(name = "ball-rtc")]
#[command(version, about = "Bouncing-ball tracking over WebRTC", long_about = None)]
struct CliArgs {
    #[command(subcommand)]
    command: Command,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream the ball and score the returned coordinates (offering side)
    Server(CommonArgs),
    /// Detect the ball in the received stream (answering side)
    Client {
        #[command(flatten)]
        common: CommonArgs,

        /// Keep a PNG snapshot of the received stream at this path
        #[arg(long, value_name = "FILE")]
        snapshot: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Signaling host (overrides config file)
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Signaling port (overrides config file)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// TOML config file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl CommonArgs {
    async fn load(&self) -> anyhow::Result<AppConfig> {
        let mut config = config::load_config(self.config.as_deref()).await?;
        if let Some(host) = &self.host {
            config.signaling.host = host.clone();
        }
        if let Some(port) = self.port {
            config.signaling.port = port;
        }
        config::validate(&config)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting ball-rtc v{}", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
        signal_cancel.cancel();
    });

    match args.command {
        Command::Server(common) => {
            let config = common.load().await?;
            tracing::info!("Signaling will listen on {}", config.signaling.addr());
            server::run(config, cancel).await?;
        }
        Command::Client { common, snapshot } => {
            let config = common.load().await?;
            tracing::info!("Signaling will dial {}", config.signaling.addr());
            let display: Box<dyn DisplaySink> = match snapshot {
                Some(path) => Box::new(SnapshotDisplay::new(path, SNAPSHOT_EVERY)),
                None => Box::new(NullDisplay),
            };
            client::run(config, display, cancel).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "ball_rtc=error,webrtc=error",
        LogLevel::Warn => "ball_rtc=warn,webrtc=warn",
        LogLevel::Info => "ball_rtc=info,webrtc=warn",
        LogLevel::Verbose => "ball_rtc=debug,webrtc=warn",
        LogLevel::Debug => "ball_rtc=debug,webrtc=info",
        LogLevel::Trace => "ball_rtc=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
