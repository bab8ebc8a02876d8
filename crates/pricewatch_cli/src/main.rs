mod commands;
mod output;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::Result;
use owo_colors::OwoColorize;
use pricewatch_core::GuildId;
use pricewatch_core::config::{self, PricewatchConfig};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

const DEFAULT_FILTER: &str = "pricewatch_core=info,pricewatch_discord=info,pricewatch_cli=info,warn";
const DEBUG_FILTER: &str =
    "pricewatch_core=debug,pricewatch_discord=debug,pricewatch_cli=debug,serenity=info,warn";

#[derive(Parser)]
#[command(name = "pricewatch")]
#[command(about = "Discord bot that keeps crypto prices in channel names")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Guild store file path (overrides config)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Also write daily-rotated log files to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to Discord and keep channel names updated (default)
    Run,
    /// Configuration management
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
    /// Show persisted channel mappings
    Mappings {
        /// Only show this guild
        #[arg(long)]
        guild: Option<GuildId>,
    },
    /// Fetch current prices for coin ids
    Price {
        /// CoinGecko coin ids, e.g. bitcoin
        #[arg(required = true)]
        coins: Vec<String>,
    },
    /// Check whether a coin id is known to the price API
    Validate { coin: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration (secrets redacted)
    Show,
    /// Write a configuration file with the current settings
    Init {
        /// Path to write to
        #[arg(default_value = "pricewatch.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(debug: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt::time::LocalTime;
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    // RUST_LOG wins over --debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug { DEBUG_FILTER } else { DEFAULT_FILTER })
    });

    let console = fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(false)
        .with_timer(LocalTime::rfc_3339())
        .compact();

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                miette::miette!("Cannot create log directory {}: {}", dir.display(), e)
            })?;
            let appender = tracing_appender::rolling::daily(dir, "pricewatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn load_config(cli: &Cli) -> Result<PricewatchConfig> {
    let mut config = if let Some(config_path) = &cli.config {
        info!("Loading config from: {:?}", config_path);
        config::load_config(config_path).await?
    } else {
        info!("Loading config from standard locations");
        config::load_config_from_standard_locations().await?
    };

    config.apply_env_overrides();

    if let Some(store) = &cli.store {
        info!("Overriding store path with: {:?}", store);
        config.store.path = store.clone();
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .rgb_colors(miette::RgbColors::Preferred)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))?;
    miette::set_panic_hook();
    let cli = Cli::parse();

    // Held until exit so buffered file logs are flushed
    let _log_guard = init_logging(cli.debug, cli.log_dir.as_deref())?;

    let config = load_config(&cli).await?;
    tracing::debug!("Using store at {}", config.store.path.display());

    match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => {
            println!("{}", "Starting pricewatch...".bright_green());
            pricewatch_discord::run_discord_bot(&config).await?;
        }
        Commands::Config { cmd } => match cmd {
            ConfigCommands::Show => commands::config::show(&config).await?,
            ConfigCommands::Init { path, force } => {
                commands::config::init(&config, path, *force).await?
            }
        },
        Commands::Mappings { guild } => {
            commands::mappings::list(&config.store.path, *guild).await?
        }
        Commands::Price { coins } => commands::price::show(&config, coins).await?,
        Commands::Validate { coin } => commands::price::validate(&config, coin).await?,
    }

    Ok(())
}
