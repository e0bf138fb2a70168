//! azdo-tools CLI: runs the MCP server over stdio and manages the local
//! configuration file.

use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use azdo_client::AzureClient;
use azdo_core::Config;
use azdo_mcp::McpServer;
use azdo_watch::{ReportMode, WatchConfig, WatchContext};

#[derive(Parser)]
#[command(name = "azdo-tools")]
#[command(author, version, about = "Azure DevOps tools over the Model Context Protocol", long_about = None)]
struct Cli {
    /// Log filter, e.g. `info` or `azdo_client=debug` (overrides RUST_LOG)
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server on stdin/stdout (the default when no command
    /// is given)
    Serve(ServeArgs),

    /// Inspect or edit the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Start the background test watcher (`--test-watch=false` disables)
    #[arg(
        long,
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        action = clap::ArgAction::Set
    )]
    test_watch: Option<bool>,

    /// Shell command for the test watcher
    #[arg(long, value_name = "CMD")]
    test_watch_command: Option<String>,

    /// When to append watcher status to tool results: changed, always, or off
    #[arg(long, value_name = "MODE")]
    test_watch_report: Option<ReportMode>,

    /// Log the parsed watcher output at debug level
    #[arg(long)]
    test_watch_debug: bool,

    /// Send an MCP log notification when the test status changes
    #[arg(long)]
    test_watch_notify: bool,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the resolved configuration with the PAT masked
    Show,

    /// Set a value, e.g. `config set azure.org_url https://dev.azure.com/acme`
    Set { key: String, value: String },

    /// Print a single value
    Get { key: String },

    /// Print the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_level.as_deref());

    match cli.command {
        Some(Commands::Serve(args)) => serve(args).await,
        Some(Commands::Config { command }) => run_config(command),
        None => serve(ServeArgs::default()).await,
    }
}

/// Logs go to stderr; stdout belongs to the MCP transport.
fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(spec) => EnvFilter::new(spec),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = Config::resolve().context("Failed to load configuration")?;
    config.validate().context(
        "Configuration is incomplete; set AZURE_DEVOPS_ORG_URL and AZURE_DEVOPS_PAT \
         or run `azdo-tools config set`",
    )?;

    let client = Arc::new(AzureClient::from_config(&config)?);
    let watch = WatchContext::new(watch_config(&config, &args)?);

    if watch.enabled().await {
        watch.start().await;
    }
    let heartbeat = watch.spawn_heartbeat();

    let mut server = McpServer::new(client, watch.clone());
    let result = server.run().await;

    heartbeat.abort();
    watch.shutdown().await;
    result.map_err(Into::into)
}

/// Watcher settings from the config file with command-line overrides on top.
fn watch_config(config: &Config, args: &ServeArgs) -> anyhow::Result<WatchConfig> {
    let settings = &config.watch;
    let report = match args.test_watch_report {
        Some(mode) => mode,
        None => settings
            .report
            .parse()
            .with_context(|| format!("Invalid watch.report value '{}'", settings.report))?,
    };
    Ok(WatchConfig {
        enabled: args.test_watch.unwrap_or(settings.enabled),
        command: args
            .test_watch_command
            .clone()
            .unwrap_or_else(|| settings.command.clone()),
        cwd: std::env::current_dir().ok(),
        report,
        debug: settings.debug || args.test_watch_debug,
        notify: settings.notify || args.test_watch_notify,
    })
}

fn run_config(command: ConfigCommands) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Show => {
            let mut config = Config::resolve()?;
            if config.azure.pat.is_some() {
                config.azure.pat = Some("********".to_string());
            }
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigCommands::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            println!("{} updated", key);
        }
        ConfigCommands::Get { key } => {
            let config = Config::resolve()?;
            match config.get(&key)? {
                Some(value) => println!("{}", value),
                None => println!("(unset)"),
            }
        }
        ConfigCommands::Path => {
            println!("{}", Config::config_path()?.display());
        }
    }
    Ok(())
}
