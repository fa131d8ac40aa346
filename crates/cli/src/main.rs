use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use switchboard_config::{SwitchboardConfig, apply_env_overrides};

#[derive(Parser)]
#[command(
    name = "switchboard",
    about = "Switchboard — OpenAI-compatible gateway over pooled browser clients"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true, env = "SWITCHBOARD_BIND")]
    bind: Option<String>,

    /// Port to listen on (overrides config value).
    #[arg(long, global = true, env = "SWITCHBOARD_PORT")]
    port: Option<u16>,

    /// Explicit config file (overrides discovery).
    #[arg(long, global = true, env = "SWITCHBOARD_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Serve,
    /// Print the advertised model list.
    Models,
    /// Load the config, apply overrides, and print the effective values.
    CheckConfig,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SwitchboardConfig> {
    let mut config = match &cli.config {
        Some(path) => apply_env_overrides(switchboard_config::load_config(path)?),
        None => switchboard_config::discover_and_load(),
    };
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            info!(
                bind = %config.server.bind,
                port = config.server.port,
                "starting switchboard gateway"
            );
            switchboard_gateway::server::run(config).await
        },
        Commands::Models => {
            for card in config.model_cards() {
                println!("{}", serde_json::to_string_pretty(&card)?);
            }
            Ok(())
        },
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        },
    }
}
