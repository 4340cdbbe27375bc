use clap::Parser;
use escrow_settlement::cli::{self, Cli, Commands, DbCommands, MonitorCommands, WithdrawalCommands};
use escrow_settlement::config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::from_env()?;

    let args = Cli::parse();
    match args.command.unwrap_or(Commands::Serve { in_memory: false }) {
        Commands::Serve { in_memory } => cli::handle_serve(&config, in_memory).await,
        Commands::Monitor(MonitorCommands::Once) => cli::handle_monitor_once(&config).await,
        Commands::Monitor(MonitorCommands::Sweep) => cli::handle_monitor_sweep(&config).await,
        Commands::Withdrawals(WithdrawalCommands::Process { id, limit }) => {
            cli::handle_withdrawals_process(&config, id, limit).await
        }
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
    }
}
