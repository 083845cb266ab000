mod catalog;
mod cost;
mod runs;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::catalog::CompanyCommands;
use crate::cost::CostArgs;
use crate::runs::RunCommands;

#[derive(Debug, Parser)]
#[command(name = "aivis-cli")]
#[command(about = "AIVIS report pipeline command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Manage companies, their questions, and competitors
    Company {
        #[command(subcommand)]
        command: CompanyCommands,
    },
    /// Create, queue, execute, and inspect report runs
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Process queued report jobs until interrupted
    Worker {
        /// Claim and process at most one job, then exit
        #[arg(long)]
        once: bool,
    },
    /// Price a single backend invocation against the pricing table
    Cost(CostArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Apply pending migrations
    Migrate,
    /// Check database connectivity
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(std::env::var("AIVIS_LOG_LEVEL").unwrap_or_else(|_| "info".into()))
    })?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Db {
            command: DbCommands::Migrate,
        }) => {
            let (_, pool) = connect().await?;
            let applied = aivis_db::run_migrations(&pool).await?;
            println!("applied {applied} migration(s)");
        }
        Some(Commands::Db {
            command: DbCommands::Ping,
        }) => {
            let (_, pool) = connect().await?;
            aivis_db::health_check(&pool).await?;
            println!("database ok");
        }
        Some(Commands::Company { command }) => {
            let (_, pool) = connect().await?;
            catalog::run_company_command(&pool, command).await?;
        }
        Some(Commands::Run { command }) => {
            let (config, pool) = connect().await?;
            runs::run_run_command(&pool, &config, command).await?;
        }
        Some(Commands::Worker { once }) => {
            let (config, pool) = connect().await?;
            runs::run_worker_command(pool, &config, once).await?;
        }
        Some(Commands::Cost(args)) => cost::run_cost(&args)?,
        None => println!("aivis-cli ready; run with --help for commands"),
    }

    Ok(())
}

/// Load configuration and open the database pool.
async fn connect() -> anyhow::Result<(aivis_core::AppConfig, sqlx::PgPool)> {
    let config = aivis_core::load_app_config()?;
    let pool_config = aivis_db::PoolConfig::from_app_config(&config);
    let pool = aivis_db::connect_pool(&config.database_url, pool_config).await?;
    Ok((config, pool))
}

#[cfg(test)]
mod tests;
