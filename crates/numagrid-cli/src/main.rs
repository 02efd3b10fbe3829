use std::path::PathBuf;

use clap::{Parser, Subcommand};
use numagrid_core::ResourceClass;

mod commands;

#[derive(Parser)]
#[command(
    name = "numagrid",
    about = "numagrid: NUMA-aware admission and resource accounting",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to numagrid.toml (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the NUMA topology and inventory a host would report
    Inventory {
        /// Host description (JSON HostInfo)
        #[arg(long)]
        host: PathBuf,
    },
    /// Register a host's inventory in the ledger, reshaping if needed
    Report {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        provider: String,
        /// Host description (JSON HostInfo)
        #[arg(long)]
        host: PathBuf,
    },
    /// Place a workload on the first of the ranked hosts that accepts it
    Schedule {
        #[arg(long)]
        db: PathBuf,
        /// Placement request (JSON)
        #[arg(long)]
        request: PathBuf,
        /// Ranked candidate hosts (JSON array of {provider_id, ...HostInfo})
        #[arg(long)]
        hosts: PathBuf,
        /// Live workload records per project, when quota usage comes from workloads
        #[arg(long)]
        workloads: Option<PathBuf>,
    },
    /// Start a live migration: claim a destination while the source stays held
    Migrate {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        request: PathBuf,
        #[arg(long)]
        hosts: PathBuf,
        /// Provider the workload currently runs on
        #[arg(long)]
        source: String,
        /// Consumer id for the destination allocation
        #[arg(long)]
        migration_id: String,
        #[arg(long)]
        workloads: Option<PathBuf>,
    },
    /// Finish a migration on the destination
    Confirm {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        workload: String,
    },
    /// Abandon a migration and keep the source allocation
    Revert {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        workload: String,
    },
    /// Show provider or project usage
    Usages {
        #[arg(long)]
        db: PathBuf,
        /// One provider's generation, inventory and usage
        #[arg(long, conflicts_with = "project")]
        provider: Option<String>,
        /// A project's usage summed across providers
        #[arg(long)]
        project: Option<String>,
    },
    /// Move a provider's accounting from one resource class to another
    Reshape {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        provider: String,
        #[arg(long, default_value = "VCPU")]
        from: ResourceClass,
        #[arg(long, default_value = "PCPU")]
        to: ResourceClass,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("numagrid=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Inventory { host } => {
            commands::print_json(&commands::host::inventory(&config, &host)?)
        }
        Commands::Report { db, provider, host } => {
            commands::print_json(&commands::host::report(&config, &db, &provider, &host)?)
        }
        Commands::Schedule {
            db,
            request,
            hosts,
            workloads,
        } => {
            let outcome =
                commands::schedule::schedule(&config, &db, &request, &hosts, workloads.as_deref())
                    .await?;
            commands::print_json(&outcome)
        }
        Commands::Migrate {
            db,
            request,
            hosts,
            source,
            migration_id,
            workloads,
        } => {
            let target = commands::schedule::MigrationArgs {
                source: &source,
                migration_id: &migration_id,
            };
            let outcome = commands::schedule::migrate(
                &config,
                &db,
                &request,
                &hosts,
                workloads.as_deref(),
                target,
            )
            .await?;
            commands::print_json(&outcome)
        }
        Commands::Confirm { db, workload } => {
            commands::print_json(&commands::ledger::confirm(&db, &workload)?)
        }
        Commands::Revert { db, workload } => {
            commands::print_json(&commands::ledger::revert(&db, &workload)?)
        }
        Commands::Usages {
            db,
            provider,
            project,
        } => commands::print_json(&commands::ledger::usages(
            &db,
            provider.as_deref(),
            project.as_deref(),
        )?),
        Commands::Reshape {
            db,
            provider,
            from,
            to,
        } => commands::print_json(&commands::ledger::reshape(&db, &provider, &from, &to)?),
    }
}
