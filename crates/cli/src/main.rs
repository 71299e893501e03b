use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use emrsync_core::config::{
    data_dir_from_env_value, profiles_file_from_env_value, purge_interval_from_env_value,
};
use emrsync_core::merge::viral_load::parse_collection_date;
use emrsync_core::{
    CaseAggregator, CoreConfig, FileSyncRepository, ProfileService, PurgeSweeper,
    SyncArtifactService, SyncRepository, SyncTaskService, ViralLoadOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "emrsync")]
#[command(about = "EMR sync store CLI")]
struct Cli {
    /// Data directory (overrides EMRSYNC_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync profile registry
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
    /// Sync artifacts
    Resource {
        #[command(subcommand)]
        command: ResourceCommand,
    },
    /// List artifacts expired now
    Expired,
    /// Purge every expired artifact
    Purge,
    /// Case-based artifact groups
    Case {
        #[command(subcommand)]
        command: CaseCommand,
    },
    /// Legacy push task ledger
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    /// Viral load helpers
    Vl {
        #[command(subcommand)]
        command: VlCommand,
    },
}

#[derive(Subcommand)]
enum ProfileCommand {
    /// Import profiles from a YAML file
    Import {
        /// Profile file (defaults to EMRSYNC_PROFILES_FILE)
        file: Option<PathBuf>,
    },
    /// List stored profiles
    List,
    /// Print stored profiles as YAML
    Export,
}

#[derive(Subcommand)]
enum ResourceCommand {
    /// List artifacts of a profile
    List {
        profile: Uuid,
        /// Include synced artifacts
        #[arg(long)]
        all: bool,
    },
    /// Mark an artifact synced
    MarkSynced { resource: Uuid },
}

#[derive(Subcommand)]
enum CaseCommand {
    /// List cases of a profile
    List { profile: Uuid },
    /// Print the pending bundle of a case
    Bundle { case: Uuid },
}

#[derive(Subcommand)]
enum TaskCommand {
    /// List tasks still awaiting an action
    Pending { task_type: Uuid },
}

#[derive(Subcommand)]
enum VlCommand {
    /// Classify a qualitative viral load result
    Classify { qualitative: String },
    /// Parse a sample collection date
    ParseDate { date: String },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("emrsync=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let data_dir = cli
        .data_dir
        .unwrap_or_else(|| data_dir_from_env_value(std::env::var("EMRSYNC_DATA_DIR").ok()));
    let cfg = Arc::new(CoreConfig::new(
        data_dir,
        profiles_file_from_env_value(std::env::var("EMRSYNC_PROFILES_FILE").ok()),
        purge_interval_from_env_value(std::env::var("EMRSYNC_PURGE_INTERVAL_SECS").ok())?,
    )?);
    let repo: Arc<dyn SyncRepository> = Arc::new(FileSyncRepository::new(cfg.clone()));
    let artifacts = Arc::new(SyncArtifactService::new(repo.clone()));

    match cli.command {
        Some(Commands::Profile { command }) => {
            let profiles = ProfileService::new(repo);
            match command {
                ProfileCommand::Import { file } => {
                    let file = file
                        .or_else(|| cfg.profiles_file().map(PathBuf::from))
                        .context("no profile file given and EMRSYNC_PROFILES_FILE is not set")?;
                    let imported = profiles.import_file(&file)?;
                    println!("Imported {} profile(s) from {}", imported.len(), file.display());
                }
                ProfileCommand::List => {
                    let all = profiles.all_profiles()?;
                    if all.is_empty() {
                        println!("No profiles found.");
                    }
                    for p in all {
                        println!(
                            "{}  {}  case_based={} enabled={} keep={}d",
                            p.uuid,
                            p.name,
                            p.case_based,
                            p.enabled,
                            p.duration_to_keep_synced_resources
                        );
                    }
                }
                ProfileCommand::Export => print!("{}", profiles.export_yaml()?),
            }
        }
        Some(Commands::Resource { command }) => match command {
            ResourceCommand::List { profile, all } => {
                let now = Utc::now();
                for r in artifacts.list_by_profile(profile, all)? {
                    println!(
                        "{}  {}  {}  {}",
                        r.uuid(),
                        r.resource_type(),
                        r.state(now),
                        r.fingerprint()
                    );
                }
            }
            ResourceCommand::MarkSynced { resource } => {
                let synced = artifacts.mark_synced(resource)?;
                match synced.expiry_date() {
                    Some(expiry) => println!("Marked {resource} synced, expires {expiry}"),
                    None => println!("Marked {resource} synced"),
                }
            }
        },
        Some(Commands::Expired) => {
            for r in artifacts.expired(Utc::now())? {
                println!("{}  {}  {}", r.uuid(), r.profile(), r.resource_type());
            }
        }
        Some(Commands::Purge) => {
            let report = PurgeSweeper::new(artifacts).sweep(Utc::now())?;
            println!("Purged {} artifact(s)", report.purged_count());
            for (uuid, reason) in report.failed {
                eprintln!("Failed to purge {uuid}: {reason}");
            }
        }
        Some(Commands::Case { command }) => {
            let cases = CaseAggregator::new(repo, artifacts);
            match command {
                CaseCommand::List { profile } => {
                    for c in cases.cases_by_profile(profile)? {
                        println!("{}  {}  {}", c.uuid, c.patient, c.case_identifier);
                    }
                }
                CaseCommand::Bundle { case } => {
                    let bundle = cases.case_bundle(case)?;
                    println!("{}", serde_json::to_string_pretty(&bundle)?);
                }
            }
        }
        Some(Commands::Task { command }) => {
            let tasks = SyncTaskService::new(repo);
            match command {
                TaskCommand::Pending { task_type } => {
                    for t in tasks.incomplete_action_tasks(task_type)? {
                        println!(
                            "{}  {}  {}",
                            t.uuid,
                            t.sync_task,
                            t.status.as_deref().unwrap_or("-")
                        );
                    }
                }
            }
        }
        Some(Commands::Vl { command }) => match command {
            VlCommand::Classify { qualitative } => {
                let outcome = ViralLoadOutcome::classify(&qualitative);
                println!("{outcome} (concept {})", outcome.concept());
            }
            VlCommand::ParseDate { date } => {
                println!("{}", parse_collection_date(&date)?);
            }
        },
        None => {
            println!("Use 'emrsync --help' for commands");
        }
    }

    Ok(())
}
