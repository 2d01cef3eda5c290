//! Linkage CLI
//!
//! Command-line interface over a journal-backed linkage state directory:
//! - Seeding identities and match records from source catalog files
//! - Convergence passes (assignment, formation, consistency, merge)
//! - Administrative merge/split/removal and forbidden-edge revocation
//! - State summaries (text or JSON)
//!
//! Every invocation recovers state from the directory's snapshot and journal,
//! runs one command, and checkpoints. A lock file keeps two invocations from
//! writing the same directory at once.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::Colorize;

use linkage_core::{EngineConfig, LinkageEngine, LinkageState, ProgressEvent};
use linkage_store::{GroupId, HypostasisId, JournalSink, MemoryCatalog, RecordId};

#[derive(Parser)]
#[command(name = "linkage")]
#[command(
    author,
    version,
    about = "Incremental record linkage over source catalogs"
)]
struct Cli {
    /// State directory holding the journal and snapshot.
    #[arg(long, global = true, default_value = "linkage-state")]
    state_dir: PathBuf,

    /// Engine configuration file (JSON); defaults apply when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log engine internals to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed identities and match records from a source catalog file.
    Seed {
        /// Source catalog (JSON).
        catalog: PathBuf,
    },

    /// Run one convergence pass: assignment, formation, consistency and,
    /// with `--merge`, a merge of every consistent multi-member group.
    Run {
        /// Re-sync against this catalog before the pass.
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Bucket date for records without a birth date (defaults to today).
        #[arg(long)]
        today: Option<NaiveDate>,
        /// Merge consistent groups at the end of the pass.
        #[arg(long)]
        merge: bool,
    },

    /// Take in one hypostasis: backfill its person and match record, then
    /// seek a group for it.
    Intake {
        /// Hypostasis id.
        hypostasis: u32,
        /// Source catalog (JSON).
        catalog: PathBuf,
    },

    /// Print a state summary.
    Report {
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Merge one group onto its canonical person.
    Merge {
        /// Group id.
        group: u32,
        /// Pivot on member persons and absorb their records from other groups.
        #[arg(long)]
        by_persons: bool,
    },

    /// Split a group and forbid its members from re-clustering.
    Split {
        /// Group id.
        group: u32,
    },

    /// Remove one record from its group.
    Remove {
        /// Record id.
        record: u32,
    },

    /// Revoke forbidden relations.
    Allow {
        #[command(subcommand)]
        command: AllowCommands,
    },
}

#[derive(Subcommand)]
enum AllowCommands {
    /// Allow a record pair to cluster again.
    Records {
        /// First record id.
        a: u32,
        /// Second record id.
        b: u32,
    },
    /// Allow a record to join a group again.
    Group {
        /// Record id.
        record: u32,
        /// Group id.
        group: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Commands::Run { merge: true, .. } = &cli.command {
        config.merge_on_pass = true;
    }

    let _lock = StateLock::acquire(&cli.state_dir)?;
    let journal = Arc::new(
        JournalSink::open(&cli.state_dir)
            .with_context(|| format!("opening state directory {}", cli.state_dir.display()))?,
    );
    let state = LinkageState::recover(&journal).context("recovering linkage state")?;
    let mut engine = LinkageEngine::new(state, config, Box::new(Arc::clone(&journal)));

    match cli.command {
        Commands::Seed { catalog } => cmd_seed(&mut engine, &catalog)?,
        Commands::Run { catalog, today, .. } => {
            cmd_run(&mut engine, catalog.as_deref(), today)?;
        }
        Commands::Intake {
            hypostasis,
            catalog,
        } => cmd_intake(&mut engine, HypostasisId::new(hypostasis), &catalog)?,
        Commands::Report { json } => cmd_report(&engine, json)?,
        Commands::Merge { group, by_persons } => {
            cmd_merge(&mut engine, GroupId::new(group), by_persons)?;
        }
        Commands::Split { group } => cmd_split(&mut engine, GroupId::new(group))?,
        Commands::Remove { record } => cmd_remove(&mut engine, RecordId::new(record))?,
        Commands::Allow { command } => match command {
            AllowCommands::Records { a, b } => {
                engine.allow_pair(RecordId::new(a), RecordId::new(b))?;
                eprintln!("{} records {a} and {b} may cluster again", "ok".green().bold());
            }
            AllowCommands::Group { record, group } => {
                engine.allow_group(RecordId::new(record), GroupId::new(group))?;
                eprintln!(
                    "{} record {record} may join group {group} again",
                    "ok".green().bold()
                );
            }
        },
    }

    journal
        .checkpoint(engine.state())
        .context("writing checkpoint")?;
    Ok(())
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_catalog(path: &Path) -> Result<MemoryCatalog> {
    let file =
        File::open(path).with_context(|| format!("opening catalog {}", path.display()))?;
    serde_json::from_reader(file).with_context(|| format!("parsing catalog {}", path.display()))
}

fn cmd_seed(engine: &mut LinkageEngine, catalog: &Path) -> Result<()> {
    let catalog = load_catalog(catalog)?;
    let report = engine.sync(&catalog)?;
    eprintln!(
        "{} seeded {} hypostases, {} persons, {} match records ({} snapshots refreshed)",
        "ok".green().bold(),
        report.seed.hypostases_created,
        report.seed.persons_created,
        report.records_created,
        report.snapshots_refreshed,
    );
    for error in &report.errors {
        eprintln!("  {} {}", "skip".yellow().bold(), error);
    }
    Ok(())
}

fn cmd_run(
    engine: &mut LinkageEngine,
    catalog: Option<&Path>,
    today: Option<NaiveDate>,
) -> Result<()> {
    if let Some(path) = catalog {
        let catalog = load_catalog(path)?;
        let report = engine.sync(&catalog)?;
        eprintln!(
            "  {} synced: {} new records, {} snapshots refreshed",
            "→".cyan(),
            report.records_created,
            report.snapshots_refreshed,
        );
    }

    engine.on_event(Box::new(|event| match event {
        ProgressEvent::PhaseStarted { phase, .. } => {
            eprintln!("  {} {phase}", "→".cyan());
        }
        ProgressEvent::EntityFailed { error, .. } => {
            eprintln!("  {} {error}", "skip".yellow().bold());
        }
        _ => {}
    }));

    let today = today.unwrap_or_else(|| chrono::Utc::now().date_naive());
    let report = engine.run_pass(today)?;

    if report.cancelled {
        eprintln!("{} pass {} cancelled", "warning:".yellow().bold(), report.run);
        return Ok(());
    }
    eprintln!(
        "{} pass {}: {} assigned, {} groups formed, {} flags changed, {} merged",
        "ok".green().bold(),
        report.run,
        report.assignment.records_attached,
        report.formation.groups_created,
        report.consistency_changes,
        report.groups_merged,
    );
    Ok(())
}

fn cmd_intake(
    engine: &mut LinkageEngine,
    hypostasis: HypostasisId,
    catalog: &Path,
) -> Result<()> {
    let catalog = load_catalog(catalog)?;
    let report = engine.intake(hypostasis, &catalog)?;
    let record = if report.record_created {
        "new record"
    } else {
        "existing record"
    };
    match report.group {
        Some(group) => eprintln!(
            "{} hypostasis {hypostasis}: {record} {} joined group {group}",
            "ok".green().bold(),
            report.record,
        ),
        None => eprintln!(
            "{} hypostasis {hypostasis}: {record} {} left unresolved",
            "ok".green().bold(),
            report.record,
        ),
    }
    Ok(())
}

fn cmd_report(engine: &LinkageEngine, json: bool) -> Result<()> {
    let state = engine.state();
    let unresolved = state.records.unresolved().len();
    let inconsistent = state.groups.iter().filter(|g| g.inconsistent).count();
    let merged = state.groups.iter().filter(|g| g.person.is_some()).count();

    if json {
        let report = serde_json::json!({
            "persons": state.store.person_count(),
            "hypostases": state.store.hypostasis_count(),
            "records": state.records.len(),
            "unresolved": unresolved,
            "groups": state.groups.len(),
            "inconsistent_groups": inconsistent,
            "merged_groups": merged,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("persons:    {}", state.store.person_count());
    println!("hypostases: {}", state.store.hypostasis_count());
    println!(
        "records:    {} ({unresolved} unresolved)",
        state.records.len()
    );
    println!(
        "groups:     {} ({inconsistent} inconsistent, {merged} merged)",
        state.groups.len()
    );
    Ok(())
}

fn cmd_merge(engine: &mut LinkageEngine, group: GroupId, by_persons: bool) -> Result<()> {
    let report = if by_persons {
        engine.merge_by_persons(group)?
    } else {
        engine.merge(group)?
    };
    eprintln!(
        "{} merged group {group} onto person {} ({} records rewritten, {} persons deleted, {} groups collapsed)",
        "ok".green().bold(),
        report.target,
        report.records_rewritten,
        report.persons_deleted,
        report.groups_collapsed,
    );
    Ok(())
}

fn cmd_split(engine: &mut LinkageEngine, group: GroupId) -> Result<()> {
    let report = engine.split(group)?;
    eprintln!(
        "{} split group {group}: {} records freed, {} forbidden edges, {} reassigned, {} regrouped",
        "ok".green().bold(),
        report.members_freed,
        report.forbidden_edges_added,
        report.reassigned,
        report.regrouped,
    );
    for error in &report.errors {
        eprintln!("  {} {}", "skip".yellow().bold(), error);
    }
    Ok(())
}

fn cmd_remove(engine: &mut LinkageEngine, record: RecordId) -> Result<()> {
    let report = engine.remove(record)?;
    match report.destination {
        Some(group) => eprintln!(
            "{} removed record {record} from group {} into group {group}",
            "ok".green().bold(),
            report.group,
        ),
        None => eprintln!(
            "{} removed record {record} from group {}, now unresolved",
            "ok".green().bold(),
            report.group,
        ),
    }
    for error in &report.errors {
        eprintln!("  {} {}", "skip".yellow().bold(), error);
    }
    Ok(())
}

/// Exclusive lock on a state directory, released on drop.
struct StateLock {
    path: PathBuf,
}

impl StateLock {
    fn acquire(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating state directory {}", dir.display()))?;
        let path = dir.join("linkage.lock");
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => bail!(
                "state directory {} is locked; remove {} if no other process is running",
                dir.display(),
                path.display()
            ),
            Err(e) => {
                Err(e).with_context(|| format!("creating lock file {}", path.display()))
            }
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
