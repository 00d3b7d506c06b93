//! goodvibes-hook: CLI hook handler for goodvibes session automation.
//!
//! Called by the coding-agent host for each configured hook event. Each call
//! is a fresh process; all continuity lives in the project's state file.
//!
//! ## Subcommands
//!
//! - `handle`: Main hook handler, reads JSON from stdin
//! - `status`: Prints the persisted session state
//! - `feature-done`: Marks the active feature branch ready to merge

mod handle;
mod logging;

use clap::{Parser, Subcommand};
use goodvibes_core::{branch, AutomationConfig, StateStore, StorageConfig};

#[derive(Parser)]
#[command(name = "goodvibes-hook")]
#[command(about = "Checkpoint, branch and fix-loop automation for coding-agent hooks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle a hook event (reads JSON from stdin)
    Handle,

    /// Print the session state of a project
    Status {
        /// Project directory (defaults to the resolved project root)
        #[arg(long, value_name = "DIR")]
        project: Option<String>,
    },

    /// Mark the active feature branch as done; it merges on the next Stop
    FeatureDone {
        /// Project directory (defaults to the resolved project root)
        #[arg(long, value_name = "DIR")]
        project: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Handle => std::process::exit(handle::run()),
        Commands::Status { project } => {
            if let Err(e) = status(project.as_deref()) {
                eprintln!("goodvibes-hook status failed: {e}");
                std::process::exit(1);
            }
        }
        Commands::FeatureDone { project } => {
            if let Err(e) = feature_done(project.as_deref()) {
                eprintln!("goodvibes-hook feature-done failed: {e}");
                std::process::exit(1);
            }
        }
    }
}

/// An explicit `--project` wins over environment-derived roots.
fn storage_for(project: Option<&str>) -> goodvibes_core::Result<StorageConfig> {
    let storage = StorageConfig::resolve(None)?;
    Ok(match project {
        Some(dir) => storage.with_project_root(dir),
        None => storage,
    })
}

fn status(project: Option<&str>) -> goodvibes_core::Result<()> {
    let storage = storage_for(project)?;
    let state = StateStore::for_project(&storage).load();
    let json = serde_json::to_string_pretty(&state)
        .map_err(|e| goodvibes_core::VibesError::json("serialize state", e))?;
    println!("{json}");
    Ok(())
}

fn feature_done(project: Option<&str>) -> goodvibes_core::Result<()> {
    let storage = storage_for(project)?;
    let _logging_guard = logging::init(&storage.logs_dir());
    let config = AutomationConfig::load(&storage);
    let store = StateStore::for_project(&storage);

    let _lock = store.lock(config.lock_timeout());
    let mut state = store.load();
    if !branch::mark_feature_done(&mut state) {
        println!("No active feature branch");
        return Ok(());
    }
    store.save(&mut state)?;

    let feature = state.git.feature_branch.as_deref().unwrap_or_default();
    tracing::info!(feature, "Feature marked done");
    println!("{feature} will merge into {} on the next stop", state.git.main_branch);
    Ok(())
}
