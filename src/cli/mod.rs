//! The CLI surface: `apply`/`bundled` drive a `Runner` to convergence;
//! `validate`/`dump` exercise the construction path alone. This module is a
//! thin clap front end over `bundle`/`runner`/`config`, never duplicating
//! their logic.

use crate::config;
use crate::error::Result;
use crate::platform::local::LocalPlatform;
use crate::runner::Runner;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "fuselage",
    version,
    about = "Declarative, idempotent system configuration engine"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by `apply` and `bundled`.
#[derive(clap::Args, Debug)]
pub struct RunFlags {
    /// Directory for the persisted trigger map and provenance log.
    #[arg(long, default_value = "/var/run/fuselage")]
    pub state: PathBuf,

    /// Describe changes without performing them.
    #[arg(short = 's', long)]
    pub simulate: bool,

    /// Resume a bundle apply interrupted mid-run.
    #[arg(long, conflicts_with = "no_resume")]
    pub resume: bool,

    /// Discard a saved trigger map and start fresh.
    #[arg(long)]
    pub no_resume: bool,

    /// Do not treat "nothing changed" as an error.
    #[arg(long)]
    pub no_changes_ok: bool,

    /// Increase verbosity (repeatable).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease verbosity (repeatable).
    #[arg(short = 'q', long, action = clap::ArgAction::Count)]
    pub quiet: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Converge the target host to a bundle's declared state.
    Apply {
        /// Path to the bundle (.yaml/.yml or canonical .json).
        bundle: PathBuf,
        #[command(flatten)]
        flags: RunFlags,
    },

    /// Parse and bind a bundle without applying it.
    Validate {
        /// Path to the bundle (.yaml/.yml or canonical .json).
        bundle: PathBuf,
    },

    /// Print a bundle's canonical versioned JSON form.
    Dump {
        /// Path to the bundle (.yaml/.yml or canonical .json).
        bundle: PathBuf,
    },

    /// Apply the `resources.json` packaged alongside this executable.
    Bundled {
        #[command(flatten)]
        flags: RunFlags,
    },
}

pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Apply { bundle, flags } => {
            let loaded = config::load_bundle_file(&bundle)?;
            run(&loaded, flags)
        }
        Commands::Bundled { flags } => {
            let loaded = crate::bundled::load_bundled_from_current_exe()?;
            run(&loaded, flags)
        }
        Commands::Validate { bundle } => cmd_validate(&bundle),
        Commands::Dump { bundle } => cmd_dump(&bundle),
    }
}

fn run(bundle: &crate::bundle::Bundle, flags: RunFlags) -> Result<()> {
    let platform = LocalPlatform::new();
    let mut runner = Runner::new(
        &platform,
        &flags.state,
        flags.simulate,
        flags.resume,
        flags.no_resume,
        flags.no_changes_ok,
        flags.verbose,
        flags.quiet,
    )?;
    bundle.apply(&mut runner)
}

fn cmd_validate(path: &Path) -> Result<()> {
    let bundle = config::load_bundle_file(path)?;
    println!("bundle is valid: {} resource(s)", bundle.len());
    Ok(())
}

fn cmd_dump(path: &Path) -> Result<()> {
    let bundle = config::load_bundle_file(path)?;
    println!("{}", bundle.dumps()?);
    Ok(())
}
