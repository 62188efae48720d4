//! Command-line interface for the importer.

use std::path::{Path, PathBuf};

use clap::Parser;
use thiserror::Error;

use crate::config::{self, CheckoutMode, VERBOSE_BATON};
use crate::parser::{self, ParseError};
use crate::replay::{self, RcsDriver, ReplayError, ReplayOptions};
use crate::scratch::ScratchDir;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during CLI execution.
#[derive(Debug, Error)]
pub enum CliError {
    /// Stream parse error.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Replay error.
    #[error(transparent)]
    Replay(#[from] ReplayError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was interrupted by the user.
    #[error("interrupted")]
    Interrupted,
}

/// Result type for CLI operations.
pub type Result<T> = std::result::Result<T, CliError>;

// =============================================================================
// CLI Definition
// =============================================================================

/// rfi - import a fast-import stream into a tree of RCS master files.
///
/// The stream is read from standard input; the RCS tree is written under
/// the invocation directory.
#[derive(Parser, Debug)]
#[command(name = "rfi", version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (repeatable).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Plain mode: check in raw commit messages, no round-trip envelope.
    #[arg(short = 'p')]
    pub plain: bool,

    /// Check out working files locked once the import completes.
    #[arg(short = 'l', conflicts_with = "unlocked")]
    pub locked: bool,

    /// Check out working files unlocked once the import completes.
    #[arg(short = 'u')]
    pub unlocked: bool,
}

impl Cli {
    fn checkout_mode(&self) -> CheckoutMode {
        if self.locked {
            CheckoutMode::Locked
        } else if self.unlocked {
            CheckoutMode::Unlocked
        } else {
            CheckoutMode::None
        }
    }

    /// Run the import.
    pub async fn run(self) -> Result<()> {
        config::set_verbosity(self.verbose);
        let destination = std::env::current_dir()?;
        // The workspace is a sibling of the invocation directory, so the
        // final installation is a same-filesystem rename.
        let workspace_root = destination
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| destination.clone());
        let options = ReplayOptions {
            plain: self.plain,
            checkout: self.checkout_mode(),
            destination: destination.clone(),
            workspace_root,
        };
        tokio::select! {
            result = run_import(destination, options) => result,
            _ = tokio::signal::ctrl_c() => Err(CliError::Interrupted),
        }
    }
}

/// Parse, resolve and replay the stream from standard input.
///
/// Dropping this future on interrupt unwinds the scratch and workspace
/// guards, so teardown runs on every exit path.
async fn run_import(invocation_dir: PathBuf, options: ReplayOptions) -> Result<()> {
    let scratch = ScratchDir::create(&invocation_dir).await?;
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    let mut repo = parser::parse_stream(input, scratch).await?;

    let driver = RcsDriver::new();
    let stats = replay::replay(&mut repo, &driver, &options).await?;
    if config::chatter(VERBOSE_BATON) {
        println!(
            "{} commits, {} check-ins, {} tags imported",
            stats.commits, stats.checkins, stats.tags
        );
    }
    Ok(())
}

/// Main entry point for the CLI.
pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.run().await
}
