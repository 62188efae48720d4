//! The VCS driver seam and its RCS implementation.
//!
//! The replay engine talks to version control through [`VcsDriver`], a
//! strategy trait over the handful of operations the import needs. The
//! production implementation synthesizes `ci` / `co` / `rcs` command
//! strings and runs them through `sh -c`, so output redirection survives
//! quoting; tests substitute a recording fake.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::config::{self, VERBOSE_COMMANDS};
use crate::model::RevId;

// =============================================================================
// Error Types
// =============================================================================

/// Errors from driving the external toolchain.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("I/O error running command: {0}")]
    Io(#[from] std::io::Error),

    #[error("command exited with status {status}: {command}")]
    CommandFailed { command: String, status: i32 },

    #[error("command killed by signal: {command}")]
    CommandSignaled { command: String },
}

pub type Result<T> = std::result::Result<T, DriverError>;

// =============================================================================
// VcsDriver
// =============================================================================

/// One check-in request.
///
/// `workfile` is the absolute working-file path; the master lives in the
/// `RCS` subdirectory next to it, which the engine has already created.
#[derive(Debug)]
pub struct Checkin<'a> {
    pub workfile: &'a Path,
    pub rev: &'a RevId,
    /// Date for `ci -d`, already formatted.
    pub date: &'a str,
    pub comment: &'a str,
    /// RCS state marker, e.g. `Deleted`.
    pub state: Option<&'a str>,
    /// Initial description for a new master; `None` on existing masters.
    pub description: Option<&'a str>,
}

/// The operations the replay engine needs from a version-control backend.
#[async_trait]
pub trait VcsDriver: Send + Sync {
    /// Check `req.workfile` in as `req.rev`, keeping the new revision
    /// locked for the next check-in on the same line.
    async fn checkin(&self, req: Checkin<'_>) -> Result<()>;

    /// Materialize revision `rev` of `source` into the file `dest`.
    async fn checkout(&self, source: &Path, rev: &RevId, dest: &Path) -> Result<()>;

    /// Lock a specific revision of the master behind `workfile`.
    async fn lock(&self, workfile: &Path, rev: &RevId) -> Result<()>;

    /// Drop the current lock on the master behind `workfile`.
    async fn unlock(&self, workfile: &Path) -> Result<()>;

    /// Attach symbolic name `name` to the master behind `workfile`;
    /// without a revision RCS resolves the name to the default branch.
    async fn symbol(&self, workfile: &Path, name: &str, rev: Option<&RevId>) -> Result<()>;

    /// Check out a working copy next to the master, locked or unlocked.
    async fn checkout_working(&self, workfile: &Path, locked: bool) -> Result<()>;
}

// =============================================================================
// Shell Quoting
// =============================================================================

/// Quote one word for `sh -c`. Single quotes inside the word use the
/// close-quote / escaped-quote / reopen sequence.
fn sh_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word.bytes().all(|b| {
            b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b'/' | b'+' | b':' | b'@' | b',' | b'=')
        });
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn split_workfile(path: &Path) -> (PathBuf, String) {
    let dir = match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
        Some(parent) => parent.to_path_buf(),
        None => PathBuf::from("."),
    };
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    (dir, base)
}

// =============================================================================
// RcsDriver
// =============================================================================

/// Drives the `ci` / `co` / `rcs` command-line tools.
#[derive(Debug, Default)]
pub struct RcsDriver;

impl RcsDriver {
    pub fn new() -> RcsDriver {
        RcsDriver
    }

    fn checkin_command(base: &str, req: &Checkin<'_>) -> String {
        let mut cmd = format!(
            "ci -f -l -r{} -d{} -m{}",
            req.rev,
            sh_quote(req.date),
            sh_quote(req.comment)
        );
        if let Some(state) = req.state {
            cmd.push_str(&format!(" -s{}", sh_quote(state)));
        }
        if let Some(description) = req.description {
            cmd.push_str(&format!(" -t-{}", sh_quote(description)));
        }
        cmd.push(' ');
        cmd.push_str(&sh_quote(base));
        cmd
    }

    /// Run a synthesized command under `sh -c` in `dir`.
    ///
    /// Child output is forwarded at command-echo verbosity and sent to a
    /// null sink otherwise; `keep_stdout` protects commands whose stdout
    /// is the payload.
    async fn run(&self, dir: &Path, cmd: String, keep_stdout: bool) -> Result<()> {
        let mut full = cmd;
        if config::chatter(VERBOSE_COMMANDS) {
            println!("+ {}", full);
        } else if keep_stdout {
            full.push_str(" 2>/dev/null");
        } else {
            full.push_str(" >/dev/null 2>&1");
        }
        let status = Command::new("sh")
            .arg("-c")
            .arg(&full)
            .current_dir(dir)
            .status()
            .await?;
        if status.success() {
            return Ok(());
        }
        match status.code() {
            Some(code) => Err(DriverError::CommandFailed {
                command: full,
                status: code,
            }),
            None => Err(DriverError::CommandSignaled { command: full }),
        }
    }
}

#[async_trait]
impl VcsDriver for RcsDriver {
    async fn checkin(&self, req: Checkin<'_>) -> Result<()> {
        let (dir, base) = split_workfile(req.workfile);
        let cmd = Self::checkin_command(&base, &req);
        self.run(&dir, cmd, false).await
    }

    async fn checkout(&self, source: &Path, rev: &RevId, dest: &Path) -> Result<()> {
        let (dir, base) = split_workfile(source);
        let cmd = format!(
            "co -p{} {} > {}",
            rev,
            sh_quote(&base),
            sh_quote(&dest.to_string_lossy())
        );
        self.run(&dir, cmd, true).await
    }

    async fn lock(&self, workfile: &Path, rev: &RevId) -> Result<()> {
        let (dir, base) = split_workfile(workfile);
        let cmd = format!("rcs -l{} {}", rev, sh_quote(&base));
        self.run(&dir, cmd, false).await
    }

    async fn unlock(&self, workfile: &Path) -> Result<()> {
        let (dir, base) = split_workfile(workfile);
        let cmd = format!("rcs -u {}", sh_quote(&base));
        self.run(&dir, cmd, false).await
    }

    async fn symbol(&self, workfile: &Path, name: &str, rev: Option<&RevId>) -> Result<()> {
        let (dir, base) = split_workfile(workfile);
        let value = match rev {
            Some(rev) => rev.to_string(),
            None => String::new(),
        };
        let cmd = format!(
            "rcs {} {}",
            sh_quote(&format!("-n{}:{}", name, value)),
            sh_quote(&base)
        );
        self.run(&dir, cmd, false).await
    }

    async fn checkout_working(&self, workfile: &Path, locked: bool) -> Result<()> {
        let (dir, base) = split_workfile(workfile);
        let flag = if locked { "-l" } else { "-u" };
        let cmd = format!("co {} {}", flag, sh_quote(&base));
        self.run(&dir, cmd, false).await
    }
}

// =============================================================================
// Recording Fake
// =============================================================================
