//! Replay: turning the event graph into RCS check-ins.
//!
//! Commits are replayed in stream order; file-ops within a commit in
//! stream order; tag attachment strictly after a commit's check-ins. The
//! engine owns the working directory for the whole run and installs the
//! populated `RCS` trees into the destination only at the end, so an
//! aborted run leaves the destination untouched.

pub mod assign;
pub mod comment;
pub mod driver;

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{
    self, CheckoutMode, VERBOSE_BATON, VERBOSE_DELETES, VERBOSE_OPS, VERBOSE_SHUFFLE,
};
use crate::model::{BlobRef, Commit, Event, FileMode, FileOp, Mark, Repository, RevId, Tag};
use crate::scratch::WorkDir;

pub use assign::{AssignError, BranchAssigner};
pub use driver::{Checkin, DriverError, RcsDriver, VcsDriver};

/// The distinguished master capturing annotated-tag metadata.
const TAG_FILE: &str = "ANNOTATED-TAGS";

/// Staging name for copy checkouts inside the working tree.
const COPY_STAGING: &str = ".rfi-copy";

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised during replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Assign(#[from] AssignError),

    #[error("I/O error during replay: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: cannot import mode {mode} for '{path}' (RCS has no representation)")]
    UnsupportedMode {
        mode: &'static str,
        path: String,
        line: u64,
    },

    #[error("line {line}: working file for '{path}' already exists")]
    WorkfileExists { path: String, line: u64 },

    #[error("line {line}: copy target '{path}' already has a master")]
    CopyTargetExists { path: String, line: u64 },

    #[error("line {line}: copy source '{path}' has no revision on branch '{branch}'")]
    CopySourceMissing {
        path: String,
        branch: String,
        line: u64,
    },

    #[error("line {line}: modify references unknown blob mark :{mark}")]
    UnknownBlob { mark: Mark, line: u64 },

    #[error("destination already has an RCS directory at '{}'", path.display())]
    DestinationConflict { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, ReplayError>;

// =============================================================================
// Options and Stats
// =============================================================================

/// Options for one replay run.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Raw commit messages instead of the round-trip envelope.
    pub plain: bool,
    /// What to do with working files after the import.
    pub checkout: CheckoutMode,
    /// Where the final RCS tree lands.
    pub destination: PathBuf,
    /// Parent directory for the `temp-import-<pid>` workspace.
    pub workspace_root: PathBuf,
}

/// Counters reported after a successful run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayStats {
    pub commits: u64,
    pub checkins: u64,
    pub tags: u64,
}

/// Replay a resolved repository through `driver`.
pub async fn replay<D: VcsDriver>(
    repo: &mut Repository,
    driver: &D,
    opts: &ReplayOptions,
) -> Result<ReplayStats> {
    let work = WorkDir::create(&opts.workspace_root).await?;
    let mut engine = ReplayEngine {
        repo,
        driver,
        opts,
        work,
        assigner: BranchAssigner::new(),
        last_checkin: HashMap::new(),
        live: HashMap::new(),
        masters: BTreeSet::new(),
        tags_rev: None,
        stats: ReplayStats::default(),
    };
    engine.run().await?;
    Ok(engine.stats)
}

// =============================================================================
// ReplayEngine
// =============================================================================

struct ReplayEngine<'a, D: VcsDriver> {
    repo: &'a mut Repository,
    driver: &'a D,
    opts: &'a ReplayOptions,
    work: WorkDir,
    assigner: BranchAssigner,
    /// Most recently checked-in revision per path, for lock shuffling.
    last_checkin: HashMap<String, RevId>,
    /// Live paths per branch, for deleteall and the per-path state machine.
    live: HashMap<String, BTreeSet<String>>,
    /// Every path that has a master so far, in sorted order.
    masters: BTreeSet<String>,
    /// Linear revision counter for the annotated-tags master.
    tags_rev: Option<RevId>,
    stats: ReplayStats,
}

impl<D: VcsDriver> ReplayEngine<'_, D> {
    async fn run(&mut self) -> Result<()> {
        for idx in 0..self.repo.events.len() {
            let is_commit = matches!(self.repo.events[idx], Event::Commit(_));
            if is_commit {
                self.replay_commit(idx).await?;
            }
        }
        if config::chatter(VERBOSE_BATON) && !config::chatter(VERBOSE_OPS) {
            println!();
        }
        self.install().await?;
        self.post_actions().await?;
        Ok(())
    }

    async fn replay_commit(&mut self, idx: usize) -> Result<()> {
        let commit = match &self.repo.events[idx] {
            Event::Commit(c) => c.clone(),
            _ => unreachable!("replay_commit on a non-commit event"),
        };
        self.stats.commits += 1;

        if config::chatter(VERBOSE_OPS) {
            println!("commit :{} on {}", commit.mark, commit.branch);
        } else if config::chatter(VERBOSE_BATON) {
            print!(".");
            let _ = std::io::stdout().flush();
        }
        if commit.parents.len() > 1 {
            eprintln!(
                "rfi: warning: commit :{} is a merge; RCS keeps only the first parent",
                commit.mark
            );
        }

        self.precommit(&commit);
        for op in &commit.ops {
            match op {
                FileOp::Modify { mode, source, path } => {
                    self.do_modify(idx, &commit, *mode, source, path).await?;
                }
                FileOp::Delete { path } => {
                    self.do_delete(idx, &commit, path, None).await?;
                }
                FileOp::Rename { source, target } => {
                    self.do_copy(idx, &commit, source, target, "Rename").await?;
                    self.do_delete(idx, &commit, source, Some("Rename")).await?;
                }
                FileOp::Copy { source, target } => {
                    self.do_copy(idx, &commit, source, target, "Copy").await?;
                }
                FileOp::DeleteAll => {
                    self.do_deleteall(idx, &commit).await?;
                }
            }
        }
        self.postcommit(&commit).await?;
        Ok(())
    }

    /// Reserved hook.
    fn precommit(&mut self, _commit: &Commit) {}

    /// Attach the commit's annotated tags, after all its check-ins.
    async fn postcommit(&mut self, commit: &Commit) -> Result<()> {
        for &tidx in &commit.tags {
            let tag = match &self.repo.events[tidx] {
                Event::Tag(t) => t.clone(),
                _ => continue,
            };
            self.annotated_tag(commit, &tag).await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // File operations
    // -------------------------------------------------------------------------

    async fn do_modify(
        &mut self,
        idx: usize,
        commit: &Commit,
        mode: FileMode,
        source: &BlobRef,
        path: &str,
    ) -> Result<()> {
        if !mode.is_supported() {
            return Err(ReplayError::UnsupportedMode {
                mode: mode.token(),
                path: path.to_string(),
                line: commit.line,
            });
        }
        if config::chatter(VERBOSE_OPS) {
            println!("  M {} {}", mode.token(), path);
        }

        let spill = match source {
            BlobRef::Mark(mark) => {
                let blob = self.repo.marks.get(mark).and_then(|&i| match &self.repo.events[i] {
                    Event::Blob(b) => Some(b.file.clone()),
                    _ => None,
                });
                match blob {
                    Some(file) => file,
                    None => {
                        return Err(ReplayError::UnknownBlob {
                            mark: *mark,
                            line: commit.line,
                        })
                    }
                }
            }
            BlobRef::Inline(file) => file.clone(),
        };

        let workfile = self.prepare_workdir(path).await?;
        if tokio::fs::metadata(&workfile).await.is_ok() {
            return Err(ReplayError::WorkfileExists {
                path: path.to_string(),
                line: commit.line,
            });
        }
        tokio::fs::hard_link(&spill, &workfile).await?;

        let master_exists = self.masters.contains(path);
        let rev = self.assigner.assign(self.repo, idx, path, master_exists)?;
        self.checkin(commit, path, rev, None, None).await?;

        self.live
            .entry(commit.branch.clone())
            .or_default()
            .insert(path.to_string());
        Ok(())
    }

    async fn do_delete(
        &mut self,
        idx: usize,
        commit: &Commit,
        path: &str,
        legend: Option<&str>,
    ) -> Result<()> {
        if !self.masters.contains(path) {
            eprintln!(
                "rfi: warning: commit :{} deletes '{}' which has no master; ignored",
                commit.mark, path
            );
            return Ok(());
        }
        if config::chatter(VERBOSE_OPS) {
            println!("  D {}", path);
        }

        let workfile = self.prepare_workdir(path).await?;
        if tokio::fs::metadata(&workfile).await.is_ok() {
            return Err(ReplayError::WorkfileExists {
                path: path.to_string(),
                line: commit.line,
            });
        }
        tokio::fs::write(&workfile, b"").await?;

        let rev = self.assigner.assign(self.repo, idx, path, true)?;
        self.checkin(commit, path, rev, Some("Deleted"), legend).await?;

        if let Some(live) = self.live.get_mut(&commit.branch) {
            live.remove(path);
        }
        Ok(())
    }

    async fn do_copy(
        &mut self,
        idx: usize,
        commit: &Commit,
        source: &str,
        target: &str,
        legend: &str,
    ) -> Result<()> {
        if self.masters.contains(target) {
            return Err(ReplayError::CopyTargetExists {
                path: target.to_string(),
                line: commit.line,
            });
        }
        let tip = match self.assigner.tip(source, &commit.branch) {
            Some(tip) => tip.clone(),
            None => {
                return Err(ReplayError::CopySourceMissing {
                    path: source.to_string(),
                    branch: commit.branch.clone(),
                    line: commit.line,
                })
            }
        };
        if config::chatter(VERBOSE_OPS) {
            println!("  {} {} -> {}", legend, source, target);
        }

        let source_workfile = self.work.path().join(source);
        let target_workfile = self.prepare_workdir(target).await?;
        if tokio::fs::metadata(&target_workfile).await.is_ok() {
            return Err(ReplayError::WorkfileExists {
                path: target.to_string(),
                line: commit.line,
            });
        }

        // Check the source tip out under a staging name, then move it onto
        // the target working path. History does not carry over.
        let staging = target_workfile
            .parent()
            .unwrap_or(self.work.path())
            .join(COPY_STAGING);
        if config::chatter(VERBOSE_SHUFFLE) {
            println!("    co -p{} {} -> {}", tip, source, staging.display());
        }
        self.driver.checkout(&source_workfile, &tip, &staging).await?;
        if config::chatter(VERBOSE_SHUFFLE) {
            println!("    mv {} -> {}", staging.display(), target_workfile.display());
        }
        tokio::fs::rename(&staging, &target_workfile).await?;

        let rev = self.assigner.assign(self.repo, idx, target, false)?;
        self.checkin(commit, target, rev, None, Some(legend)).await?;

        self.live
            .entry(commit.branch.clone())
            .or_default()
            .insert(target.to_string());
        Ok(())
    }

    async fn do_deleteall(&mut self, idx: usize, commit: &Commit) -> Result<()> {
        let paths: Vec<String> = self
            .live
            .get(&commit.branch)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        if config::chatter(VERBOSE_OPS) {
            println!("  deleteall ({} live paths)", paths.len());
        }
        for path in paths {
            if config::chatter(VERBOSE_DELETES) {
                println!("    deleteall -> D {}", path);
            }
            self.do_delete(idx, commit, &path, None).await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Check-in and tagging
    // -------------------------------------------------------------------------

    /// Check `path` in as `rev` and drop the symbolic names that ride on
    /// every check-in.
    ///
    /// When the new revision's parent is not the most recently checked-in
    /// revision for the path, the master is re-entered on an older line:
    /// the current lock is dropped and the parent revision locked before
    /// the check-in.
    async fn checkin(
        &mut self,
        commit: &Commit,
        path: &str,
        rev: RevId,
        state: Option<&str>,
        legend: Option<&str>,
    ) -> Result<()> {
        let workfile = self.work.path().join(path);
        let initial = !self.masters.contains(path);

        if !initial {
            if let Some(parent) = rev.parent() {
                if let Some(last) = self.last_checkin.get(path) {
                    if *last != parent {
                        self.driver.unlock(&workfile).await?;
                        self.driver.lock(&workfile, &parent).await?;
                    }
                }
            }
        }

        let date = commit.committer.when.checkin_date();
        let text = comment::checkin_comment(commit, self.opts.plain);
        let description = if initial { Some(legend.unwrap_or("")) } else { None };
        self.driver
            .checkin(Checkin {
                workfile: &workfile,
                rev: &rev,
                date: &date,
                comment: &text,
                state,
                description,
            })
            .await?;
        remove_if_present(&workfile).await?;

        self.masters.insert(path.to_string());
        self.last_checkin.insert(path.to_string(), rev.clone());
        self.stats.checkins += 1;

        if commit.branch_tip {
            self.driver
                .symbol(&workfile, &commit.branch, Some(&rev.branch_of()))
                .await?;
        }
        for &ridx in &commit.resets {
            let name = match &self.repo.events[ridx] {
                Event::Reset(r) => r.ref_name.clone(),
                _ => continue,
            };
            self.driver.symbol(&workfile, &name, Some(&rev)).await?;
        }
        Ok(())
    }

    /// Serialize one annotated tag into the tags master and attach its
    /// name across all existing masters.
    async fn annotated_tag(&mut self, commit: &Commit, tag: &Tag) -> Result<()> {
        self.stats.tags += 1;
        let workfile = self.prepare_workdir(TAG_FILE).await?;

        let when = tag
            .tagger
            .as_ref()
            .map(|t| t.when.clone())
            .unwrap_or_else(|| commit.committer.when.clone());
        let tagger = tag
            .tagger
            .as_ref()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let body = tag.comment.replace('\n', " ");
        let line = format!(
            "Tag: {}; Tagger: {}; Date: {}; {}\n",
            tag.name,
            tagger,
            when,
            body.trim_end()
        );
        tokio::fs::write(&workfile, line).await?;

        let (rev, initial) = match &self.tags_rev {
            Some(prev) => (prev.successor(), false),
            None => (RevId::fresh(), true),
        };
        let date = when.checkin_date();
        let text = format!("Annotated tag {}", tag.name);
        self.driver
            .checkin(Checkin {
                workfile: &workfile,
                rev: &rev,
                date: &date,
                comment: &text,
                state: None,
                description: if initial { Some("Annotated tags") } else { None },
            })
            .await?;
        remove_if_present(&workfile).await?;

        self.masters.insert(TAG_FILE.to_string());
        self.last_checkin.insert(TAG_FILE.to_string(), rev.clone());
        self.tags_rev = Some(rev);
        self.stats.checkins += 1;

        for path in self.masters.clone() {
            let workfile = self.work.path().join(&path);
            self.driver.symbol(&workfile, &tag.name, None).await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Workspace
    // -------------------------------------------------------------------------

    /// Ensure the working directory and `RCS` subdirectory for `path`
    /// exist; returns the working-file path.
    async fn prepare_workdir(&self, path: &str) -> Result<PathBuf> {
        let workfile = self.work.path().join(path);
        let dir = workfile
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.work.path().to_path_buf());
        tokio::fs::create_dir_all(dir.join("RCS")).await?;
        Ok(workfile)
    }

    /// Move every populated `RCS` directory into the destination tree.
    async fn install(&mut self) -> Result<()> {
        let mut dirs: BTreeSet<PathBuf> = BTreeSet::new();
        for path in &self.masters {
            let rel = Path::new(path)
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .to_path_buf();
            dirs.insert(rel);
        }
        for rel in dirs {
            let src = self.work.path().join(&rel).join("RCS");
            let dest_dir = self.opts.destination.join(&rel);
            let dest_rcs = dest_dir.join("RCS");
            if tokio::fs::metadata(&dest_rcs).await.is_ok() {
                return Err(ReplayError::DestinationConflict { path: dest_rcs });
            }
            tokio::fs::create_dir_all(&dest_dir).await?;
            tokio::fs::rename(&src, &dest_rcs).await?;
        }
        Ok(())
    }

    /// Apply the requested checkout mode against the installed tree.
    async fn post_actions(&mut self) -> Result<()> {
        match self.opts.checkout {
            // Check-ins leave the masters locked; nothing to do.
            CheckoutMode::Locked => {}
            CheckoutMode::Unlocked => {
                for path in self.masters.clone() {
                    let workfile = self.opts.destination.join(&path);
                    self.driver.unlock(&workfile).await?;
                    self.driver.checkout_working(&workfile, false).await?;
                }
            }
            CheckoutMode::None => {
                for path in self.masters.clone() {
                    let workfile = self.opts.destination.join(&path);
                    self.driver.unlock(&workfile).await?;
                }
            }
        }
        Ok(())
    }
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
