//! The in-memory event graph.
//!
//! A [`Repository`] is the ordered event list plus the mark table and the
//! set of known branch names. After the stream is fully consumed,
//! [`Repository::resolve`] back-fills the cross-references the replay
//! engine needs: tag and reset attachment, and branch-tip flags. Parent
//! marks stay as marks and are chased on demand during replay, keeping the
//! pass linear in the number of events.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::model::event::{Commit, Event, Mark};
use crate::scratch::ScratchDir;

// =============================================================================
// Error Types
// =============================================================================

/// Errors from the cross-reference pass.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("line {line}: tag '{name}' references unknown mark :{mark}")]
    UnresolvedTag { name: String, mark: Mark, line: u64 },

    #[error("line {line}: tag '{name}' mark :{mark} does not name a commit")]
    TagTargetNotCommit { name: String, mark: Mark, line: u64 },

    #[error("line {line}: reset '{ref_name}' references unknown mark :{mark}")]
    UnresolvedReset {
        ref_name: String,
        mark: Mark,
        line: u64,
    },

    #[error("line {line}: reset '{ref_name}' mark :{mark} does not name a commit")]
    ResetTargetNotCommit {
        ref_name: String,
        mark: Mark,
        line: u64,
    },
}

pub type Result<T> = std::result::Result<T, ResolveError>;

// =============================================================================
// Repository
// =============================================================================

/// The parsed stream: events in order, marks, branches, and the scratch
/// directory whose spill files back the blob events.
#[derive(Debug)]
pub struct Repository {
    /// Append-only event list, in stream order.
    pub events: Vec<Event>,
    /// Mark table: stream mark to event index.
    pub marks: HashMap<Mark, usize>,
    /// Every branch name seen on a commit or reset.
    pub branches: BTreeSet<String>,
    /// Spill area for blob and inline payloads; torn down on drop.
    pub scratch: ScratchDir,
}

impl Repository {
    pub fn new(scratch: ScratchDir) -> Repository {
        Repository {
            events: Vec::new(),
            marks: HashMap::new(),
            branches: BTreeSet::new(),
            scratch,
        }
    }

    /// Append an event, returning its index.
    pub fn push(&mut self, event: Event) -> usize {
        self.events.push(event);
        self.events.len() - 1
    }

    /// The commit an event index refers to, if it is a commit.
    pub fn commit(&self, idx: usize) -> Option<&Commit> {
        match self.events.get(idx) {
            Some(Event::Commit(c)) => Some(c),
            _ => None,
        }
    }

    /// Look up a commit by mark.
    pub fn commit_by_mark(&self, mark: Mark) -> Option<&Commit> {
        self.marks.get(&mark).and_then(|&idx| self.commit(idx))
    }

    /// Back-fill cross-references after the stream is fully consumed.
    ///
    /// Links each tag and reset to its target commit, collects branch
    /// names, and computes branch-tip flags. One linear pass over the
    /// event list.
    pub fn resolve(&mut self) -> Result<()> {
        let mut tag_links: Vec<(usize, usize)> = Vec::new();
        let mut reset_links: Vec<(usize, usize)> = Vec::new();
        let mut not_tips: Vec<usize> = Vec::new();

        for (idx, event) in self.events.iter().enumerate() {
            match event {
                Event::Tag(t) => {
                    let target =
                        self.marks
                            .get(&t.committish)
                            .copied()
                            .ok_or(ResolveError::UnresolvedTag {
                                name: t.name.clone(),
                                mark: t.committish,
                                line: t.line,
                            })?;
                    if self.commit(target).is_none() {
                        return Err(ResolveError::TagTargetNotCommit {
                            name: t.name.clone(),
                            mark: t.committish,
                            line: t.line,
                        });
                    }
                    tag_links.push((target, idx));
                }
                Event::Reset(r) => {
                    self.branches.insert(r.ref_name.clone());
                    if let Some(mark) = r.committish {
                        let target = self.marks.get(&mark).copied().ok_or(
                            ResolveError::UnresolvedReset {
                                ref_name: r.ref_name.clone(),
                                mark,
                                line: r.line,
                            },
                        )?;
                        if self.commit(target).is_none() {
                            return Err(ResolveError::ResetTargetNotCommit {
                                ref_name: r.ref_name.clone(),
                                mark,
                                line: r.line,
                            });
                        }
                        reset_links.push((target, idx));
                    }
                }
                Event::Commit(c) => {
                    self.branches.insert(c.branch.clone());
                    // A parent with a same-branch child is not a branch tip.
                    for &pmark in &c.parents {
                        if let Some(&pidx) = self.marks.get(&pmark) {
                            if let Some(parent) = self.commit(pidx) {
                                if parent.branch == c.branch {
                                    not_tips.push(pidx);
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        for (target, tag_idx) in tag_links {
            if let Event::Commit(c) = &mut self.events[target] {
                c.tags.push(tag_idx);
            }
        }
        for (target, reset_idx) in reset_links {
            if let Event::Commit(c) = &mut self.events[target] {
                c.resets.push(reset_idx);
            }
        }
        for idx in not_tips {
            if let Event::Commit(c) = &mut self.events[idx] {
                c.branch_tip = false;
            }
        }
        Ok(())
    }
}
