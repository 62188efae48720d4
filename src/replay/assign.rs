//! Branch assignment: mapping (path, branch, commit) to revision IDs.
//!
//! RCS has no repository-wide branch objects; a branch exists per master
//! file as a dotted prefix. This engine keeps the per-(path, branch) tip
//! map and allocates child branch numbers on the fly, in first-use order,
//! by recording them on the ancestor commit.

use std::collections::HashMap;

use thiserror::Error;

use crate::model::{Event, Mark, Repository, RevId};

// =============================================================================
// Error Types
// =============================================================================

/// Errors from revision assignment.
#[derive(Debug, Error)]
pub enum AssignError {
    #[error(
        "line {line}: master for '{path}' exists but no ancestor of commit :{mark} owns its tip"
    )]
    AncestorNotFound { mark: Mark, path: String, line: u64 },

    #[error("line {line}: commit :{mark} references unknown parent mark :{parent}")]
    UnresolvedParent { mark: Mark, parent: Mark, line: u64 },
}

pub type Result<T> = std::result::Result<T, AssignError>;

// =============================================================================
// BranchAssigner
// =============================================================================

/// The per-(path, branch) tip map and the assignment algorithm.
#[derive(Debug, Default)]
pub struct BranchAssigner {
    tips: HashMap<(String, String), RevId>,
}

impl BranchAssigner {
    pub fn new() -> BranchAssigner {
        BranchAssigner {
            tips: HashMap::new(),
        }
    }

    /// The current tip revision for a path on a branch, if any.
    pub fn tip(&self, path: &str, branch: &str) -> Option<&RevId> {
        self.tips.get(&(path.to_string(), branch.to_string()))
    }

    /// Assign the revision ID for a check-in of `path` by the commit at
    /// `commit_idx`.
    ///
    /// A path with no master yet starts at `1.1`. Otherwise the
    /// first-parent chain is climbed to the nearest ancestor holding a tip
    /// for the path; extending the same branch yields the successor, and
    /// crossing onto a new branch allocates the next child branch number
    /// on that ancestor. The new tip is recorded before returning.
    pub fn assign(
        &mut self,
        repo: &mut Repository,
        commit_idx: usize,
        path: &str,
        master_exists: bool,
    ) -> Result<RevId> {
        let (branch, mark, line, first_parent) = {
            let commit = repo.commit(commit_idx).expect("commit index");
            (
                commit.branch.clone(),
                commit.mark,
                commit.line,
                commit.parents.first().copied(),
            )
        };

        if !master_exists {
            let rev = RevId::fresh();
            self.record(path, &branch, rev.clone());
            return Ok(rev);
        }

        // Climb first-parent pointers to the nearest ancestor with a tip.
        let mut cursor = first_parent;
        while let Some(pmark) = cursor {
            let pidx = match repo.marks.get(&pmark) {
                Some(&idx) => idx,
                None => {
                    return Err(AssignError::UnresolvedParent {
                        mark,
                        parent: pmark,
                        line,
                    })
                }
            };
            let (pbranch, pfirst) = match repo.commit(pidx) {
                Some(parent) => (parent.branch.clone(), parent.parents.first().copied()),
                None => {
                    return Err(AssignError::UnresolvedParent {
                        mark,
                        parent: pmark,
                        line,
                    })
                }
            };

            if let Some(tip) = self.tip(path, &pbranch) {
                let rev = if pbranch == branch {
                    tip.successor()
                } else {
                    let k = allocate_child_branch(repo, pidx, &branch);
                    tip.branch_tip(k)
                };
                self.record(path, &branch, rev.clone());
                return Ok(rev);
            }
            cursor = pfirst;
        }

        Err(AssignError::AncestorNotFound {
            mark,
            path: path.to_string(),
            line,
        })
    }

    fn record(&mut self, path: &str, branch: &str, rev: RevId) {
        self.tips
            .insert((path.to_string(), branch.to_string()), rev);
    }
}

/// The 1-based child branch number of `branch` at the commit `idx`,
/// appending it if this is the first fork onto that branch here.
fn allocate_child_branch(repo: &mut Repository, idx: usize, branch: &str) -> u32 {
    if let Event::Commit(ancestor) = &mut repo.events[idx] {
        if let Some(pos) = ancestor.child_branches.iter().position(|b| b == branch) {
            return pos as u32 + 1;
        }
        ancestor.child_branches.push(branch.to_string());
        ancestor.child_branches.len() as u32
    } else {
        unreachable!("child branches allocated on commits only")
    }
}
