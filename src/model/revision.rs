//! Revision-ID algebra for RCS dotted-number identifiers.
//!
//! A revision ID is a non-empty sequence of positive integers of even
//! length: trunk revisions have length 2 (`1.1`, `1.2`, ...) and branch
//! revisions have length 4, 6, and so on (`1.2.1.1`). The odd-length form
//! produced by [`RevId::branch_of`] names a whole branch rather than a
//! revision; RCS symbolic names accept either.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Error parsing a dotted revision string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RevIdError {
    #[error("empty revision string")]
    Empty,

    #[error("invalid revision component '{0}'")]
    BadComponent(String),

    #[error("revision components must be positive: '{0}'")]
    ZeroComponent(String),
}

/// A dotted-number revision identifier within one RCS master.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RevId(Vec<u32>);

impl RevId {
    /// The first revision of a new master: `1.1`.
    pub fn fresh() -> Self {
        RevId(vec![1, 1])
    }

    /// The next revision on the same line: increment the last component.
    pub fn successor(&self) -> Self {
        let mut parts = self.0.clone();
        if let Some(last) = parts.last_mut() {
            *last += 1;
        }
        RevId(parts)
    }

    /// The revision this one was checked in against.
    ///
    /// Decrements the last component when it is above 1; otherwise drops
    /// the trailing branch pair, yielding the branch-point revision on the
    /// parent line. Returns `None` for `1.1`, which has no parent.
    pub fn parent(&self) -> Option<Self> {
        let mut parts = self.0.clone();
        match parts.last_mut() {
            Some(last) if *last > 1 => {
                *last -= 1;
                Some(RevId(parts))
            }
            _ => {
                if parts.len() <= 2 {
                    return None;
                }
                parts.truncate(parts.len() - 2);
                Some(RevId(parts))
            }
        }
    }

    /// The first revision on the k-th child branch of this revision.
    pub fn branch_tip(&self, k: u32) -> Self {
        let mut parts = self.0.clone();
        parts.push(k);
        parts.push(1);
        RevId(parts)
    }

    /// The branch identifier this revision sits on, as RCS symbolic names
    /// use it: the ID with its final component dropped.
    pub fn branch_of(&self) -> Self {
        let mut parts = self.0.clone();
        parts.pop();
        RevId(parts)
    }

    /// Number of dotted components.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Whether this is a trunk revision (`1.1`, `1.2`, ...).
    pub fn on_trunk(&self) -> bool {
        self.0.len() == 2
    }
}

impl fmt::Display for RevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", part)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for RevId {
    type Err = RevIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(RevIdError::Empty);
        }
        let mut parts = Vec::new();
        for piece in s.split('.') {
            let n: u32 = piece
                .parse()
                .map_err(|_| RevIdError::BadComponent(s.to_string()))?;
            if n == 0 {
                return Err(RevIdError::ZeroComponent(s.to_string()));
            }
            parts.push(n);
        }
        Ok(RevId(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(s: &str) -> RevId {
        s.parse().unwrap()
    }

    #[test]
    fn fresh_is_one_one() {
        assert_eq!(RevId::fresh().to_string(), "1.1");
    }

    #[test]
    fn successor_increments_last() {
        assert_eq!(rev("1.1").successor(), rev("1.2"));
        assert_eq!(rev("1.2.1.4").successor(), rev("1.2.1.5"));
    }

    #[test]
    fn parent_decrements_or_drops_branch() {
        assert_eq!(rev("1.3").parent(), Some(rev("1.2")));
        assert_eq!(rev("1.2.1.2").parent(), Some(rev("1.2.1.1")));
        // The first revision on a branch descends from the branch point.
        assert_eq!(rev("1.2.1.1").parent(), Some(rev("1.2")));
        assert_eq!(rev("1.2.3.1.2.1").parent(), Some(rev("1.2.3.1")));
    }

    #[test]
    fn root_has_no_parent() {
        assert_eq!(rev("1.1").parent(), None);
    }

    #[test]
    fn branch_tip_appends_pair() {
        assert_eq!(rev("1.2").branch_tip(1), rev("1.2.1.1"));
        assert_eq!(rev("1.2").branch_tip(3), rev("1.2.3.1"));
        assert_eq!(rev("1.1.1.1").branch_tip(1), rev("1.1.1.1.1.1"));
    }

    #[test]
    fn branch_of_drops_last() {
        assert_eq!(rev("1.1.1.1").branch_of().to_string(), "1.1.1");
        assert_eq!(rev("1.2").branch_of().to_string(), "1");
    }

    #[test]
    fn trunk_detection() {
        assert!(rev("1.4").on_trunk());
        assert!(!rev("1.4.2.1").on_trunk());
    }

    #[test]
    fn dotted_order_within_branch() {
        assert!(rev("1.2") > rev("1.1"));
        assert!(rev("1.10") > rev("1.9"));
        assert!(rev("1.2.1.2") > rev("1.2.1.1"));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!("".parse::<RevId>(), Err(RevIdError::Empty));
        assert!(matches!(
            "1.x".parse::<RevId>(),
            Err(RevIdError::BadComponent(_))
        ));
        assert!(matches!(
            "1.0".parse::<RevId>(),
            Err(RevIdError::ZeroComponent(_))
        ));
    }
}
