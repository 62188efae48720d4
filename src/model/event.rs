//! Stream event types.
//!
//! The event list is a tagged union over blobs, commits, resets, tags and
//! passthrough lines, in stream order. Cross-references between events are
//! by mark, never by pointer, so the list stays a flat append-only vector.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A stream-assigned `:N` token naming a blob or commit.
pub type Mark = u32;

// =============================================================================
// Attribution
// =============================================================================

/// A point in time as the stream expressed it.
///
/// The timezone string is preserved verbatim for round-tripping; it is
/// never used for arithmetic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct When {
    /// Seconds since the Unix epoch.
    pub seconds: i64,
    /// The timezone token exactly as it appeared in the stream.
    pub tz: String,
}

impl When {
    /// Parse a date in either `<unix-seconds> <±HHMM>` or RFC-822 form.
    pub fn parse(s: &str) -> Option<When> {
        let s = s.trim();
        let mut tokens = s.split_whitespace();
        if let (Some(secs), Some(tz), None) = (tokens.next(), tokens.next(), tokens.next()) {
            if let Ok(seconds) = secs.parse::<i64>() {
                if tz.len() == 5
                    && (tz.starts_with('+') || tz.starts_with('-'))
                    && tz[1..].chars().all(|c| c.is_ascii_digit())
                {
                    return Some(When {
                        seconds,
                        tz: tz.to_string(),
                    });
                }
            }
        }
        let parsed = chrono::DateTime::parse_from_rfc2822(s).ok()?;
        let tz = s.rsplit(' ').next().unwrap_or("+0000").to_string();
        Some(When {
            seconds: parsed.timestamp(),
            tz,
        })
    }

    /// The date form handed to `ci -d`, in UTC.
    pub fn checkin_date(&self) -> String {
        match chrono::DateTime::from_timestamp(self.seconds, 0) {
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S+0000").to_string(),
            None => String::from("1970-01-01 00:00:00+0000"),
        }
    }
}

impl fmt::Display for When {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seconds, self.tz)
    }
}

/// Who did something, and when: (name, email, date).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub name: String,
    pub email: String,
    pub when: When,
}

impl Attribution {
    /// Parse the `Name <email> date` form used by author, committer and
    /// tagger lines.
    pub fn parse(s: &str) -> Option<Attribution> {
        let open = s.find('<')?;
        let close = s[open..].find('>')? + open;
        let name = s[..open].trim().to_string();
        let email = s[open + 1..close].to_string();
        let when = When::parse(&s[close + 1..])?;
        Some(Attribution { name, email, when })
    }
}

impl fmt::Display for Attribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

// =============================================================================
// File Operations
// =============================================================================

/// A file mode token from a modify-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// `100644`.
    Normal,
    /// `100755`.
    Executable,
    /// `120000`; parsed so it can be refused with a clear diagnostic.
    Symlink,
    /// `160000`; parsed so it can be refused with a clear diagnostic.
    Gitlink,
}

impl FileMode {
    pub fn from_token(token: &str) -> Option<FileMode> {
        match token {
            "100644" | "644" => Some(FileMode::Normal),
            "100755" | "755" => Some(FileMode::Executable),
            "120000" => Some(FileMode::Symlink),
            "160000" => Some(FileMode::Gitlink),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            FileMode::Normal => "100644",
            FileMode::Executable => "100755",
            FileMode::Symlink => "120000",
            FileMode::Gitlink => "160000",
        }
    }

    /// RCS can only represent plain and executable files.
    pub fn is_supported(&self) -> bool {
        matches!(self, FileMode::Normal | FileMode::Executable)
    }
}

/// The content source of a modify-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobRef {
    /// A `:N` reference to a prior blob event.
    Mark(Mark),
    /// Inline data, already spilled to this scratch file.
    Inline(PathBuf),
}

/// One file operation within a commit, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOp {
    Modify {
        mode: FileMode,
        source: BlobRef,
        path: String,
    },
    Delete {
        path: String,
    },
    Rename {
        source: String,
        target: String,
    },
    Copy {
        source: String,
        target: String,
    },
    DeleteAll,
}

// =============================================================================
// Events
// =============================================================================

/// A detached binary payload, spilled to disk at parse time.
#[derive(Debug, Clone)]
pub struct Blob {
    pub mark: Mark,
    /// The spill file inside the scratch directory.
    pub file: PathBuf,
    /// The first path a modify-op associated with this blob, if any.
    pub first_path: Option<String>,
    /// Stream line of the `blob` directive.
    pub line: u64,
}

/// One commit from the stream.
#[derive(Debug, Clone)]
pub struct Commit {
    pub mark: Mark,
    pub branch: String,
    pub authors: Vec<Attribution>,
    pub committer: Attribution,
    pub comment: String,
    /// Parent marks; the first entry is the first parent, the rest are
    /// merge parents (kept for the comment envelope only).
    pub parents: Vec<Mark>,
    pub ops: Vec<FileOp>,
    /// Extension properties; `None` values are bare flags.
    pub properties: BTreeMap<String, Option<String>>,
    /// Indices of tag events attached to this commit by the resolver.
    pub tags: Vec<usize>,
    /// Indices of reset events attached to this commit by the resolver.
    pub resets: Vec<usize>,
    /// Ordered distinct child branch names, populated during replay to
    /// allocate branch numbers deterministically.
    pub child_branches: Vec<String>,
    /// True when no child commit shares this commit's branch name.
    pub branch_tip: bool,
    /// Stream line of the `commit` directive.
    pub line: u64,
}

/// A `reset` directive.
#[derive(Debug, Clone)]
pub struct Reset {
    pub ref_name: String,
    pub committish: Option<Mark>,
    pub line: u64,
}

/// An annotated tag.
#[derive(Debug, Clone)]
pub struct Tag {
    pub name: String,
    pub committish: Mark,
    pub tagger: Option<Attribution>,
    pub comment: String,
    pub line: u64,
}

/// Any unrecognized top-level line, kept verbatim.
#[derive(Debug, Clone)]
pub struct Passthrough {
    pub text: String,
    pub line: u64,
}

/// The event union. Replay dispatches by `match` on the variant.
#[derive(Debug, Clone)]
pub enum Event {
    Blob(Blob),
    Commit(Commit),
    Reset(Reset),
    Tag(Tag),
    Passthrough(Passthrough),
}

impl Event {
    /// The variant name, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Blob(_) => "blob",
            Event::Commit(_) => "commit",
            Event::Reset(_) => "reset",
            Event::Tag(_) => "tag",
            Event::Passthrough(_) => "passthrough",
        }
    }
}
