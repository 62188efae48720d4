//! Event parser.
//!
//! Consumes the stream through [`StreamReader`] and assembles the ordered
//! event list. Dispatch is keyed on the first token of each non-blank
//! line; anything unrecognized at top level becomes a passthrough event.
//! Blob and inline payloads are spilled to the scratch directory as they
//! are read, so no payload is ever held whole in memory.

use std::collections::BTreeMap;

use thiserror::Error;
use tokio::io::AsyncBufRead;

use crate::model::{
    Attribution, Blob, BlobRef, Commit, Event, FileMode, FileOp, Mark, Passthrough, Repository,
    Reset, ResolveError, Tag,
};
use crate::scratch::ScratchDir;
use crate::stream::{StreamError, StreamReader};

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while parsing the stream.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("I/O error writing spill file: {0}")]
    Spill(std::io::Error),

    #[error("line {line}: expected {expected}, found '{found}'")]
    Expected {
        line: u64,
        expected: &'static str,
        found: String,
    },

    #[error("line {line}: malformed mark '{token}'")]
    BadMark { line: u64, token: String },

    #[error("line {line}: mark :{mark} already defined")]
    DuplicateMark { line: u64, mark: Mark },

    #[error("line {line}: modify references unknown blob mark :{mark}")]
    UnknownBlob { line: u64, mark: Mark },

    #[error("line {line}: unknown file mode '{token}'")]
    BadMode { line: u64, token: String },

    #[error("line {line}: malformed file operation '{text}'")]
    BadFileOp { line: u64, text: String },

    #[error("line {line}: malformed attribution '{text}'")]
    BadAttribution { line: u64, text: String },

    #[error("line {line}: property '{name}' value does not match its declared length")]
    BadPropertyLength { line: u64, name: String },

    #[error("line {line}: commit has no mark")]
    MissingMark { line: u64 },

    #[error("line {line}: commit has no committer")]
    MissingCommitter { line: u64 },

    #[error("line {line}: commit has more than one committer")]
    DuplicateCommitter { line: u64 },
}

pub type Result<T> = std::result::Result<T, ParseError>;

// =============================================================================
// Entry Point
// =============================================================================

/// Parse a complete fast-import stream into a resolved [`Repository`].
pub async fn parse_stream<R: AsyncBufRead + Unpin>(
    input: R,
    scratch: ScratchDir,
) -> Result<Repository> {
    let parser = Parser {
        reader: StreamReader::new(input),
        repo: Repository::new(scratch),
        commit_seq: 0,
    };
    parser.run().await
}

// =============================================================================
// Parser
// =============================================================================

struct Parser<R> {
    reader: StreamReader<R>,
    repo: Repository,
    commit_seq: u64,
}

impl<R: AsyncBufRead + Unpin> Parser<R> {
    async fn run(mut self) -> Result<Repository> {
        while let Some(line) = self.reader.read_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let (keyword, rest) = split_keyword(&line);
            match keyword {
                "blob" => self.parse_blob().await?,
                "commit" => {
                    let branch = rest.to_string();
                    self.parse_commit(branch).await?;
                }
                "reset" => {
                    let ref_name = rest.to_string();
                    self.parse_reset(ref_name).await?;
                }
                "tag" => {
                    let name = rest.to_string();
                    self.parse_tag(name).await?;
                }
                _ => {
                    let at = self.reader.line();
                    self.repo
                        .push(Event::Passthrough(Passthrough { text: line, line: at }));
                }
            }
        }
        self.repo.resolve()?;
        Ok(self.repo)
    }

    async fn parse_blob(&mut self) -> Result<()> {
        let opened = self.reader.line();
        let line = self.reader.read_line().await?.ok_or(ParseError::Expected {
            line: opened,
            expected: "'mark' after 'blob'",
            found: "<eof>".to_string(),
        })?;
        let at = self.reader.line();
        let mark = match line.strip_prefix("mark ") {
            Some(token) => parse_mark(token, at)?,
            None => {
                return Err(ParseError::Expected {
                    line: at,
                    expected: "'mark' after 'blob'",
                    found: line,
                })
            }
        };
        self.ensure_new_mark(mark, at)?;

        let spill = self.repo.scratch.blob_file(mark);
        let mut file = tokio::fs::File::create(&spill)
            .await
            .map_err(ParseError::Spill)?;
        self.reader.read_data(&mut file).await?;

        let idx = self.repo.push(Event::Blob(Blob {
            mark,
            file: spill,
            first_path: None,
            line: opened,
        }));
        self.repo.marks.insert(mark, idx);
        Ok(())
    }

    async fn parse_commit(&mut self, branch: String) -> Result<()> {
        let opened = self.reader.line();
        self.commit_seq += 1;

        let mut mark: Option<Mark> = None;
        let mut authors: Vec<Attribution> = Vec::new();
        let mut committer: Option<Attribution> = None;
        let mut comment = String::new();
        let mut parents: Vec<Mark> = Vec::new();
        let mut ops: Vec<FileOp> = Vec::new();
        let mut properties: BTreeMap<String, Option<String>> = BTreeMap::new();
        let mut inline_seq = 0usize;

        while let Some(line) = self.reader.read_line().await? {
            let at = self.reader.line();
            // Some exporters emit a trailing newline after 'data'.
            if line.trim().is_empty() {
                continue;
            }
            let (keyword, rest) = split_keyword(&line);
            match keyword {
                "mark" => {
                    mark = Some(parse_mark(rest, at)?);
                }
                "author" => {
                    authors.push(parse_attribution(rest, at)?);
                }
                "committer" => {
                    if committer.is_some() {
                        return Err(ParseError::DuplicateCommitter { line: at });
                    }
                    committer = Some(parse_attribution(rest, at)?);
                }
                "property" => {
                    let (name, value) = self.parse_property(rest, at).await?;
                    properties.insert(name, value);
                }
                "data" => {
                    self.reader.unread(line);
                    comment = self.reader.read_data_string().await?;
                }
                "from" | "merge" => {
                    parents.push(parse_mark(rest, at)?);
                }
                "M" => {
                    let op = self.parse_modify(rest, at, mark, &mut inline_seq).await?;
                    ops.push(op);
                }
                "D" => {
                    ops.push(FileOp::Delete {
                        path: rest.to_string(),
                    });
                }
                "R" => {
                    let (source, target) = parse_two_paths(rest, at, &line)?;
                    ops.push(FileOp::Rename { source, target });
                }
                "C" => {
                    let (source, target) = parse_two_paths(rest, at, &line)?;
                    ops.push(FileOp::Copy { source, target });
                }
                "deleteall" | "filedeleteall" => {
                    ops.push(FileOp::DeleteAll);
                }
                _ => {
                    self.reader.unread(line);
                    break;
                }
            }
        }

        let mark = mark.ok_or(ParseError::MissingMark { line: opened })?;
        let committer = committer.ok_or(ParseError::MissingCommitter { line: opened })?;
        self.ensure_new_mark(mark, opened)?;

        let idx = self.repo.push(Event::Commit(Commit {
            mark,
            branch,
            authors,
            committer,
            comment,
            parents,
            ops,
            properties,
            tags: Vec::new(),
            resets: Vec::new(),
            child_branches: Vec::new(),
            branch_tip: true,
            line: opened,
        }));
        self.repo.marks.insert(mark, idx);
        Ok(())
    }

    /// `M <mode> <ref> <path>` where `<ref>` is a mark or `inline`.
    async fn parse_modify(
        &mut self,
        rest: &str,
        at: u64,
        mark: Option<Mark>,
        inline_seq: &mut usize,
    ) -> Result<FileOp> {
        let mut pieces = rest.splitn(3, ' ');
        let (mode_token, ref_token, path) = match (pieces.next(), pieces.next(), pieces.next()) {
            (Some(m), Some(r), Some(p)) if !p.is_empty() => (m, r, p.to_string()),
            _ => {
                return Err(ParseError::BadFileOp {
                    line: at,
                    text: format!("M {}", rest),
                })
            }
        };
        let mode = FileMode::from_token(mode_token).ok_or_else(|| ParseError::BadMode {
            line: at,
            token: mode_token.to_string(),
        })?;

        let source = if ref_token == "inline" {
            let label = match mark {
                Some(m) => format!(":{}", m),
                None => format!("c{}", self.commit_seq),
            };
            let spill = self.repo.scratch.inline_file(&label, *inline_seq);
            *inline_seq += 1;
            let mut file = tokio::fs::File::create(&spill)
                .await
                .map_err(ParseError::Spill)?;
            self.reader.read_data(&mut file).await?;
            BlobRef::Inline(spill)
        } else {
            let m = parse_mark(ref_token, at)?;
            // Gitlink refs name commits; everything else must be a prior
            // blob, whose first associated path is recorded here.
            if mode != FileMode::Gitlink {
                let idx = self.repo.marks.get(&m).copied();
                match idx.map(|i| &mut self.repo.events[i]) {
                    Some(Event::Blob(b)) => {
                        if b.first_path.is_none() {
                            b.first_path = Some(path.clone());
                        }
                    }
                    _ => return Err(ParseError::UnknownBlob { line: at, mark: m }),
                }
            }
            BlobRef::Mark(m)
        };

        Ok(FileOp::Modify { mode, source, path })
    }

    /// `property NAME`, `property NAME LEN` or `property NAME LEN VALUE…`.
    ///
    /// The value starts right after the length token and continues across
    /// newlines until LEN bytes have been read; a boundary that does not
    /// land on a line end is a length mismatch.
    async fn parse_property(&mut self, rest: &str, at: u64) -> Result<(String, Option<String>)> {
        let mut pieces = rest.splitn(2, ' ');
        let name = pieces.next().unwrap_or("").to_string();
        if name.is_empty() {
            return Err(ParseError::Expected {
                line: at,
                expected: "property name",
                found: rest.to_string(),
            });
        }
        let after = match pieces.next() {
            Some(after) => after,
            None => return Ok((name, None)),
        };
        let mut pieces = after.splitn(2, ' ');
        let len_token = pieces.next().unwrap_or("");
        let len: usize = len_token
            .parse()
            .map_err(|_| ParseError::BadPropertyLength {
                line: at,
                name: name.clone(),
            })?;
        let mut value = pieces.next().unwrap_or("").to_string();
        while value.len() < len {
            match self.reader.read_line().await? {
                None => return Err(ParseError::BadPropertyLength { line: at, name }),
                Some(cont) => {
                    value.push('\n');
                    value.push_str(&cont);
                }
            }
        }
        if value.len() != len {
            return Err(ParseError::BadPropertyLength { line: at, name });
        }
        Ok((name, Some(value)))
    }

    async fn parse_reset(&mut self, ref_name: String) -> Result<()> {
        let opened = self.reader.line();
        let mut committish = None;
        if let Some(line) = self.reader.read_line().await? {
            let at = self.reader.line();
            match line.strip_prefix("from ") {
                Some(token) => committish = Some(parse_mark(token, at)?),
                None => self.reader.unread(line),
            }
        }
        self.repo.push(Event::Reset(Reset {
            ref_name,
            committish,
            line: opened,
        }));
        Ok(())
    }

    async fn parse_tag(&mut self, name: String) -> Result<()> {
        let opened = self.reader.line();
        let line = self.reader.read_line().await?.ok_or(ParseError::Expected {
            line: opened,
            expected: "'from' after 'tag'",
            found: "<eof>".to_string(),
        })?;
        let at = self.reader.line();
        let committish = match line.strip_prefix("from ") {
            Some(token) => parse_mark(token, at)?,
            None => {
                return Err(ParseError::Expected {
                    line: at,
                    expected: "'from' after 'tag'",
                    found: line,
                })
            }
        };

        let mut tagger = None;
        if let Some(line) = self.reader.read_line().await? {
            let at = self.reader.line();
            match line.strip_prefix("tagger ") {
                Some(rest) => tagger = Some(parse_attribution(rest, at)?),
                None => self.reader.unread(line),
            }
        }
        if tagger.is_none() {
            eprintln!("rfi: warning: tag '{}' has no tagger", name);
        }

        let comment = self.reader.read_data_string().await?;
        self.repo.push(Event::Tag(Tag {
            name,
            committish,
            tagger,
            comment,
            line: opened,
        }));
        Ok(())
    }

    fn ensure_new_mark(&self, mark: Mark, line: u64) -> Result<()> {
        if self.repo.marks.contains_key(&mark) {
            return Err(ParseError::DuplicateMark { line, mark });
        }
        Ok(())
    }
}

// =============================================================================
// Line Helpers
// =============================================================================

fn split_keyword(line: &str) -> (&str, &str) {
    match line.split_once(' ') {
        Some((keyword, rest)) => (keyword, rest),
        None => (line, ""),
    }
}

fn parse_mark(token: &str, line: u64) -> Result<Mark> {
    token
        .trim()
        .strip_prefix(':')
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| ParseError::BadMark {
            line,
            token: token.to_string(),
        })
}

fn parse_attribution(text: &str, line: u64) -> Result<Attribution> {
    Attribution::parse(text).ok_or_else(|| ParseError::BadAttribution {
        line,
        text: text.to_string(),
    })
}

/// Tokenize `R`/`C` arguments with shell-quoting rules, so paths may
/// contain whitespace.
fn parse_two_paths(rest: &str, line: u64, full: &str) -> Result<(String, String)> {
    match shlex::split(rest).map(<[String; 2]>::try_from) {
        Some(Ok([source, target])) => Ok((source, target)),
        _ => Err(ParseError::BadFileOp {
            line,
            text: full.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn parse(stream: &str) -> (TempDir, Result<Repository>) {
        let root = TempDir::new().unwrap();
        let scratch = ScratchDir::create(root.path()).await.unwrap();
        let result = parse_stream(stream.as_bytes(), scratch).await;
        (root, result)
    }

    fn only_commit(repo: &Repository) -> &Commit {
        repo.events
            .iter()
            .find_map(|e| match e {
                Event::Commit(c) => Some(c),
                _ => None,
            })
            .expect("stream has a commit")
    }

    #[tokio::test]
    async fn parses_blob_and_linear_commit() {
        let (_root, repo) = parse(
            "blob\n\
             mark :1\n\
             data 2\n\
             a\n\
             commit refs/heads/master\n\
             mark :2\n\
             committer A <a@x> 1000000000 +0000\n\
             data 6\n\
             first\n\
             M 100644 :1 README\n",
        )
        .await;
        let repo = repo.unwrap();
        assert_eq!(repo.events.len(), 2);

        let blob = match &repo.events[0] {
            Event::Blob(b) => b,
            other => panic!("expected blob, got {}", other.kind()),
        };
        assert_eq!(blob.mark, 1);
        assert_eq!(blob.first_path.as_deref(), Some("README"));
        assert_eq!(std::fs::read(&blob.file).unwrap(), b"a\n");

        let commit = only_commit(&repo);
        assert_eq!(commit.mark, 2);
        assert_eq!(commit.branch, "refs/heads/master");
        assert_eq!(commit.comment, "first\n");
        assert_eq!(commit.committer.email, "a@x");
        assert_eq!(
            commit.ops,
            vec![FileOp::Modify {
                mode: FileMode::Normal,
                source: BlobRef::Mark(1),
                path: "README".to_string(),
            }]
        );
        assert!(repo.branches.contains("refs/heads/master"));
    }

    #[tokio::test]
    async fn inline_modify_spills_to_scratch() {
        let (_root, repo) = parse(
            "commit refs/heads/master\n\
             mark :1\n\
             committer A <a@x> 1 +0000\n\
             data 1\n\
             x\n\
             M 100644 inline notes.txt\n\
             data 5\n\
             hello\n",
        )
        .await;
        let repo = repo.unwrap();
        let commit = only_commit(&repo);
        match &commit.ops[0] {
            FileOp::Modify {
                source: BlobRef::Inline(path),
                ..
            } => {
                assert_eq!(std::fs::read(path).unwrap(), b"hello");
                assert!(path.to_string_lossy().contains("inline-:1-0"));
            }
            other => panic!("expected inline modify, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn commit_accepts_authors_parents_and_ops_in_any_order() {
        let (_root, repo) = parse(
            "blob\n\
             mark :1\n\
             data 0\n\
             blob\n\
             mark :2\n\
             data 0\n\
             commit refs/heads/master\n\
             mark :3\n\
             committer C <c@x> 5 +0000\n\
             data 0\n\
             commit refs/heads/master\n\
             mark :4\n\
             author A <a@x> 1 +0000\n\
             author B <b@x> 2 +0000\n\
             committer C <c@x> 5 +0000\n\
             from :3\n\
             merge :3\n\
             data 3\n\
             hi\n\
             M 100644 :1 one\n\
             D gone\n\
             R \"old name\" \"new name\"\n\
             C src dst\n\
             deleteall\n\
             filedeleteall\n",
        )
        .await;
        let repo = repo.unwrap();
        let commit = repo.commit_by_mark(4).unwrap();
        assert_eq!(commit.authors.len(), 2);
        assert_eq!(commit.parents, vec![3, 3]);
        assert_eq!(commit.ops.len(), 6);
        assert_eq!(
            commit.ops[2],
            FileOp::Rename {
                source: "old name".to_string(),
                target: "new name".to_string(),
            }
        );
        assert_eq!(commit.ops[4], FileOp::DeleteAll);
        assert_eq!(commit.ops[5], FileOp::DeleteAll);
    }

    #[tokio::test]
    async fn unrecognized_line_ends_commit_and_becomes_passthrough() {
        let (_root, repo) = parse(
            "commit refs/heads/master\n\
             mark :1\n\
             committer A <a@x> 1 +0000\n\
             data 2\n\
             m\n\
             progress halfway there\n",
        )
        .await;
        let repo = repo.unwrap();
        assert_eq!(repo.events.len(), 2);
        match &repo.events[1] {
            Event::Passthrough(p) => assert_eq!(p.text, "progress halfway there"),
            other => panic!("expected passthrough, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn blank_line_inside_commit_is_skipped() {
        let (_root, repo) = parse(
            "blob\n\
             mark :1\n\
             data 0\n\
             commit refs/heads/master\n\
             mark :2\n\
             committer A <a@x> 1 +0000\n\
             data 2\n\
             m\n\
             \n\
             M 100644 :1 file\n",
        )
        .await;
        let repo = repo.unwrap();
        assert_eq!(only_commit(&repo).ops.len(), 1);
    }

    #[tokio::test]
    async fn properties_parse_in_all_three_shapes() {
        let (_root, repo) = parse(
            "commit refs/heads/master\n\
             mark :1\n\
             committer A <a@x> 1 +0000\n\
             property legacy-id\n\
             property svn-rev 4 r123\n\
             property log 9 two\n\
             lines\n\
             data 0\n",
        )
        .await;
        let repo = repo.unwrap();
        let commit = only_commit(&repo);
        assert_eq!(commit.properties.get("legacy-id"), Some(&None));
        assert_eq!(
            commit.properties.get("svn-rev"),
            Some(&Some("r123".to_string()))
        );
        assert_eq!(
            commit.properties.get("log"),
            Some(&Some("two\nlines".to_string()))
        );
    }

    #[tokio::test]
    async fn property_length_mismatch_is_fatal() {
        let (_root, result) = parse(
            "commit refs/heads/master\n\
             mark :1\n\
             committer A <a@x> 1 +0000\n\
             property bad 2 abc\n\
             data 0\n",
        )
        .await;
        assert!(matches!(
            result,
            Err(ParseError::BadPropertyLength { .. })
        ));
    }

    #[tokio::test]
    async fn missing_committer_names_the_opening_line() {
        let (_root, result) = parse(
            "blob\n\
             mark :1\n\
             data 0\n\
             commit refs/heads/master\n\
             mark :2\n\
             data 2\n\
             m\n",
        )
        .await;
        match result {
            Err(ParseError::MissingCommitter { line }) => assert_eq!(line, 4),
            other => panic!("expected MissingCommitter, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn missing_mark_is_fatal() {
        let (_root, result) = parse(
            "commit refs/heads/master\n\
             committer A <a@x> 1 +0000\n\
             data 0\n",
        )
        .await;
        assert!(matches!(result, Err(ParseError::MissingMark { .. })));
    }

    #[tokio::test]
    async fn unknown_blob_mark_is_fatal() {
        let (_root, result) = parse(
            "commit refs/heads/master\n\
             mark :1\n\
             committer A <a@x> 1 +0000\n\
             data 0\n\
             M 100644 :9 file\n",
        )
        .await;
        assert!(matches!(
            result,
            Err(ParseError::UnknownBlob { mark: 9, .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_mark_is_fatal() {
        let (_root, result) = parse(
            "blob\n\
             mark :1\n\
             data 0\n\
             blob\n\
             mark :1\n\
             data 0\n",
        )
        .await;
        assert!(matches!(result, Err(ParseError::DuplicateMark { mark: 1, .. })));
    }

    #[tokio::test]
    async fn reset_with_and_without_committish() {
        let (_root, repo) = parse(
            "commit refs/heads/master\n\
             mark :1\n\
             committer A <a@x> 1 +0000\n\
             data 0\n\
             reset refs/heads/other\n\
             from :1\n\
             reset refs/heads/bare\n\
             checkpoint\n",
        )
        .await;
        let repo = repo.unwrap();
        let resets: Vec<&Reset> = repo
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Reset(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(resets.len(), 2);
        assert_eq!(resets[0].committish, Some(1));
        assert_eq!(resets[1].committish, None);
        // The line after the bare reset was pushed back and kept verbatim.
        assert!(repo
            .events
            .iter()
            .any(|e| matches!(e, Event::Passthrough(p) if p.text == "checkpoint")));
        // The reset with a committish was attached by the resolver.
        assert_eq!(repo.commit_by_mark(1).unwrap().resets.len(), 1);
    }

    #[tokio::test]
    async fn tag_parses_and_attaches() {
        let (_root, repo) = parse(
            "commit refs/heads/master\n\
             mark :1\n\
             committer A <a@x> 1 +0000\n\
             data 0\n\
             tag v1\n\
             from :1\n\
             tagger T <t@x> 9 +0000\n\
             data 8\n\
             release\n",
        )
        .await;
        let repo = repo.unwrap();
        let tag = repo
            .events
            .iter()
            .find_map(|e| match e {
                Event::Tag(t) => Some(t),
                _ => None,
            })
            .unwrap();
        assert_eq!(tag.name, "v1");
        assert_eq!(tag.committish, 1);
        assert_eq!(tag.tagger.as_ref().unwrap().name, "T");
        assert_eq!(tag.comment, "release\n");
        assert_eq!(repo.commit_by_mark(1).unwrap().tags.len(), 1);
    }

    #[tokio::test]
    async fn tag_without_tagger_is_tolerated() {
        let (_root, repo) = parse(
            "commit refs/heads/master\n\
             mark :1\n\
             committer A <a@x> 1 +0000\n\
             data 0\n\
             tag v2\n\
             from :1\n\
             data 4\n\
             body\n",
        )
        .await;
        let repo = repo.unwrap();
        let tag = repo
            .events
            .iter()
            .find_map(|e| match e {
                Event::Tag(t) => Some(t),
                _ => None,
            })
            .unwrap();
        assert!(tag.tagger.is_none());
    }

    #[tokio::test]
    async fn tag_with_unknown_committish_fails_resolution() {
        let (_root, result) = parse(
            "tag v1\n\
             from :7\n\
             data 0\n",
        )
        .await;
        assert!(matches!(
            result,
            Err(ParseError::Resolve(ResolveError::UnresolvedTag { mark: 7, .. }))
        ));
    }

    #[tokio::test]
    async fn bad_mode_is_fatal() {
        let (_root, result) = parse(
            "blob\n\
             mark :1\n\
             data 0\n\
             commit refs/heads/master\n\
             mark :2\n\
             committer A <a@x> 1 +0000\n\
             data 0\n\
             M 040000 :1 dir\n",
        )
        .await;
        assert!(matches!(result, Err(ParseError::BadMode { .. })));
    }
}
