//! Check-in comment synthesis.
//!
//! In round-trip mode (the default) the commit message is wrapped in an
//! RFC-822-style header block capturing the stream metadata RCS cannot
//! natively store; plain mode passes the raw payload through.

use crate::model::Commit;

/// Build the comment for a commit's check-ins.
pub fn checkin_comment(commit: &Commit, plain: bool) -> String {
    if plain {
        return commit.comment.clone();
    }

    let mut out = String::new();
    for (i, author) in commit.authors.iter().enumerate() {
        let label = if i == 0 {
            "Author".to_string()
        } else {
            format!("Author{}", i + 1)
        };
        out.push_str(&format!("{}: {}\n", label, author));
        out.push_str(&format!("{}-Date: {}\n", label, author.when));
    }
    out.push_str(&format!("Committer: {}\n", commit.committer));
    out.push_str(&format!("Committer-Date: {}\n", commit.committer.when));

    // BTreeMap iteration keeps property keys sorted.
    let mut flags: Vec<&str> = Vec::new();
    for (name, value) in &commit.properties {
        match value {
            Some(value) => {
                out.push_str(&format!("Property-{}: {}\n", capitalize(name), value));
            }
            None => flags.push(name),
        }
    }
    if !flags.is_empty() {
        out.push_str(&format!("Empty-Properties: {}\n", flags.join(", ")));
    }

    out.push_str(&format!("Mark: :{}\n", commit.mark));
    if !commit.parents.is_empty() {
        let parents: Vec<String> = commit.parents.iter().map(|m| format!(":{}", m)).collect();
        out.push_str(&format!("Parents: {}\n", parents.join(", ")));
    }

    out.push('\n');
    out.push_str(&commit.comment);
    out
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
