use crate::error::{Error, Result};
use crate::hash::ObjectId;

/// a decoded commit object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: String,
    pub committer: String,
    /// seconds since epoch, parsed out of the `committer` line
    pub committer_time: i64,
    pub gpgsig: Option<String>,
    pub message: String,
}

/// decode a commit object body. The format is a sequence of
/// `key SP value\n` header lines (repeated `parent` lines allowed, an
/// optional multi-line `gpgsig`), a blank line, then the free-text message.
pub fn decode(body: &[u8]) -> Result<Commit> {
    let text = std::str::from_utf8(body)
        .map_err(|_| Error::PackFormat("commit body is not utf-8".into()))?;

    let mut tree = None;
    let mut parents = Vec::new();
    let mut author = None;
    let mut committer = None;
    let mut gpgsig: Option<String> = None;

    let mut lines = text.split('\n');
    let mut message_start = text.len();
    let mut consumed = 0usize;

    while let Some(line) = lines.next() {
        consumed += line.len() + 1;
        if line.is_empty() {
            message_start = consumed;
            break;
        }
        if let Some(rest) = line.strip_prefix("tree ") {
            tree = Some(ObjectId::from_hex(rest.trim())?);
        } else if let Some(rest) = line.strip_prefix("parent ") {
            parents.push(ObjectId::from_hex(rest.trim())?);
        } else if let Some(rest) = line.strip_prefix("author ") {
            author = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("committer ") {
            committer = Some(rest.to_string());
        } else if line.starts_with("gpgsig ") {
            // multi-line, continuation lines start with a single space
            let mut sig = line["gpgsig ".len()..].to_string();
            loop {
                let save = lines.clone();
                match lines.next() {
                    Some(cont) if cont.starts_with(' ') => {
                        consumed += cont.len() + 1;
                        sig.push('\n');
                        sig.push_str(cont.trim_start());
                    }
                    _ => {
                        lines = save;
                        break;
                    }
                }
            }
            gpgsig = Some(sig);
        }
        // unknown headers (mergetag, encoding, ...) are ignored
    }

    let tree = tree.ok_or_else(|| Error::PackFormat("commit missing tree header".into()))?;
    let author = author.ok_or_else(|| Error::PackFormat("commit missing author".into()))?;
    let committer =
        committer.ok_or_else(|| Error::PackFormat("commit missing committer".into()))?;
    let committer_time = parse_time(&committer)?;
    let message = text.get(message_start..).unwrap_or("").to_string();

    Ok(Commit {
        tree,
        parents,
        author,
        committer,
        committer_time,
        gpgsig,
        message,
    })
}

/// pull the unix timestamp out of an actor line: `Name <email> 1234567890 +0000`
fn parse_time(actor_line: &str) -> Result<i64> {
    let parts: Vec<&str> = actor_line.split_whitespace().collect();
    // timestamp is the second-to-last token (last is the UTC offset)
    let ts = parts
        .len()
        .checked_sub(2)
        .and_then(|i| parts.get(i))
        .ok_or_else(|| Error::PackFormat(format!("malformed actor line: {actor_line}")))?;
    ts.parse::<i64>()
        .map_err(|_| Error::PackFormat(format!("malformed timestamp in: {actor_line}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_simple_commit() {
        let body = b"tree aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n\
author A <a@example.com> 1700000000 +0000\n\
committer A <a@example.com> 1700000001 +0000\n\
\n\
initial commit\n";
        let commit = decode(body).unwrap();
        assert_eq!(commit.tree.to_hex(), "a".repeat(40));
        assert!(commit.parents.is_empty());
        assert_eq!(commit.committer_time, 1700000001);
        assert_eq!(commit.message, "initial commit\n");
    }

    #[test]
    fn decodes_merge_commit_with_two_parents() {
        let body = b"tree aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n\
parent bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\n\
parent cccccccccccccccccccccccccccccccccccccccc\n\
author A <a@example.com> 1700000000 +0000\n\
committer A <a@example.com> 1700000000 +0000\n\
\n\
merge\n";
        let commit = decode(body).unwrap();
        assert_eq!(commit.parents.len(), 2);
    }

    #[test]
    fn decodes_gpgsig_continuation_lines() {
        let body = b"tree aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n\
author A <a@example.com> 1700000000 +0000\n\
committer A <a@example.com> 1700000000 +0000\n\
gpgsig -----BEGIN PGP SIGNATURE-----\n \n iQExample\n -----END PGP SIGNATURE-----\n\
\n\
signed commit\n";
        let commit = decode(body).unwrap();
        assert!(commit.gpgsig.unwrap().contains("BEGIN PGP SIGNATURE"));
        assert_eq!(commit.message, "signed commit\n");
    }

    #[test]
    fn rejects_missing_tree() {
        let body = b"author A <a@example.com> 1700000000 +0000\n\
committer A <a@example.com> 1700000000 +0000\n\
\n\
oops\n";
        assert!(decode(body).is_err());
    }
}
