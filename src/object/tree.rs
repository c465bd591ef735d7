use crate::error::{Error, Result};
use crate::hash::ObjectId;

/// mode classification for a tree entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeEntryMode {
    Directory,
    Regular { executable: bool },
    Symlink,
    Submodule,
}

impl TreeEntryMode {
    /// parse the octal mode string git writes into a tree record.
    ///
    /// `40000` is a directory, `120000` a symlink, `160000` a submodule;
    /// everything else (`100644`, `100755`, `100664`, ...) is a regular
    /// file, executable iff the 0100 bit of the low three octal digits is set.
    fn from_mode_str(s: &str) -> Result<TreeEntryMode> {
        let mode = u32::from_str_radix(s, 8)
            .map_err(|_| Error::PackFormat(format!("invalid tree entry mode {s:?}")))?;
        Ok(match mode {
            0o40000 => TreeEntryMode::Directory,
            0o120000 => TreeEntryMode::Symlink,
            0o160000 => TreeEntryMode::Submodule,
            _ => TreeEntryMode::Regular {
                executable: mode & 0o100 != 0,
            },
        })
    }

    pub fn posix_mode(&self) -> u32 {
        match self {
            TreeEntryMode::Directory => 0o755,
            TreeEntryMode::Regular { executable: true } => 0o755,
            TreeEntryMode::Regular { executable: false } => 0o644,
            TreeEntryMode::Symlink => 0o777,
            TreeEntryMode::Submodule => 0o777,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub mode: TreeEntryMode,
    pub hash: ObjectId,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// decode a tree object body: a back-to-back sequence of
/// `mode SP name NUL hash[20]` records, in the order git wrote them
/// (byte-wise name order, which is already what we need for readdir).
pub fn decode(body: &[u8]) -> Result<Tree> {
    let mut entries = Vec::new();
    let mut cursor = 0usize;

    while cursor < body.len() {
        let sp = find(body, cursor, b' ')
            .ok_or_else(|| Error::PackFormat("tree entry missing space".into()))?;
        let mode_str = std::str::from_utf8(&body[cursor..sp])
            .map_err(|_| Error::PackFormat("tree mode is not ascii".into()))?;
        let mode = TreeEntryMode::from_mode_str(mode_str)?;

        let nul = find(body, sp + 1, 0)
            .ok_or_else(|| Error::PackFormat("tree entry missing NUL".into()))?;
        let name = std::str::from_utf8(&body[sp + 1..nul])
            .map_err(|_| Error::PackFormat("tree entry name is not utf-8".into()))?
            .to_string();

        let hash_start = nul + 1;
        let hash_end = hash_start + 20;
        if hash_end > body.len() {
            return Err(Error::PackFormat("tree entry hash truncated".into()));
        }
        let mut hash_bytes = [0u8; 20];
        hash_bytes.copy_from_slice(&body[hash_start..hash_end]);

        entries.push(TreeEntry {
            name,
            mode,
            hash: ObjectId::from_bytes(hash_bytes),
        });
        cursor = hash_end;
    }

    Ok(Tree { entries })
}

fn find(buf: &[u8], from: usize, needle: u8) -> Option<usize> {
    buf[from..].iter().position(|&b| b == needle).map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(mode: &str, name: &str, hash: u8) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(mode.as_bytes());
        out.push(b' ');
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.extend_from_slice(&[hash; 20]);
        out
    }

    #[test]
    fn decode_roundtrips_mixed_modes() {
        let mut body = Vec::new();
        body.extend(record("40000", "dir", 1));
        body.extend(record("100644", "file.txt", 2));
        body.extend(record("100755", "run.sh", 3));
        body.extend(record("120000", "link", 4));
        body.extend(record("160000", "submod", 5));

        let tree = decode(&body).unwrap();
        assert_eq!(tree.entries.len(), 5);
        assert_eq!(tree.entries[0].mode, TreeEntryMode::Directory);
        assert_eq!(
            tree.entries[1].mode,
            TreeEntryMode::Regular { executable: false }
        );
        assert_eq!(
            tree.entries[2].mode,
            TreeEntryMode::Regular { executable: true }
        );
        assert_eq!(tree.entries[3].mode, TreeEntryMode::Symlink);
        assert_eq!(tree.entries[4].mode, TreeEntryMode::Submodule);
    }

    #[test]
    fn unknown_mode_is_regular_file() {
        let body = record("100664", "weird", 9);
        let tree = decode(&body).unwrap();
        assert_eq!(
            tree.entries[0].mode,
            TreeEntryMode::Regular { executable: false }
        );
    }

    #[test]
    fn get_looks_up_by_name() {
        let mut body = Vec::new();
        body.extend(record("100644", "a.txt", 1));
        body.extend(record("100644", "b.txt", 2));
        let tree = decode(&body).unwrap();
        assert!(tree.get("b.txt").is_some());
        assert!(tree.get("missing").is_none());
    }

    #[test]
    fn posix_modes_cover_every_tree_entry_kind() {
        assert_eq!(TreeEntryMode::Directory.posix_mode(), 0o755);
        assert_eq!(
            TreeEntryMode::Regular { executable: false }.posix_mode(),
            0o644
        );
        assert_eq!(
            TreeEntryMode::Regular { executable: true }.posix_mode(),
            0o755
        );
        assert_eq!(TreeEntryMode::Symlink.posix_mode(), 0o777);
    }
}
