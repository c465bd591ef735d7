//! Repository view: a single pack session, a ref table, and lazily
//! materialized trees, all guarded by the "ensure" read/write-lock pattern
//! (take read lock; if present, return; else upgrade, double-check,
//! compute, publish).

pub mod submodule;

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::hash::ObjectId;
use crate::object::{commit, tree, Tree, TreeEntry, TreeEntryMode};
use crate::pack::{Credentials, Session};
use crate::store::Store;

/// a named pointer into a repository.
#[derive(Clone, Debug)]
pub struct Ref {
    pub name: String,
    pub display_name: String,
    pub commit: ObjectId,
}

impl Ref {
    fn new(name: String, commit: ObjectId, separator: char) -> Self {
        let display_name = display_name_for(&name, separator);
        Self { name, display_name, commit }
    }
}

/// `refs/heads/x` and `refs/tags/x` both present as `x`; any remaining `/`
/// in the tail is rewritten to `separator`.
fn display_name_for(name: &str, separator: char) -> String {
    let tail = name
        .strip_prefix("refs/heads/")
        .or_else(|| name.strip_prefix("refs/tags/"))
        .unwrap_or(name);
    tail.replace('/', &separator.to_string())
}

/// a materialized tree entry augmented with lazily-resolved size/target,
/// as returned to callers of `get_tree`/`get_tree_entry`.
#[derive(Clone, Debug)]
pub struct ResolvedEntry {
    pub name: String,
    pub mode: TreeEntryMode,
    pub hash: ObjectId,
    pub size: u64,
    pub target: Option<String>,
}

struct MaterializedTree {
    entries: Vec<ResolvedEntry>,
}

pub struct RepositoryView {
    session: Session,
    separator: char,
    fullrefs: bool,
    refs: RwLock<Option<HashMap<String, Ref>>>,
    trees: RwLock<HashMap<ObjectId, MaterializedTree>>,
    commit_trees: RwLock<HashMap<ObjectId, (ObjectId, i64)>>,
    store: Box<dyn Store>,
}

impl RepositoryView {
    pub fn new(
        remote_url: &str,
        credentials: Option<Credentials>,
        store: Box<dyn Store>,
        separator: char,
        fullrefs: bool,
    ) -> Result<Self> {
        let session = Session::open(remote_url, credentials)?;
        Ok(Self {
            session,
            separator,
            fullrefs,
            refs: RwLock::new(None),
            trees: RwLock::new(HashMap::new()),
            commit_trees: RwLock::new(HashMap::new()),
            store,
        })
    }

    /// one-shot fetch of the advertised refs on first call.
    pub fn get_refs(&self) -> Result<Vec<Ref>> {
        {
            let guard = self.refs.read().unwrap();
            if let Some(map) = guard.as_ref() {
                return Ok(map.values().cloned().collect());
            }
        }

        let mut guard = self.refs.write().unwrap();
        if let Some(map) = guard.as_ref() {
            return Ok(map.values().cloned().collect());
        }

        let mut map = HashMap::new();
        for (name, hash) in self.session.advertised_refs() {
            if name == "HEAD" {
                continue;
            }
            let key = self.ref_key(name);
            map.insert(key, Ref::new(name.clone(), *hash, self.separator));
        }
        let out: Vec<Ref> = map.values().cloned().collect();
        *guard = Some(map);
        Ok(out)
    }

    fn ref_key(&self, name: &str) -> String {
        let display = if self.fullrefs { name.to_string() } else { display_name_for(name, self.separator) };
        display.to_uppercase()
    }

    /// O(1) lookup, normalized to the configured case sensitivity.
    pub fn get_ref(&self, name: &str) -> Result<Ref> {
        self.get_refs()?;
        let guard = self.refs.read().unwrap();
        let map = guard.as_ref().expect("get_refs populates the table");
        map.get(&self.ref_key(name))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("ref {name}")))
    }

    /// admits a 40-hex commit hash as a temp ref if it resolves to a commit.
    pub fn get_temp_ref(&self, hexhash: &str) -> Result<Ref> {
        if !ObjectId::looks_like_hex(hexhash) {
            return Err(Error::InvalidRef(format!("{hexhash} is not 40 hex characters")));
        }
        let hash = ObjectId::from_hex(hexhash)?;
        self.ensure_object_fetched(&[hash])?;
        let bytes = self
            .store
            .read(&hash)?
            .ok_or_else(|| Error::NotFound(format!("temp ref {hexhash}")))?;
        commit::decode(&bytes)?; // verifies it is a well-formed commit

        let r = Ref::new(hexhash.to_string(), hash, self.separator);
        let mut guard = self.refs.write().unwrap();
        let map = guard.get_or_insert_with(HashMap::new);
        map.insert(self.ref_key(hexhash), r.clone());
        Ok(r)
    }

    /// materialize the children of a ref's root tree.
    pub fn get_tree(&self, r: &Ref) -> Result<Vec<ResolvedEntry>> {
        let (tree_hash, _time) = self.ensure_commit_tree(&r.commit)?;
        self.ensure_tree_materialized(tree_hash)
    }

    /// materialize if needed and look up a single entry by name.
    pub fn get_tree_entry(&self, r: &Ref, name: &str) -> Result<Option<ResolvedEntry>> {
        let entries = self.get_tree(r)?;
        Ok(entries.into_iter().find(|e| e.name == name))
    }

    /// materialize the children of a directory entry (by its tree hash).
    pub fn get_subtree(&self, dir_hash: ObjectId) -> Result<Vec<ResolvedEntry>> {
        self.ensure_tree_materialized(dir_hash)
    }

    /// ensures the blob is present in the content store, fetching on miss.
    pub fn get_blob_reader(&self, entry: &ResolvedEntry) -> Result<Box<dyn crate::store::RandomAccessReader>> {
        self.ensure_object_fetched(&[entry.hash])?;
        self.store
            .open_reader(&entry.hash)?
            .ok_or_else(|| Error::NotFound(format!("blob {}", entry.hash)))
    }

    fn ensure_commit_tree(&self, commit_hash: &ObjectId) -> Result<(ObjectId, i64)> {
        {
            let guard = self.commit_trees.read().unwrap();
            if let Some(v) = guard.get(commit_hash) {
                return Ok(*v);
            }
        }
        self.ensure_object_fetched(&[*commit_hash])?;
        let bytes = self
            .store
            .read(commit_hash)?
            .ok_or_else(|| Error::NotFound(format!("commit {commit_hash}")))?;
        let decoded = commit::decode(&bytes)?;

        let mut guard = self.commit_trees.write().unwrap();
        let value = (decoded.tree, decoded.committer_time);
        guard.entry(*commit_hash).or_insert(value);
        Ok(value)
    }

    fn ensure_tree_materialized(&self, tree_hash: ObjectId) -> Result<Vec<ResolvedEntry>> {
        {
            let guard = self.trees.read().unwrap();
            if let Some(m) = guard.get(&tree_hash) {
                return Ok(m.entries.clone());
            }
        }

        let mut guard = self.trees.write().unwrap();
        if let Some(m) = guard.get(&tree_hash) {
            return Ok(m.entries.clone());
        }

        self.ensure_object_fetched(&[tree_hash])?;
        let bytes = self
            .store
            .read(&tree_hash)?
            .ok_or_else(|| Error::NotFound(format!("tree {tree_hash}")))?;
        let decoded = tree::decode(&bytes)?;

        let mut entries = self.size_and_expand(decoded)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let result = entries.clone();
        guard.insert(tree_hash, MaterializedTree { entries });
        Ok(result)
    }

    /// blob sizing + symlink target expansion + submodule-hash tagging.
    fn size_and_expand(&self, decoded: Tree) -> Result<Vec<ResolvedEntry>> {
        let missing: Vec<ObjectId> = decoded
            .entries
            .iter()
            .filter(|e| !matches!(e.mode, TreeEntryMode::Directory))
            .filter(|e| self.store.stat(&e.hash).ok().flatten().is_none())
            .map(|e| e.hash)
            .collect();
        if !missing.is_empty() {
            self.ensure_object_fetched(&missing)?;
        }

        let mut out = Vec::with_capacity(decoded.entries.len());
        for entry in decoded.entries {
            out.push(self.resolve_entry(entry)?);
        }
        Ok(out)
    }

    fn resolve_entry(&self, entry: TreeEntry) -> Result<ResolvedEntry> {
        match entry.mode {
            TreeEntryMode::Directory => Ok(ResolvedEntry {
                name: entry.name,
                mode: entry.mode,
                hash: entry.hash,
                size: 0,
                target: None,
            }),
            TreeEntryMode::Symlink => {
                let bytes = self
                    .store
                    .read(&entry.hash)?
                    .ok_or_else(|| Error::NotFound(format!("symlink blob {}", entry.hash)))?;
                let target = String::from_utf8_lossy(&bytes).into_owned();
                Ok(ResolvedEntry {
                    name: entry.name,
                    mode: entry.mode,
                    hash: entry.hash,
                    size: bytes.len() as u64,
                    target: Some(target),
                })
            }
            TreeEntryMode::Submodule => Ok(ResolvedEntry {
                name: entry.name,
                mode: entry.mode,
                size: entry.hash.to_hex().len() as u64,
                target: Some(entry.hash.to_hex()),
                hash: entry.hash,
            }),
            TreeEntryMode::Regular { .. } => {
                let size = self.store.stat(&entry.hash)?.unwrap_or(0);
                Ok(ResolvedEntry { name: entry.name, mode: entry.mode, hash: entry.hash, size, target: None })
            }
        }
    }

    /// batch-fetch any of `hashes` not already present in the store.
    fn ensure_object_fetched(&self, hashes: &[ObjectId]) -> Result<()> {
        let missing: Vec<ObjectId> =
            hashes.iter().filter(|h| self.store.stat(h).ok().flatten().is_none()).copied().collect();
        if missing.is_empty() {
            return Ok(());
        }

        let store = &self.store;
        let base_lookup = crate::pack::packfile::StoreBaseLookup(store.as_ref());
        self.session.fetch(&missing, &base_lookup, |obj| {
            let expected = crate::hash::ObjectId::of_loose_object(obj.kind.as_str(), &obj.data);
            if expected != obj.hash {
                return Err(Error::CorruptObject(obj.hash));
            }
            store.write(&obj.hash, &obj.data)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_strips_heads_and_tags_prefixes() {
        assert_eq!(display_name_for("refs/heads/main", '+'), "main");
        assert_eq!(display_name_for("refs/tags/v1.0", '+'), "v1.0");
        assert_eq!(display_name_for("refs/heads/feature/x", '+'), "feature+x");
    }

    #[test]
    fn display_name_passes_through_non_standard_refs() {
        assert_eq!(display_name_for("refs/pull/42", '+'), "refs+pull+42");
    }
}
