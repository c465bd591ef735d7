//! Union FS: copy-on-write composition over an ordered, immutable list of
//! layers. Layer 0 is the writable scratch; layers >= 1 are read-only
//! projections (typically a HUBFS façade, or a further overlay).

pub mod copyup;
pub mod handles;
pub mod passthrough;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use nix::errno::Errno;

use crate::pathmap::journal;
use crate::pathmap::{PathMap, Tag};
use handles::HandleTable;

pub type NixResult<T> = std::result::Result<T, Errno>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
}

#[derive(Clone, Debug)]
pub struct Attr {
    pub kind: FileKind,
    pub size: u64,
    pub mode: u32,
    pub mtime: i64,
}

#[derive(Clone, Debug)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}

/// one underlying file system participating in a union. Implementations
/// are the read-only HUBFS façade, a pass-through scratch directory, or a
/// nested union/overlay shard.
pub trait Filesystem: Send + Sync {
    fn getattr(&self, path: &str) -> NixResult<Attr>;
    fn open(&self, path: &str, write: bool) -> NixResult<u64>;
    fn release(&self, fh: u64) -> NixResult<()>;
    fn read(&self, fh: u64, offset: u64, buf: &mut [u8]) -> NixResult<usize>;
    fn write(&self, fh: u64, offset: u64, data: &[u8]) -> NixResult<usize>;
    fn readdir(&self, path: &str) -> NixResult<Vec<DirEntry>>;
    fn readlink(&self, path: &str) -> NixResult<String>;

    fn mknod(&self, path: &str, mode: u32) -> NixResult<()>;
    fn mkdir(&self, path: &str, mode: u32) -> NixResult<()>;
    fn symlink(&self, path: &str, target: &str) -> NixResult<()>;
    fn unlink(&self, path: &str) -> NixResult<()>;
    fn rmdir(&self, path: &str) -> NixResult<()>;
    fn rename(&self, from: &str, to: &str) -> NixResult<()>;
    fn link(&self, path: &str, newpath: &str) -> NixResult<()>;

    fn chmod(&self, path: &str, mode: u32) -> NixResult<()>;
    fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> NixResult<()>;
    fn utimens(&self, path: &str, atime: Option<i64>, mtime: Option<i64>) -> NixResult<()>;

    fn flush(&self, _fh: u64) -> NixResult<()> {
        Ok(())
    }
    fn fsync(&self, _fh: u64, _datasync: bool) -> NixResult<()> {
        Ok(())
    }

    fn getxattr(&self, _path: &str, _name: &str) -> NixResult<Vec<u8>> {
        Err(Errno::ENOSYS)
    }
    fn setxattr(&self, _path: &str, _name: &str, _value: &[u8]) -> NixResult<()> {
        Err(Errno::ENOSYS)
    }
    fn listxattr(&self, _path: &str) -> NixResult<Vec<String>> {
        Err(Errno::ENOSYS)
    }
    fn removexattr(&self, _path: &str, _name: &str) -> NixResult<()> {
        Err(Errno::ENOSYS)
    }
}

/// reserved journal path rejected at every mutating entry point.
pub const JOURNAL_PATH: &str = ".unionfs";

fn parent_and_name(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

fn reject_journal_path(path: &str) -> NixResult<()> {
    if path == JOURNAL_PATH || path.starts_with(&format!("{JOURNAL_PATH}/")) {
        return Err(Errno::EPERM);
    }
    Ok(())
}

pub struct UnionFs {
    layers: Vec<Arc<dyn Filesystem>>,
    pathmap: PathMap,
    /// serializes namespace-altering operations; sits above every other
    /// lock in this crate.
    nsmux: RwLock<()>,
    handles: HandleTable,
    /// where the path map's journal lives on disk; `None` keeps the map
    /// in-memory only (used by tests and other throwaway unions).
    journal_path: Option<PathBuf>,
    /// length in bytes of what's currently on disk at `journal_path`,
    /// tracked so `journal::should_compact` doesn't need to stat the file
    /// on every flush.
    journal_len: Mutex<usize>,
}

impl UnionFs {
    pub fn new(layers: Vec<Arc<dyn Filesystem>>) -> Self {
        Self::with_journal(layers, None)
    }

    /// seeds the path map by replaying `journal_path`'s existing contents
    /// (if any), and persists dirty entries back to it after every
    /// mutating call.
    pub fn with_journal(layers: Vec<Arc<dyn Filesystem>>, journal_path: Option<PathBuf>) -> Self {
        let pathmap = PathMap::new();
        let mut journal_len = 0usize;
        if let Some(path) = &journal_path {
            if let Ok(bytes) = std::fs::read(path) {
                journal_len = bytes.len();
                for txn in journal::replay_all(&bytes) {
                    pathmap.apply_committed(&txn.records, txn.replace);
                }
            }
        }
        Self {
            layers,
            pathmap,
            nsmux: RwLock::new(()),
            handles: HandleTable::new(),
            journal_path,
            journal_len: Mutex::new(journal_len),
        }
    }

    pub fn pathmap(&self) -> &PathMap {
        &self.pathmap
    }

    /// flushes dirty path-map entries to `journal_path`, compacting to a
    /// fresh `S` snapshot when the dirty set has grown past half the
    /// existing journal (see `journal::should_compact`), otherwise
    /// appending an `A` transaction. Best-effort: the mutation this guards
    /// has already completed in memory and on layer 0, so a journal write
    /// failure is logged rather than surfaced as an operation error.
    fn persist_journal(&self) {
        let Some(path) = &self.journal_path else { return };
        let dirty = self.pathmap.dirty_records();
        if dirty.is_empty() {
            return;
        }

        let mut journal_len = self.journal_len.lock().unwrap();
        let result = if journal::should_compact(*journal_len, dirty.len()) {
            let bytes = journal::write_transaction(&self.pathmap.all_records(), journal::CMD_SET);
            std::fs::write(path, &bytes).map(|()| bytes.len())
        } else {
            let bytes = journal::write_transaction(&dirty, journal::CMD_ADD);
            std::fs::OpenOptions::new().create(true).append(true).open(path).and_then(|mut f| {
                use std::io::Write;
                f.write_all(&bytes)?;
                Ok(bytes.len())
            }).map(|written| *journal_len + written)
        };

        match result {
            Ok(len) => {
                *journal_len = len;
                drop(journal_len);
                let keys: Vec<_> = dirty.iter().map(|(k, _)| *k).collect();
                self.pathmap.clear_dirty(&keys);
            }
            Err(e) => tracing::warn!(error = %e, path = %path.display(), "failed to persist path-map journal"),
        }
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// walks layers top-down, returning the first whose path map marks the
    /// path visible.
    fn resolve(&self, path: &str) -> NixResult<usize> {
        let (isopaque, tag) = self.pathmap.get(path);
        match tag {
            Tag::NotExist | Tag::Whiteout => Err(Errno::ENOENT),
            Tag::Opaque => Ok(0),
            Tag::Layer(i) => Ok(i as usize),
            Tag::Unknown => {
                // an opaque ancestor hides every layer below the scratch.
                let probe_limit = if isopaque { 1 } else { self.layers.len() };
                for (i, layer) in self.layers.iter().enumerate().take(probe_limit) {
                    if layer.getattr(path).is_ok() {
                        self.pathmap.set(path, Tag::Layer(i as u8));
                        return Ok(i);
                    }
                }
                self.pathmap.set(path, Tag::NotExist);
                Err(Errno::ENOENT)
            }
        }
    }

    pub fn getattr(&self, path: &str) -> NixResult<Attr> {
        let layer = self.resolve(path)?;
        self.layers[layer].getattr(path)
    }

    pub fn readlink(&self, path: &str) -> NixResult<String> {
        let layer = self.resolve(path)?;
        self.layers[layer].readlink(path)
    }

    pub fn open(&self, path: &str, write: bool) -> NixResult<u64> {
        let layer = if write { self.copy_up_if_needed(path)? } else { self.resolve(path)? };
        if write {
            self.persist_journal();
        }
        let inner_fh = self.layers[layer].open(path, write)?;
        Ok(self.handles.insert(path, layer, inner_fh, write))
    }

    pub fn read(&self, wrapfh: u64, offset: u64, buf: &mut [u8]) -> NixResult<usize> {
        let open = self.handles.get(wrapfh)?;
        self.layers[open.layer].read(open.inner_fh, offset, buf)
    }

    pub fn write(&self, wrapfh: u64, offset: u64, data: &[u8]) -> NixResult<usize> {
        let open = self.handles.get(wrapfh)?;
        self.layers[open.layer].write(open.inner_fh, offset, data)
    }

    pub fn flush(&self, wrapfh: u64) -> NixResult<()> {
        let open = self.handles.get(wrapfh)?;
        self.layers[open.layer].flush(open.inner_fh)
    }

    pub fn fsync(&self, wrapfh: u64, datasync: bool) -> NixResult<()> {
        let open = self.handles.get(wrapfh)?;
        self.layers[open.layer].fsync(open.inner_fh, datasync)
    }

    pub fn release(&self, wrapfh: u64) -> NixResult<()> {
        if let Some(open) = self.handles.remove(wrapfh) {
            self.layers[open.layer].release(open.inner_fh)
        } else {
            Err(Errno::EBADF)
        }
    }

    /// merges each layer's listing for `path`, shadowing lower layers with
    /// higher ones and dropping whiteouts.
    pub fn readdir(&self, path: &str) -> NixResult<Vec<DirEntry>> {
        let winner = self.resolve(path)?;
        let mut out = vec![
            DirEntry { name: ".".into(), kind: FileKind::Directory },
            DirEntry { name: "..".into(), kind: FileKind::Directory },
        ];

        let mut seen = std::collections::HashSet::new();
        for layer in &self.layers[winner..] {
            for entry in layer.readdir(path)? {
                if entry.name == "." || entry.name == ".." || seen.contains(&entry.name) {
                    continue;
                }
                let child_path = if path.is_empty() { entry.name.clone() } else { format!("{path}/{}", entry.name) };
                let (_, tag) = self.pathmap.get(&child_path);
                seen.insert(entry.name.clone());
                if tag == Tag::Whiteout {
                    continue;
                }
                out.push(entry);
            }
            let (_, dir_tag) = self.pathmap.get(path);
            if dir_tag == Tag::Opaque {
                break;
            }
        }

        out[2..].sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn ensure_layer0_ancestors(&self, path: &str) -> NixResult<()> {
        let (parent, _) = parent_and_name(path);
        if parent.is_empty() {
            return Ok(());
        }
        let mut acc = String::new();
        for component in parent.split('/') {
            if !acc.is_empty() {
                acc.push('/');
            }
            acc.push_str(component);
            if self.layers[0].getattr(&acc).is_err() {
                self.layers[0].mkdir(&acc, 0o755)?;
                self.pathmap.set(&acc, Tag::Layer(0));
            }
        }
        Ok(())
    }

    /// copies `path` onto layer 0 if it currently resolves to a read-only
    /// layer. Acquires `nsmux` itself; callers that already hold it
    /// (rename, link) must use [`Self::copy_up_locked`] instead to avoid
    /// self-deadlock.
    fn copy_up_if_needed(&self, path: &str) -> NixResult<usize> {
        let layer = self.resolve(path)?;
        if layer == 0 {
            return Ok(0);
        }
        let _guard = self.nsmux.write().unwrap();
        self.copy_up_locked(path)
    }

    /// same as [`Self::copy_up_if_needed`] but assumes `nsmux` is already
    /// held for writing by the caller.
    fn copy_up_locked(&self, path: &str) -> NixResult<usize> {
        reject_journal_path(path)?;
        let layer = self.resolve(path)?;
        if layer == 0 {
            return Ok(0);
        }
        // re-check: another thread may have copied this up while we waited.
        if let (_, Tag::Layer(0)) = self.pathmap.get(path) {
            return Ok(0);
        }

        self.ensure_layer0_ancestors(path)?;
        let attr = self.layers[layer].getattr(path)?;
        match attr.kind {
            FileKind::Directory => copyup::copy_up_directory(&*self.layers[layer], &*self.layers[0], path, attr.mode)?,
            FileKind::Symlink => copyup::copy_up_symlink(&*self.layers[layer], &*self.layers[0], path)?,
            FileKind::File => {
                copyup::copy_up_file(&*self.layers[layer], &*self.layers[0], path, attr.mode)?;
                self.handles.rebind_to_layer0(path, &self.layers)?;
            }
        }
        self.pathmap.set(path, Tag::Layer(0));
        Ok(0)
    }

    pub fn mknod(&self, path: &str, mode: u32) -> NixResult<()> {
        reject_journal_path(path)?;
        let _guard = self.nsmux.write().unwrap();
        self.ensure_layer0_ancestors(path)?;
        self.layers[0].mknod(path, mode)?;
        self.pathmap.set(path, Tag::Layer(0));
        self.persist_journal();
        Ok(())
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> NixResult<()> {
        reject_journal_path(path)?;
        let _guard = self.nsmux.write().unwrap();
        self.ensure_layer0_ancestors(path)?;
        self.layers[0].mkdir(path, mode)?;
        self.pathmap.set(path, Tag::Layer(0));
        self.persist_journal();
        Ok(())
    }

    pub fn symlink(&self, path: &str, target: &str) -> NixResult<()> {
        reject_journal_path(path)?;
        let _guard = self.nsmux.write().unwrap();
        self.ensure_layer0_ancestors(path)?;
        self.layers[0].symlink(path, target)?;
        self.pathmap.set(path, Tag::Layer(0));
        self.persist_journal();
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> NixResult<()> {
        reject_journal_path(path)?;
        let _guard = self.nsmux.write().unwrap();
        let layer = self.resolve(path)?;
        if layer == 0 {
            self.layers[0].unlink(path)?;
        }
        self.pathmap.set(path, Tag::Whiteout);
        self.persist_journal();
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> NixResult<()> {
        reject_journal_path(path)?;
        let _guard = self.nsmux.write().unwrap();
        let entries = self.readdir(path)?;
        if entries.len() > 2 {
            return Err(Errno::ENOTEMPTY);
        }
        let layer = self.resolve(path)?;
        if layer == 0 {
            self.layers[0].rmdir(path)?;
        }
        self.pathmap.set(path, Tag::Whiteout);
        self.persist_journal();
        Ok(())
    }

    /// each path's layer, looked up before the subtree is moved so a
    /// rename can copy the whole subtree up first.
    fn collect_subtree(&self, root: &str) -> NixResult<Vec<String>> {
        let mut out = vec![root.to_string()];
        if self.getattr(root)?.kind == FileKind::Directory {
            for entry in self.readdir(root)? {
                if entry.name == "." || entry.name == ".." {
                    continue;
                }
                let child = format!("{root}/{}", entry.name);
                out.extend(self.collect_subtree(&child)?);
            }
        }
        Ok(out)
    }

    /// copies the whole source subtree onto layer 0 first (recording each
    /// path's prior layer via the path map), then performs the rename as a
    /// plain layer-0 syscall, so it is never actually split across layers.
    pub fn rename(&self, from: &str, to: &str) -> NixResult<()> {
        reject_journal_path(from)?;
        reject_journal_path(to)?;
        let _guard = self.nsmux.write().unwrap();

        let moved = self.collect_subtree(from)?;
        for path in &moved {
            self.copy_up_locked(path)?;
        }
        self.ensure_layer0_ancestors(to)?;
        self.layers[0].rename(from, to)?;

        for path in &moved {
            self.pathmap.set(path, Tag::NotExist);
        }
        self.pathmap.set(from, Tag::Whiteout);
        self.pathmap.set(to, Tag::Layer(0));
        self.persist_journal();
        Ok(())
    }

    pub fn link(&self, path: &str, newpath: &str) -> NixResult<()> {
        reject_journal_path(path)?;
        reject_journal_path(newpath)?;
        let _guard = self.nsmux.write().unwrap();

        if self.getattr(path)?.kind == FileKind::Directory {
            return Err(Errno::EPERM);
        }
        self.copy_up_locked(path)?;
        self.ensure_layer0_ancestors(newpath)?;
        self.layers[0].link(path, newpath)?;
        self.pathmap.set(newpath, Tag::Layer(0));
        self.persist_journal();
        Ok(())
    }

    pub fn chmod(&self, path: &str, mode: u32) -> NixResult<()> {
        let layer = self.copy_up_if_needed(path)?;
        let result = self.layers[layer].chmod(path, mode);
        self.persist_journal();
        result
    }

    pub fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> NixResult<()> {
        let layer = self.copy_up_if_needed(path)?;
        let result = self.layers[layer].chown(path, uid, gid);
        self.persist_journal();
        result
    }

    pub fn utimens(&self, path: &str, atime: Option<i64>, mtime: Option<i64>) -> NixResult<()> {
        let layer = self.copy_up_if_needed(path)?;
        let result = self.layers[layer].utimens(path, atime, mtime);
        self.persist_journal();
        result
    }

    pub fn mkdir_opaque(&self, path: &str, mode: u32) -> NixResult<()> {
        self.mkdir(path, mode)?;
        self.pathmap.set(path, Tag::Opaque);
        self.persist_journal();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    enum Node {
        Dir(Vec<String>),
        File(Vec<u8>),
        Symlink(String),
    }

    /// minimal in-memory `Filesystem` test double; `open` hands back an
    /// index into `handles`, `read`/`write` operate directly on the node's
    /// byte vector.
    struct MemFs {
        nodes: Mutex<HashMap<String, Node>>,
        handles: Mutex<Vec<String>>,
    }

    impl MemFs {
        fn new() -> Self {
            let mut nodes = HashMap::new();
            nodes.insert(String::new(), Node::Dir(Vec::new()));
            Self { nodes: Mutex::new(nodes), handles: Mutex::new(Vec::new()) }
        }

        fn with_file(self, path: &str, contents: &[u8]) -> Self {
            self.nodes.lock().unwrap().insert(path.to_string(), Node::File(contents.to_vec()));
            self.link_into_parent(path);
            self
        }

        fn with_dir(self, path: &str) -> Self {
            self.nodes.lock().unwrap().insert(path.to_string(), Node::Dir(Vec::new()));
            self.link_into_parent(path);
            self
        }

        fn link_into_parent(&self, path: &str) {
            let (parent, name) = parent_and_name(path);
            let mut guard = self.nodes.lock().unwrap();
            if let Some(Node::Dir(children)) = guard.get_mut(parent) {
                children.push(name.to_string());
            }
        }
    }

    impl Filesystem for MemFs {
        fn getattr(&self, path: &str) -> NixResult<Attr> {
            let guard = self.nodes.lock().unwrap();
            match guard.get(path) {
                Some(Node::Dir(_)) => Ok(Attr { kind: FileKind::Directory, size: 0, mode: 0o755, mtime: 0 }),
                Some(Node::File(b)) => Ok(Attr { kind: FileKind::File, size: b.len() as u64, mode: 0o644, mtime: 0 }),
                Some(Node::Symlink(t)) => Ok(Attr { kind: FileKind::Symlink, size: t.len() as u64, mode: 0o777, mtime: 0 }),
                None => Err(Errno::ENOENT),
            }
        }

        fn open(&self, path: &str, _write: bool) -> NixResult<u64> {
            self.getattr(path)?;
            let mut handles = self.handles.lock().unwrap();
            handles.push(path.to_string());
            Ok((handles.len() - 1) as u64)
        }

        fn release(&self, _fh: u64) -> NixResult<()> {
            Ok(())
        }

        fn read(&self, fh: u64, offset: u64, buf: &mut [u8]) -> NixResult<usize> {
            let path = self.handles.lock().unwrap()[fh as usize].clone();
            let guard = self.nodes.lock().unwrap();
            match guard.get(&path) {
                Some(Node::File(b)) => {
                    let start = (offset as usize).min(b.len());
                    let n = (b.len() - start).min(buf.len());
                    buf[..n].copy_from_slice(&b[start..start + n]);
                    Ok(n)
                }
                _ => Err(Errno::EISDIR),
            }
        }

        fn write(&self, fh: u64, offset: u64, data: &[u8]) -> NixResult<usize> {
            let path = self.handles.lock().unwrap()[fh as usize].clone();
            let mut guard = self.nodes.lock().unwrap();
            match guard.get_mut(&path) {
                Some(Node::File(b)) => {
                    let end = offset as usize + data.len();
                    if b.len() < end {
                        b.resize(end, 0);
                    }
                    b[offset as usize..end].copy_from_slice(data);
                    Ok(data.len())
                }
                _ => Err(Errno::EISDIR),
            }
        }

        fn readdir(&self, path: &str) -> NixResult<Vec<DirEntry>> {
            let guard = self.nodes.lock().unwrap();
            match guard.get(path) {
                Some(Node::Dir(children)) => Ok(children
                    .iter()
                    .map(|name| {
                        let full = if path.is_empty() { name.clone() } else { format!("{path}/{name}") };
                        let kind = match guard.get(&full) {
                            Some(Node::Dir(_)) => FileKind::Directory,
                            Some(Node::Symlink(_)) => FileKind::Symlink,
                            _ => FileKind::File,
                        };
                        DirEntry { name: name.clone(), kind }
                    })
                    .collect()),
                Some(_) => Err(Errno::ENOTDIR),
                None => Err(Errno::ENOENT),
            }
        }

        fn readlink(&self, path: &str) -> NixResult<String> {
            match self.nodes.lock().unwrap().get(path) {
                Some(Node::Symlink(t)) => Ok(t.clone()),
                _ => Err(Errno::EINVAL),
            }
        }

        fn mknod(&self, path: &str, _mode: u32) -> NixResult<()> {
            self.nodes.lock().unwrap().insert(path.to_string(), Node::File(Vec::new()));
            self.link_into_parent(path);
            Ok(())
        }

        fn mkdir(&self, path: &str, _mode: u32) -> NixResult<()> {
            self.nodes.lock().unwrap().insert(path.to_string(), Node::Dir(Vec::new()));
            self.link_into_parent(path);
            Ok(())
        }

        fn symlink(&self, path: &str, target: &str) -> NixResult<()> {
            self.nodes.lock().unwrap().insert(path.to_string(), Node::Symlink(target.to_string()));
            self.link_into_parent(path);
            Ok(())
        }

        fn unlink(&self, path: &str) -> NixResult<()> {
            self.nodes.lock().unwrap().remove(path);
            let (parent, name) = parent_and_name(path);
            if let Some(Node::Dir(children)) = self.nodes.lock().unwrap().get_mut(parent) {
                children.retain(|c| c != name);
            }
            Ok(())
        }

        fn rmdir(&self, path: &str) -> NixResult<()> {
            self.unlink(path)
        }

        fn rename(&self, from: &str, to: &str) -> NixResult<()> {
            let node = self.nodes.lock().unwrap().remove(from);
            if let Some(n) = node {
                self.nodes.lock().unwrap().insert(to.to_string(), n);
            }
            let (fp, fname) = parent_and_name(from);
            if let Some(Node::Dir(children)) = self.nodes.lock().unwrap().get_mut(fp) {
                children.retain(|c| c != fname);
            }
            self.link_into_parent(to);
            Ok(())
        }

        fn link(&self, path: &str, newpath: &str) -> NixResult<()> {
            let contents = match self.nodes.lock().unwrap().get(path) {
                Some(Node::File(b)) => b.clone(),
                _ => return Err(Errno::EPERM),
            };
            self.nodes.lock().unwrap().insert(newpath.to_string(), Node::File(contents));
            self.link_into_parent(newpath);
            Ok(())
        }

        fn chmod(&self, _path: &str, _mode: u32) -> NixResult<()> {
            Ok(())
        }
        fn chown(&self, _path: &str, _uid: Option<u32>, _gid: Option<u32>) -> NixResult<()> {
            Ok(())
        }
        fn utimens(&self, _path: &str, _atime: Option<i64>, _mtime: Option<i64>) -> NixResult<()> {
            Ok(())
        }
    }

    fn two_layer_fs() -> UnionFs {
        let scratch = Arc::new(MemFs::new());
        let lower = Arc::new(MemFs::new().with_dir("dir").with_file("dir/a.txt", b"hello").with_file("top.txt", b"top"));
        UnionFs::new(vec![scratch, lower])
    }

    #[test]
    fn read_falls_through_to_lower_layer_and_records_winner() {
        let fs = two_layer_fs();
        let fh = fs.open("top.txt", false).unwrap();
        let mut buf = [0u8; 16];
        let n = fs.read(fh, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"top");
        assert_eq!(fs.pathmap.get("top.txt"), (false, Tag::Layer(1)));
    }

    #[test]
    fn getattr_on_missing_path_records_notexist() {
        let fs = two_layer_fs();
        assert_eq!(fs.getattr("nope.txt").unwrap_err(), Errno::ENOENT);
        assert_eq!(fs.pathmap.get("nope.txt"), (false, Tag::NotExist));
    }

    #[test]
    fn write_triggers_copy_up_to_layer_zero() {
        let fs = two_layer_fs();
        let fh = fs.open("top.txt", true).unwrap();
        fs.write(fh, 0, b"TOP").unwrap();
        fs.release(fh).unwrap();

        assert_eq!(fs.pathmap.get("top.txt"), (false, Tag::Layer(0)));
        let fh2 = fs.open("top.txt", false).unwrap();
        let mut buf = [0u8; 16];
        let n = fs.read(fh2, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"TOP");
    }

    #[test]
    fn unlink_records_whiteout_and_hides_entry() {
        let fs = two_layer_fs();
        fs.unlink("top.txt").unwrap();
        assert_eq!(fs.getattr("top.txt").unwrap_err(), Errno::ENOENT);
        let entries = fs.readdir("").unwrap();
        assert!(!entries.iter().any(|e| e.name == "top.txt"));
    }

    #[test]
    fn readdir_dedups_and_sorts_across_layers() {
        let scratch = Arc::new(MemFs::new().with_file("top.txt", b"scratch-copy"));
        let lower = Arc::new(MemFs::new().with_file("top.txt", b"lower").with_file("z.txt", b"z").with_file("a.txt", b"a"));
        let fs = UnionFs::new(vec![scratch, lower]);

        let names: Vec<String> = fs.readdir("").unwrap().into_iter().skip(2).map(|e| e.name).collect();
        assert_eq!(names, vec!["a.txt", "top.txt", "z.txt"]);
    }

    #[test]
    fn rmdir_rejects_non_empty_directory() {
        let fs = two_layer_fs();
        assert_eq!(fs.rmdir("dir").unwrap_err(), Errno::ENOTEMPTY);
    }

    #[test]
    fn mutating_the_journal_path_is_rejected() {
        let fs = two_layer_fs();
        assert_eq!(fs.mknod(JOURNAL_PATH, 0o644).unwrap_err(), Errno::EPERM);
    }

    #[test]
    fn hardlink_on_a_directory_is_rejected() {
        let fs = two_layer_fs();
        assert_eq!(fs.link("dir", "dir2").unwrap_err(), Errno::EPERM);
    }

    #[test]
    fn mutations_survive_a_journal_reload() {
        let dir = tempfile::tempdir().unwrap();
        let journal_path = dir.path().join(".unionfs-journal");

        let scratch = Arc::new(MemFs::new());
        let lower = Arc::new(MemFs::new().with_file("top.txt", b"top"));
        let fs = UnionFs::with_journal(vec![scratch, lower], Some(journal_path.clone()));
        fs.mkdir("dir", 0o755).unwrap();
        fs.unlink("top.txt").unwrap();
        assert!(journal_path.exists());

        let scratch2 = Arc::new(MemFs::new());
        let lower2 = Arc::new(MemFs::new().with_file("top.txt", b"top"));
        let reloaded = UnionFs::with_journal(vec![scratch2, lower2], Some(journal_path));
        assert_eq!(reloaded.pathmap.get("dir"), (false, Tag::Layer(0)));
        assert_eq!(reloaded.pathmap.get("top.txt"), (false, Tag::Whiteout));
        assert_eq!(reloaded.getattr("top.txt").unwrap_err(), Errno::ENOENT);
    }

    #[test]
    fn no_journal_path_means_no_disk_writes() {
        let fs = two_layer_fs();
        fs.mkdir("dir2", 0o755).unwrap();
        assert!(fs.journal_path.is_none());
    }
}
