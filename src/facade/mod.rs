//! HUBFS façade: maps the `owner/repo/ref/path…` hierarchy onto provider
//! lookups and repository-view operations. Read-only: in overlay mode this
//! is always layer 1 (or higher) under a [`crate::unionfs::UnionFs`]; all
//! mutating calls return `EROFS`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use nix::errno::Errno;

use crate::error::Error;
use crate::object::TreeEntryMode;
use crate::pack::Credentials;
use crate::provider::ProviderCache;
use crate::store::{DiskStore, RandomAccessReader};
use crate::unionfs::{Attr, DirEntry, FileKind, Filesystem, NixResult};
use crate::view::{Ref, RepositoryView, ResolvedEntry};

struct RepoEntry {
    view: RepositoryView,
    submodules: crate::view::submodule::SubmoduleMap,
    clone_url: String,
}

struct OpenBlob {
    reader: Mutex<Box<dyn RandomAccessReader>>,
    size: u64,
}

/// parsed location of a path within the `owner/repo/ref/path…` hierarchy.
enum Location {
    Root,
    Owner,
    Repository { owner: String, repo: String },
    Ref { repo: Arc<RepoEntry>, r: Ref },
    Entry { repo: Arc<RepoEntry>, r: Ref, repo_path: String, resolved: ResolvedEntry },
}

pub struct Facade {
    provider: Arc<ProviderCache>,
    cache_root: PathBuf,
    separator: char,
    fullrefs: bool,
    credentials: Option<Credentials>,
    repos: Mutex<HashMap<(String, String), Arc<RepoEntry>>>,
    handles: Mutex<HashMap<u64, OpenBlob>>,
    next_fh: AtomicU64,
}

impl Facade {
    pub fn new(provider: Arc<ProviderCache>, cache_root: PathBuf, separator: char, fullrefs: bool, credentials: Option<Credentials>) -> Self {
        Self {
            provider,
            cache_root,
            separator,
            fullrefs,
            credentials,
            repos: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(0),
        }
    }

    /// cache directory for a given repository, grounding the scratch-layer
    /// path the overlay router builds on top of.
    pub fn repo_cache_dir(&self, owner: &str, repo: &str) -> PathBuf {
        self.cache_root.join(owner).join(repo)
    }

    fn components(path: &str) -> Vec<&str> {
        path.trim_start_matches('/').split('/').filter(|s| !s.is_empty()).collect()
    }

    fn validate_owner(owner: &str) -> crate::error::Result<()> {
        if owner.contains('.') || owner.eq_ignore_ascii_case("HEAD") {
            return Err(Error::NotFound(format!("owner {owner}")));
        }
        Ok(())
    }

    fn ensure_repo(&self, owner: &str, repo: &str) -> crate::error::Result<Arc<RepoEntry>> {
        let key = (owner.to_string(), repo.to_string());
        if let Some(entry) = self.repos.lock().unwrap().get(&key) {
            return Ok(entry.clone());
        }

        Self::validate_owner(owner)?;
        let info = self.provider.get_repository(owner, repo)?;
        let store = Box::new(DiskStore::new(self.repo_cache_dir(owner, repo)));
        let view = RepositoryView::new(&info.clone_url, self.credentials.clone(), store, self.separator, self.fullrefs)?;
        let entry = Arc::new(RepoEntry { view, submodules: crate::view::submodule::SubmoduleMap::new(), clone_url: info.clone_url });

        let mut repos = self.repos.lock().unwrap();
        let entry = repos.entry(key).or_insert(entry).clone();
        Ok(entry)
    }

    fn resolve_ref(&self, repo: &Arc<RepoEntry>, name: &str) -> crate::error::Result<Ref> {
        if crate::hash::ObjectId::looks_like_hex(name) {
            if let Ok(r) = repo.view.get_temp_ref(name) {
                return Ok(r);
            }
        }
        repo.view.get_ref(name)
    }

    fn locate(&self, path: &str) -> crate::error::Result<Location> {
        let parts = Self::components(path);
        match parts.as_slice() {
            [] => Ok(Location::Root),
            [owner] => {
                Self::validate_owner(owner)?;
                Ok(Location::Owner)
            }
            [owner, repo] => {
                Self::validate_owner(owner)?;
                Ok(Location::Repository { owner: owner.to_string(), repo: repo.to_string() })
            }
            [owner, repo, refname] => {
                let repo_entry = self.ensure_repo(owner, repo)?;
                let r = self.resolve_ref(&repo_entry, refname)?;
                Ok(Location::Ref { repo: repo_entry, r })
            }
            [owner, repo, refname, tail @ ..] => {
                let repo_entry = self.ensure_repo(owner, repo)?;
                let r = self.resolve_ref(&repo_entry, refname)?;
                let repo_path = tail.join("/");

                let mut entries = repo_entry.view.get_tree(&r)?;
                let mut resolved = None;
                for (i, name) in tail.iter().enumerate() {
                    let found = entries
                        .iter()
                        .find(|e| &e.name == name)
                        .cloned()
                        .ok_or_else(|| Error::NotFound(format!("{repo_path}")))?;
                    if i + 1 == tail.len() {
                        resolved = Some(found);
                        break;
                    }
                    entries = repo_entry.view.get_subtree(found.hash)?;
                }
                let resolved = resolved.expect("tail is non-empty");
                Ok(Location::Entry { repo: repo_entry, r, repo_path, resolved })
            }
        }
    }

    /// the submodule symlink target: a file-system-relative path to the
    /// linked repository's temp-ref directory when the submodule shares a
    /// host with the parent, otherwise the raw remote URL.
    fn submodule_target(&self, repo: &RepoEntry, r: &Ref, repo_path: &str, entry: &ResolvedEntry) -> crate::error::Result<String> {
        let hash = entry.target.as_deref().unwrap_or_default();
        match repo.submodules.get_module(&repo.view, r, repo_path, &repo.clone_url) {
            Ok(relative) if !relative.contains("://") => Ok(format!("/{relative}/{hash}")),
            Ok(url) => Ok(url),
            Err(_) => Ok(hash.to_string()),
        }
    }
}

impl Filesystem for Facade {
    fn getattr(&self, path: &str) -> NixResult<Attr> {
        match self.locate(path).map_err(|e| e.to_errno())? {
            Location::Root | Location::Owner | Location::Repository { .. } | Location::Ref { .. } => {
                Ok(Attr { kind: FileKind::Directory, size: 0, mode: 0o755, mtime: 0 })
            }
            Location::Entry { repo, r, repo_path, resolved } => entry_attr(&repo, &r, &repo_path, &resolved),
        }
    }

    fn open(&self, path: &str, write: bool) -> NixResult<u64> {
        if write {
            return Err(Errno::EROFS);
        }
        let location = self.locate(path).map_err(|e| e.to_errno())?;
        let Location::Entry { repo, resolved, .. } = location else {
            return Err(Errno::EISDIR);
        };
        if !matches!(resolved.mode, TreeEntryMode::Regular { .. }) {
            return Err(Errno::EINVAL);
        }
        let reader = repo.view.get_blob_reader(&resolved).map_err(|e| e.to_errno())?;
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().unwrap().insert(fh, OpenBlob { reader: Mutex::new(reader), size: resolved.size });
        Ok(fh)
    }

    fn release(&self, fh: u64) -> NixResult<()> {
        self.handles.lock().unwrap().remove(&fh);
        Ok(())
    }

    fn read(&self, fh: u64, offset: u64, buf: &mut [u8]) -> NixResult<usize> {
        let handles = self.handles.lock().unwrap();
        let open = handles.get(&fh).ok_or(Errno::EBADF)?;
        if offset >= open.size {
            return Ok(0);
        }
        let mut reader = open.reader.lock().unwrap();
        reader.read_at(offset, buf).map_err(|e| e.to_errno())
    }

    fn write(&self, _fh: u64, _offset: u64, _data: &[u8]) -> NixResult<usize> {
        Err(Errno::EROFS)
    }

    fn readdir(&self, path: &str) -> NixResult<Vec<DirEntry>> {
        match self.locate(path).map_err(|e| e.to_errno())? {
            Location::Root => Err(Errno::ENOSYS),
            Location::Owner => {
                let owner = Self::components(path)[0];
                let repos = self.provider.list_repositories(owner).map_err(|e| e.to_errno())?;
                Ok(repos.into_iter().map(|r| DirEntry { name: r.name, kind: FileKind::Directory }).collect())
            }
            Location::Repository { owner, repo } => {
                let entry = self.ensure_repo(&owner, &repo).map_err(|e| e.to_errno())?;
                let refs = entry.view.get_refs().map_err(|e| e.to_errno())?;
                Ok(refs.into_iter().map(|r| DirEntry { name: r.display_name, kind: FileKind::Directory }).collect())
            }
            Location::Ref { repo, r } => {
                let entries = repo.view.get_tree(&r).map_err(|e| e.to_errno())?;
                Ok(entries.into_iter().map(to_dir_entry).collect())
            }
            Location::Entry { repo, resolved, .. } => {
                if !matches!(resolved.mode, TreeEntryMode::Directory) {
                    return Err(Errno::ENOTDIR);
                }
                let entries = repo.view.get_subtree(resolved.hash).map_err(|e| e.to_errno())?;
                Ok(entries.into_iter().map(to_dir_entry).collect())
            }
        }
    }

    fn readlink(&self, path: &str) -> NixResult<String> {
        let Location::Entry { repo, r, repo_path, resolved } = self.locate(path).map_err(|e| e.to_errno())? else {
            return Err(Errno::EINVAL);
        };
        match resolved.mode {
            TreeEntryMode::Symlink => Ok(resolved.target.unwrap_or_default()),
            TreeEntryMode::Submodule => self.submodule_target(&repo, &r, &repo_path, &resolved).map_err(|e| e.to_errno()),
            _ => Err(Errno::EINVAL),
        }
    }

    fn mknod(&self, _path: &str, _mode: u32) -> NixResult<()> {
        Err(Errno::EROFS)
    }
    fn mkdir(&self, _path: &str, _mode: u32) -> NixResult<()> {
        Err(Errno::EROFS)
    }
    fn symlink(&self, _path: &str, _target: &str) -> NixResult<()> {
        Err(Errno::EROFS)
    }
    fn unlink(&self, _path: &str) -> NixResult<()> {
        Err(Errno::EROFS)
    }
    fn rmdir(&self, _path: &str) -> NixResult<()> {
        Err(Errno::EROFS)
    }
    fn rename(&self, _from: &str, _to: &str) -> NixResult<()> {
        Err(Errno::EROFS)
    }
    fn link(&self, _path: &str, _newpath: &str) -> NixResult<()> {
        Err(Errno::EROFS)
    }
    fn chmod(&self, _path: &str, _mode: u32) -> NixResult<()> {
        Err(Errno::EROFS)
    }
    fn chown(&self, _path: &str, _uid: Option<u32>, _gid: Option<u32>) -> NixResult<()> {
        Err(Errno::EROFS)
    }
    fn utimens(&self, _path: &str, _atime: Option<i64>, _mtime: Option<i64>) -> NixResult<()> {
        Err(Errno::EROFS)
    }
}

fn entry_attr(repo: &RepoEntry, r: &Ref, repo_path: &str, resolved: &ResolvedEntry) -> NixResult<Attr> {
    let kind = match resolved.mode {
        TreeEntryMode::Directory => FileKind::Directory,
        TreeEntryMode::Symlink | TreeEntryMode::Submodule => FileKind::Symlink,
        TreeEntryMode::Regular { .. } => FileKind::File,
    };
    let size = if resolved.mode == TreeEntryMode::Submodule {
        match repo.submodules.get_module(&repo.view, r, repo_path, &repo.clone_url) {
            Ok(relative) if !relative.contains("://") => {
                format!("/{relative}/{}", resolved.target.as_deref().unwrap_or_default()).len() as u64
            }
            _ => resolved.size,
        }
    } else {
        resolved.size
    };
    Ok(Attr { kind, size, mode: resolved.mode.posix_mode(), mtime: 0 })
}

fn to_dir_entry(e: ResolvedEntry) -> DirEntry {
    let kind = match e.mode {
        TreeEntryMode::Directory => FileKind::Directory,
        TreeEntryMode::Symlink | TreeEntryMode::Submodule => FileKind::Symlink,
        TreeEntryMode::Regular { .. } => FileKind::File,
    };
    DirEntry { name: e.name, kind }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_with_dot_is_rejected() {
        assert!(Facade::validate_owner("a.b").is_err());
    }

    #[test]
    fn owner_named_head_is_rejected_case_insensitively() {
        assert!(Facade::validate_owner("HEAD").is_err());
        assert!(Facade::validate_owner("head").is_err());
    }

    #[test]
    fn ordinary_owner_is_accepted() {
        assert!(Facade::validate_owner("acme").is_ok());
    }

    #[test]
    fn components_splits_and_drops_empty_segments() {
        assert_eq!(Facade::components("/acme/widgets/main/src/lib.rs"), vec!["acme", "widgets", "main", "src", "lib.rs"]);
        assert_eq!(Facade::components("/acme"), vec!["acme"]);
        assert_eq!(Facade::components("/"), Vec::<&str>::new());
    }
}
