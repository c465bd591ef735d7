//! Overlay router: routes a path to either the top-level HUBFS façade
//! (levels 0-2 of the hierarchy) or to a per-`owner/repo/ref` union shard,
//! built on first access by a factory and released on a TTL+refcount
//! schedule.

pub mod null;
pub mod shard;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::unionfs::{Filesystem, NixResult, UnionFs};
use null::NullFs;
use shard::Shard;

/// split rule: counts slashes in `path` until
/// `3 - prefix_depth` of them have been seen, marking the boundary between
/// the owner/repo/ref prefix and whatever tail lies under it. Paths that
/// never reach that count are top-level lookups (`prefix=""`).
pub fn split(path: &str, prefix_depth: usize) -> (String, String) {
    let remaining = 3usize.saturating_sub(prefix_depth);
    if remaining == 0 {
        return (String::new(), path.to_string());
    }

    let leading_slash = path.starts_with('/');
    let body = if leading_slash { &path[1..] } else { path };

    let mut count = 0;
    for (i, b) in body.bytes().enumerate() {
        if b == b'/' {
            count += 1;
            if count == remaining {
                let prefix_body = &body[..i];
                let tail = body[i..].to_string();
                let prefix = if leading_slash { format!("/{prefix_body}") } else { prefix_body.to_string() };
                return (prefix, tail);
            }
        }
    }
    (String::new(), path.to_string())
}

/// seed data the façade hands back for a given `owner/repo/ref` prefix.
pub struct ShardSeed {
    pub scratch_dir: PathBuf,
    pub readonly: Arc<dyn Filesystem>,
}

/// decouples the router from the concrete façade type, mirroring the
/// `Transport`/`HttpGet` test-double pattern used elsewhere in this crate.
pub trait FacadeOpener: Send + Sync {
    fn open(&self, prefix: &str) -> Option<ShardSeed>;
}

struct ShardEntry {
    fs: Arc<dyn Filesystem>,
    refcount: AtomicI64,
    expires_at: Mutex<Option<Instant>>,
}

pub struct Router {
    prefix_depth: usize,
    top: Arc<dyn Filesystem>,
    opener: Box<dyn FacadeOpener>,
    ttl: Duration,
    shards: Mutex<HashMap<String, Arc<ShardEntry>>>,
}

impl Router {
    pub fn new(top: Arc<dyn Filesystem>, opener: Box<dyn FacadeOpener>, prefix_depth: usize, ttl: Duration) -> Self {
        Self { prefix_depth, top, opener, ttl, shards: Mutex::new(HashMap::new()) }
    }

    /// routes `path`, returning the file system to dispatch to and the tail
    /// path relative to that file system's root. Bumps the shard's refcount
    /// on every call; the caller must pair this with [`Self::release`].
    pub fn route(&self, path: &str) -> (Arc<dyn Filesystem>, String) {
        let (prefix, tail) = split(path, self.prefix_depth);
        if prefix.is_empty() {
            return (self.top.clone(), path.to_string());
        }
        (self.acquire(&prefix), tail)
    }

    pub fn release(&self, path: &str) {
        let (prefix, _) = split(path, self.prefix_depth);
        if prefix.is_empty() {
            return;
        }
        let shards = self.shards.lock().unwrap();
        if let Some(entry) = shards.get(&prefix) {
            if entry.refcount.fetch_sub(1, Ordering::SeqCst) == 1 {
                if self.ttl.is_zero() {
                    drop(shards);
                    self.shards.lock().unwrap().remove(&prefix);
                } else {
                    *entry.expires_at.lock().unwrap() = Some(Instant::now() + self.ttl);
                }
            }
        }
    }

    fn acquire(&self, prefix: &str) -> Arc<dyn Filesystem> {
        {
            let shards = self.shards.lock().unwrap();
            if let Some(entry) = shards.get(prefix) {
                entry.refcount.fetch_add(1, Ordering::SeqCst);
                *entry.expires_at.lock().unwrap() = None;
                return entry.fs.clone();
            }
        }

        let fs = self.build_shard(prefix);
        let entry = Arc::new(ShardEntry { fs: fs.clone(), refcount: AtomicI64::new(1), expires_at: Mutex::new(None) });

        let mut shards = self.shards.lock().unwrap();
        // another thread may have raced us to build this shard.
        if let Some(existing) = shards.get(prefix) {
            existing.refcount.fetch_add(1, Ordering::SeqCst);
            return existing.fs.clone();
        }
        shards.insert(prefix.to_string(), entry.clone());
        entry.fs.clone()
    }

    fn build_shard(&self, prefix: &str) -> Arc<dyn Filesystem> {
        match self.opener.open(prefix) {
            Some(seed) => {
                let _ = std::fs::create_dir_all(&seed.scratch_dir);
                let scratch = Arc::new(crate::unionfs::passthrough::PassThroughFs::new(seed.scratch_dir.clone()));
                let journal_path = seed.scratch_dir.join(crate::unionfs::JOURNAL_PATH);
                let union = UnionFs::with_journal(vec![scratch, seed.readonly], Some(journal_path));
                Arc::new(Shard::new(union, seed.scratch_dir))
            }
            None => Arc::new(NullFs),
        }
    }

    /// sweeps expired, refcount-zero shards; intended to run off the same
    /// 1 Hz ticker that expires provider cache entries.
    pub fn expire_tick(&self) {
        let mut shards = self.shards.lock().unwrap();
        let now = Instant::now();
        shards.retain(|_, entry| {
            if entry.refcount.load(Ordering::SeqCst) != 0 {
                return true;
            }
            match *entry.expires_at.lock().unwrap() {
                Some(at) => at > now,
                None => true,
            }
        });
    }

    pub fn shard_count(&self) -> usize {
        self.shards.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unionfs::{Attr, DirEntry, FileKind};
    use nix::errno::Errno;

    struct StaticFs;
    impl Filesystem for StaticFs {
        fn getattr(&self, _p: &str) -> NixResult<Attr> {
            Ok(Attr { kind: FileKind::Directory, size: 0, mode: 0o755, mtime: 0 })
        }
        fn open(&self, _p: &str, _w: bool) -> NixResult<u64> {
            Err(Errno::ENOENT)
        }
        fn release(&self, _fh: u64) -> NixResult<()> {
            Ok(())
        }
        fn read(&self, _fh: u64, _o: u64, _b: &mut [u8]) -> NixResult<usize> {
            Err(Errno::ENOENT)
        }
        fn write(&self, _fh: u64, _o: u64, _d: &[u8]) -> NixResult<usize> {
            Err(Errno::EROFS)
        }
        fn readdir(&self, _p: &str) -> NixResult<Vec<DirEntry>> {
            Ok(Vec::new())
        }
        fn readlink(&self, _p: &str) -> NixResult<String> {
            Err(Errno::ENOENT)
        }
        fn mknod(&self, _p: &str, _m: u32) -> NixResult<()> {
            Err(Errno::EROFS)
        }
        fn mkdir(&self, _p: &str, _m: u32) -> NixResult<()> {
            Err(Errno::EROFS)
        }
        fn symlink(&self, _p: &str, _t: &str) -> NixResult<()> {
            Err(Errno::EROFS)
        }
        fn unlink(&self, _p: &str) -> NixResult<()> {
            Err(Errno::EROFS)
        }
        fn rmdir(&self, _p: &str) -> NixResult<()> {
            Err(Errno::EROFS)
        }
        fn rename(&self, _f: &str, _t: &str) -> NixResult<()> {
            Err(Errno::EROFS)
        }
        fn link(&self, _p: &str, _n: &str) -> NixResult<()> {
            Err(Errno::EROFS)
        }
        fn chmod(&self, _p: &str, _m: u32) -> NixResult<()> {
            Err(Errno::EROFS)
        }
        fn chown(&self, _p: &str, _u: Option<u32>, _g: Option<u32>) -> NixResult<()> {
            Err(Errno::EROFS)
        }
        fn utimens(&self, _p: &str, _a: Option<i64>, _m: Option<i64>) -> NixResult<()> {
            Err(Errno::EROFS)
        }
    }

    #[test]
    fn split_separates_owner_repo_ref_from_tail() {
        let (prefix, tail) = split("/acme/widgets/main/src/lib.rs", 0);
        assert_eq!(prefix, "/acme/widgets/main");
        assert_eq!(tail, "/src/lib.rs");
    }

    #[test]
    fn split_returns_empty_prefix_below_level_three() {
        let (prefix, tail) = split("/acme/widgets", 0);
        assert_eq!(prefix, "");
        assert_eq!(tail, "/acme/widgets");
    }

    #[test]
    fn split_at_exact_boundary_yields_synthetic_slash_tail() {
        let (prefix, tail) = split("/acme/widgets/main/", 0);
        assert_eq!(prefix, "/acme/widgets/main");
        assert_eq!(tail, "/");
    }

    #[test]
    fn split_honors_prefix_depth_for_mount_at_owner_level() {
        let (prefix, tail) = split("/widgets/main/README.md", 1);
        assert_eq!(prefix, "/widgets/main");
        assert_eq!(tail, "/README.md");
    }

    struct FailingOpener;
    impl FacadeOpener for FailingOpener {
        fn open(&self, _prefix: &str) -> Option<ShardSeed> {
            None
        }
    }

    #[test]
    fn failed_factory_yields_null_filesystem() {
        let router = Router::new(Arc::new(StaticFs), Box::new(FailingOpener), 0, Duration::from_secs(60));
        let (fs, _tail) = router.route("/acme/widgets/main/x");
        assert_eq!(fs.getattr("/x").unwrap_err(), Errno::ENOENT);
        assert_eq!(fs.mkdir("/x", 0o755).unwrap_err(), Errno::EPERM);
    }

    struct WorkingOpener {
        dir: PathBuf,
    }
    impl FacadeOpener for WorkingOpener {
        fn open(&self, prefix: &str) -> Option<ShardSeed> {
            Some(ShardSeed { scratch_dir: self.dir.join(prefix.trim_start_matches('/')), readonly: Arc::new(StaticFs) })
        }
    }

    #[test]
    fn shard_is_reused_across_calls_and_refcounted() {
        let dir = tempfile::tempdir().unwrap();
        let router = Router::new(Arc::new(StaticFs), Box::new(WorkingOpener { dir: dir.path().to_path_buf() }), 0, Duration::from_secs(60));

        let (fs1, _) = router.route("/acme/widgets/main/a");
        let (fs2, _) = router.route("/acme/widgets/main/b");
        assert!(Arc::ptr_eq(&fs1, &fs2));
        assert_eq!(router.shard_count(), 1);
    }

    #[test]
    fn expire_tick_drops_shard_only_after_ttl_elapses_with_zero_refcount() {
        let dir = tempfile::tempdir().unwrap();
        let router = Router::new(Arc::new(StaticFs), Box::new(WorkingOpener { dir: dir.path().to_path_buf() }), 0, Duration::from_secs(0));

        router.route("/acme/widgets/main/a");
        router.release("/acme/widgets/main/a");
        router.expire_tick();
        assert_eq!(router.shard_count(), 0);
    }

    #[test]
    fn top_level_paths_route_to_the_facade_directly() {
        let router = Router::new(Arc::new(StaticFs), Box::new(FailingOpener), 0, Duration::from_secs(60));
        let (fs, tail) = router.route("/acme");
        assert_eq!(tail, "/acme");
        assert!(fs.getattr("/acme").is_ok());
    }
}
