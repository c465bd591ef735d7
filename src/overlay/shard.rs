//! Shard adapter: wraps a 2-layer union (scratch + read-only façade
//! projection) and, on first successful mutation, writes a zero-byte
//! `.keep` marker at the scratch root so repository expiration leaves the
//! directory alone.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::unionfs::{Attr, DirEntry, Filesystem, NixResult, UnionFs};

pub struct Shard {
    union: UnionFs,
    scratch_dir: PathBuf,
    kept: AtomicBool,
}

impl Shard {
    pub fn new(union: UnionFs, scratch_dir: PathBuf) -> Self {
        let kept = AtomicBool::new(scratch_dir_has_keep(&scratch_dir));
        Self { union, scratch_dir, kept }
    }

    fn mark_kept(&self) {
        if self.kept.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = std::fs::write(self.scratch_dir.join(".keep"), []);
    }
}

fn scratch_dir_has_keep(dir: &std::path::Path) -> bool {
    dir.join(".keep").exists()
}

impl Filesystem for Shard {
    fn getattr(&self, path: &str) -> NixResult<Attr> {
        self.union.getattr(path)
    }
    fn open(&self, path: &str, write: bool) -> NixResult<u64> {
        self.union.open(path, write)
    }
    fn release(&self, fh: u64) -> NixResult<()> {
        self.union.release(fh)
    }
    fn read(&self, fh: u64, offset: u64, buf: &mut [u8]) -> NixResult<usize> {
        self.union.read(fh, offset, buf)
    }
    fn write(&self, fh: u64, offset: u64, data: &[u8]) -> NixResult<usize> {
        let n = self.union.write(fh, offset, data)?;
        self.mark_kept();
        Ok(n)
    }
    fn readdir(&self, path: &str) -> NixResult<Vec<DirEntry>> {
        self.union.readdir(path)
    }
    fn readlink(&self, path: &str) -> NixResult<String> {
        self.union.readlink(path)
    }
    fn mknod(&self, path: &str, mode: u32) -> NixResult<()> {
        self.union.mknod(path, mode)?;
        self.mark_kept();
        Ok(())
    }
    fn mkdir(&self, path: &str, mode: u32) -> NixResult<()> {
        self.union.mkdir(path, mode)?;
        self.mark_kept();
        Ok(())
    }
    fn symlink(&self, path: &str, target: &str) -> NixResult<()> {
        self.union.symlink(path, target)?;
        self.mark_kept();
        Ok(())
    }
    fn unlink(&self, path: &str) -> NixResult<()> {
        self.union.unlink(path)?;
        self.mark_kept();
        Ok(())
    }
    fn rmdir(&self, path: &str) -> NixResult<()> {
        self.union.rmdir(path)?;
        self.mark_kept();
        Ok(())
    }
    fn rename(&self, from: &str, to: &str) -> NixResult<()> {
        self.union.rename(from, to)?;
        self.mark_kept();
        Ok(())
    }
    fn link(&self, path: &str, newpath: &str) -> NixResult<()> {
        self.union.link(path, newpath)?;
        self.mark_kept();
        Ok(())
    }
    fn chmod(&self, path: &str, mode: u32) -> NixResult<()> {
        self.union.chmod(path, mode)?;
        self.mark_kept();
        Ok(())
    }
    fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> NixResult<()> {
        self.union.chown(path, uid, gid)?;
        self.mark_kept();
        Ok(())
    }
    fn utimens(&self, path: &str, atime: Option<i64>, mtime: Option<i64>) -> NixResult<()> {
        self.union.utimens(path, atime, mtime)?;
        self.mark_kept();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unionfs::passthrough::PassThroughFs;
    use std::sync::Arc;

    fn empty_readonly() -> Arc<dyn Filesystem> {
        struct Empty;
        impl Filesystem for Empty {
            fn getattr(&self, _p: &str) -> NixResult<Attr> {
                Err(nix::errno::Errno::ENOENT)
            }
            fn open(&self, _p: &str, _w: bool) -> NixResult<u64> {
                Err(nix::errno::Errno::ENOENT)
            }
            fn release(&self, _fh: u64) -> NixResult<()> {
                Ok(())
            }
            fn read(&self, _fh: u64, _o: u64, _b: &mut [u8]) -> NixResult<usize> {
                Err(nix::errno::Errno::ENOENT)
            }
            fn write(&self, _fh: u64, _o: u64, _d: &[u8]) -> NixResult<usize> {
                Err(nix::errno::Errno::EROFS)
            }
            fn readdir(&self, _p: &str) -> NixResult<Vec<DirEntry>> {
                Ok(Vec::new())
            }
            fn readlink(&self, _p: &str) -> NixResult<String> {
                Err(nix::errno::Errno::ENOENT)
            }
            fn mknod(&self, _p: &str, _m: u32) -> NixResult<()> {
                Err(nix::errno::Errno::EROFS)
            }
            fn mkdir(&self, _p: &str, _m: u32) -> NixResult<()> {
                Err(nix::errno::Errno::EROFS)
            }
            fn symlink(&self, _p: &str, _t: &str) -> NixResult<()> {
                Err(nix::errno::Errno::EROFS)
            }
            fn unlink(&self, _p: &str) -> NixResult<()> {
                Err(nix::errno::Errno::EROFS)
            }
            fn rmdir(&self, _p: &str) -> NixResult<()> {
                Err(nix::errno::Errno::EROFS)
            }
            fn rename(&self, _f: &str, _t: &str) -> NixResult<()> {
                Err(nix::errno::Errno::EROFS)
            }
            fn link(&self, _p: &str, _n: &str) -> NixResult<()> {
                Err(nix::errno::Errno::EROFS)
            }
            fn chmod(&self, _p: &str, _m: u32) -> NixResult<()> {
                Err(nix::errno::Errno::EROFS)
            }
            fn chown(&self, _p: &str, _u: Option<u32>, _g: Option<u32>) -> NixResult<()> {
                Err(nix::errno::Errno::EROFS)
            }
            fn utimens(&self, _p: &str, _a: Option<i64>, _m: Option<i64>) -> NixResult<()> {
                Err(nix::errno::Errno::EROFS)
            }
        }
        Arc::new(Empty)
    }

    #[test]
    fn first_mutation_writes_keep_marker() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = Arc::new(PassThroughFs::new(dir.path().to_path_buf()));
        let union = UnionFs::new(vec![scratch, empty_readonly()]);
        let shard = Shard::new(union, dir.path().to_path_buf());

        assert!(!dir.path().join(".keep").exists());
        shard.mkdir("newdir", 0o755).unwrap();
        assert!(dir.path().join(".keep").exists());
    }
}
