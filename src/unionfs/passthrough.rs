//! Pass-through file system: a `Filesystem` backed directly by a real
//! directory on disk, used as the writable layer 0 of an overlay shard.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::collections::HashMap;

use nix::errno::Errno;
use nix::sys::stat::{utimensat, UtimensatFlags};
use nix::sys::time::TimeSpec;
use nix::unistd::{chown, Gid, Uid};

use crate::unionfs::{Attr, DirEntry, FileKind, Filesystem, NixResult};

fn map_io_err(e: std::io::Error) -> Errno {
    e.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::EIO)
}

pub struct PassThroughFs {
    root: PathBuf,
    next_fh: AtomicU64,
    handles: Mutex<HashMap<u64, File>>,
}

impl PassThroughFs {
    pub fn new(root: PathBuf) -> Self {
        Self { root, next_fh: AtomicU64::new(0), handles: Mutex::new(HashMap::new()) }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl Filesystem for PassThroughFs {
    fn getattr(&self, path: &str) -> NixResult<Attr> {
        let meta = fs::symlink_metadata(self.full_path(path)).map_err(map_io_err)?;
        let kind = if meta.file_type().is_dir() {
            FileKind::Directory
        } else if meta.file_type().is_symlink() {
            FileKind::Symlink
        } else {
            FileKind::File
        };
        Ok(Attr { kind, size: meta.len(), mode: meta.mode() & 0o7777, mtime: meta.mtime() })
    }

    fn open(&self, path: &str, write: bool) -> NixResult<u64> {
        let file = OpenOptions::new()
            .read(true)
            .write(write)
            .create(write)
            .open(self.full_path(path))
            .map_err(map_io_err)?;
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().unwrap().insert(fh, file);
        Ok(fh)
    }

    fn release(&self, fh: u64) -> NixResult<()> {
        self.handles.lock().unwrap().remove(&fh);
        Ok(())
    }

    fn read(&self, fh: u64, offset: u64, buf: &mut [u8]) -> NixResult<usize> {
        let mut handles = self.handles.lock().unwrap();
        let file = handles.get_mut(&fh).ok_or(Errno::EBADF)?;
        file.seek(SeekFrom::Start(offset)).map_err(map_io_err)?;
        file.read(buf).map_err(map_io_err)
    }

    fn write(&self, fh: u64, offset: u64, data: &[u8]) -> NixResult<usize> {
        let mut handles = self.handles.lock().unwrap();
        let file = handles.get_mut(&fh).ok_or(Errno::EBADF)?;
        file.seek(SeekFrom::Start(offset)).map_err(map_io_err)?;
        file.write(data).map_err(map_io_err)
    }

    fn flush(&self, fh: u64) -> NixResult<()> {
        let mut handles = self.handles.lock().unwrap();
        handles.get_mut(&fh).ok_or(Errno::EBADF)?.flush().map_err(map_io_err)
    }

    fn fsync(&self, fh: u64, _datasync: bool) -> NixResult<()> {
        let handles = self.handles.lock().unwrap();
        handles.get(&fh).ok_or(Errno::EBADF)?.sync_all().map_err(map_io_err)
    }

    fn readdir(&self, path: &str) -> NixResult<Vec<DirEntry>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(self.full_path(path)).map_err(map_io_err)? {
            let entry = entry.map_err(map_io_err)?;
            let ft = entry.file_type().map_err(map_io_err)?;
            let kind = if ft.is_dir() {
                FileKind::Directory
            } else if ft.is_symlink() {
                FileKind::Symlink
            } else {
                FileKind::File
            };
            out.push(DirEntry { name: entry.file_name().to_string_lossy().into_owned(), kind });
        }
        Ok(out)
    }

    fn readlink(&self, path: &str) -> NixResult<String> {
        let target = fs::read_link(self.full_path(path)).map_err(map_io_err)?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn mknod(&self, path: &str, mode: u32) -> NixResult<()> {
        let file = File::create(self.full_path(path)).map_err(map_io_err)?;
        file.set_permissions(fs::Permissions::from_mode(mode)).map_err(map_io_err)
    }

    fn mkdir(&self, path: &str, mode: u32) -> NixResult<()> {
        fs::create_dir(self.full_path(path)).map_err(map_io_err)?;
        fs::set_permissions(self.full_path(path), fs::Permissions::from_mode(mode)).map_err(map_io_err)
    }

    fn symlink(&self, path: &str, target: &str) -> NixResult<()> {
        symlink(target, self.full_path(path)).map_err(map_io_err)
    }

    fn unlink(&self, path: &str) -> NixResult<()> {
        fs::remove_file(self.full_path(path)).map_err(map_io_err)
    }

    fn rmdir(&self, path: &str) -> NixResult<()> {
        fs::remove_dir(self.full_path(path)).map_err(map_io_err)
    }

    fn rename(&self, from: &str, to: &str) -> NixResult<()> {
        fs::rename(self.full_path(from), self.full_path(to)).map_err(map_io_err)
    }

    fn link(&self, path: &str, newpath: &str) -> NixResult<()> {
        fs::hard_link(self.full_path(path), self.full_path(newpath)).map_err(map_io_err)
    }

    fn chmod(&self, path: &str, mode: u32) -> NixResult<()> {
        fs::set_permissions(self.full_path(path), fs::Permissions::from_mode(mode)).map_err(map_io_err)
    }

    fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> NixResult<()> {
        chown(&self.full_path(path), uid.map(Uid::from_raw), gid.map(Gid::from_raw))
    }

    fn utimens(&self, path: &str, atime: Option<i64>, mtime: Option<i64>) -> NixResult<()> {
        // the POSIX UTIME_OMIT nsec sentinel, used instead of a libc dependency.
        const UTIME_OMIT_NSEC: i64 = 1_073_741_822;
        let omit = TimeSpec::new(0, UTIME_OMIT_NSEC);
        let a = atime.map(|s| TimeSpec::new(s, 0)).unwrap_or(omit);
        let m = mtime.map(|s| TimeSpec::new(s, 0)).unwrap_or(omit);
        utimensat(nix::fcntl::AT_FDCWD, &self.full_path(path), &a, &m, UtimensatFlags::NoFollowSymlink)
    }

    fn getxattr(&self, path: &str, name: &str) -> NixResult<Vec<u8>> {
        xattr::get(self.full_path(path), name)
            .map_err(map_io_err)?
            .ok_or(Errno::ENODATA)
    }

    fn setxattr(&self, path: &str, name: &str, value: &[u8]) -> NixResult<()> {
        xattr::set(self.full_path(path), name, value).map_err(map_io_err)
    }

    fn listxattr(&self, path: &str) -> NixResult<Vec<String>> {
        let names = xattr::list(self.full_path(path)).map_err(map_io_err)?;
        Ok(names.map(|n| n.to_string_lossy().into_owned()).collect())
    }

    fn removexattr(&self, path: &str, name: &str) -> NixResult<()> {
        xattr::remove(self.full_path(path), name).map_err(map_io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips_through_real_files() {
        let dir = tempfile::tempdir().unwrap();
        let fs = PassThroughFs::new(dir.path().to_path_buf());

        fs.mknod("f.txt", 0o644).unwrap();
        let fh = fs.open("f.txt", true).unwrap();
        fs.write(fh, 0, b"hello").unwrap();
        fs.release(fh).unwrap();

        let fh2 = fs.open("f.txt", false).unwrap();
        let mut buf = [0u8; 5];
        fs.read(fh2, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn mkdir_then_readdir_lists_children() {
        let dir = tempfile::tempdir().unwrap();
        let fs = PassThroughFs::new(dir.path().to_path_buf());
        fs.mkdir("sub", 0o755).unwrap();
        fs.mknod("sub/a.txt", 0o644).unwrap();

        let entries = fs.readdir("sub").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");
    }

    #[test]
    fn symlink_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let fs = PassThroughFs::new(dir.path().to_path_buf());
        fs.symlink("link", "../target").unwrap();
        assert_eq!(fs.readlink("link").unwrap(), "../target");
    }

    #[test]
    fn getattr_on_missing_path_is_enoent() {
        let dir = tempfile::tempdir().unwrap();
        let fs = PassThroughFs::new(dir.path().to_path_buf());
        assert_eq!(fs.getattr("nope").unwrap_err(), Errno::ENOENT);
    }
}
