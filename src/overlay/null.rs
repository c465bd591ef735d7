//! A shard whose factory returned nil is replaced by a null file system
//! that answers every operation with ENOENT/EPERM, so root-fs probes
//! cannot crash the mount.

use nix::errno::Errno;

use crate::unionfs::{Attr, DirEntry, Filesystem, NixResult};

pub struct NullFs;

impl Filesystem for NullFs {
    fn getattr(&self, _path: &str) -> NixResult<Attr> {
        Err(Errno::ENOENT)
    }
    fn open(&self, _path: &str, _write: bool) -> NixResult<u64> {
        Err(Errno::ENOENT)
    }
    fn release(&self, _fh: u64) -> NixResult<()> {
        Err(Errno::EPERM)
    }
    fn read(&self, _fh: u64, _offset: u64, _buf: &mut [u8]) -> NixResult<usize> {
        Err(Errno::EPERM)
    }
    fn write(&self, _fh: u64, _offset: u64, _data: &[u8]) -> NixResult<usize> {
        Err(Errno::EPERM)
    }
    fn readdir(&self, _path: &str) -> NixResult<Vec<DirEntry>> {
        Err(Errno::ENOENT)
    }
    fn readlink(&self, _path: &str) -> NixResult<String> {
        Err(Errno::ENOENT)
    }
    fn mknod(&self, _path: &str, _mode: u32) -> NixResult<()> {
        Err(Errno::EPERM)
    }
    fn mkdir(&self, _path: &str, _mode: u32) -> NixResult<()> {
        Err(Errno::EPERM)
    }
    fn symlink(&self, _path: &str, _target: &str) -> NixResult<()> {
        Err(Errno::EPERM)
    }
    fn unlink(&self, _path: &str) -> NixResult<()> {
        Err(Errno::EPERM)
    }
    fn rmdir(&self, _path: &str) -> NixResult<()> {
        Err(Errno::EPERM)
    }
    fn rename(&self, _from: &str, _to: &str) -> NixResult<()> {
        Err(Errno::EPERM)
    }
    fn link(&self, _path: &str, _newpath: &str) -> NixResult<()> {
        Err(Errno::EPERM)
    }
    fn chmod(&self, _path: &str, _mode: u32) -> NixResult<()> {
        Err(Errno::EPERM)
    }
    fn chown(&self, _path: &str, _uid: Option<u32>, _gid: Option<u32>) -> NixResult<()> {
        Err(Errno::EPERM)
    }
    fn utimens(&self, _path: &str, _atime: Option<i64>, _mtime: Option<i64>) -> NixResult<()> {
        Err(Errno::EPERM)
    }
}
