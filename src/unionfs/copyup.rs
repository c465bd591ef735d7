//! Copy-up operations: materialize a path from a read-only layer onto the
//! writable layer 0 before a mutation is allowed to proceed against it.

use crate::unionfs::{Filesystem, NixResult};

const CHUNK_SIZE: usize = 64 * 1024;

pub fn copy_up_file(source: &dyn Filesystem, dest: &dyn Filesystem, path: &str, mode: u32) -> NixResult<()> {
    if dest.getattr(path).is_err() {
        dest.mknod(path, mode)?;
    }
    let _ = dest.chmod(path, mode);

    let src_fh = source.open(path, false)?;
    let dst_fh = dest.open(path, true)?;

    let mut offset = 0u64;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = source.read(src_fh, offset, &mut buf)?;
        if n == 0 {
            break;
        }
        dest.write(dst_fh, offset, &buf[..n])?;
        offset += n as u64;
    }

    dest.flush(dst_fh)?;
    source.release(src_fh)?;
    dest.release(dst_fh)?;
    Ok(())
}

pub fn copy_up_directory(source: &dyn Filesystem, dest: &dyn Filesystem, path: &str, mode: u32) -> NixResult<()> {
    if dest.getattr(path).is_err() {
        // mask to 0777 and drop setuid/setgid/sticky bits, per the
        // "masked to 0777" copy-up rule.
        dest.mkdir(path, mode & 0o777)?;
    }
    let attr = source.getattr(path)?;
    let _ = dest.chmod(path, attr.mode & 0o777);
    Ok(())
}

pub fn copy_up_symlink(source: &dyn Filesystem, dest: &dyn Filesystem, path: &str) -> NixResult<()> {
    let target = source.readlink(path)?;
    if dest.getattr(path).is_err() {
        dest.symlink(path, &target)?;
    }
    Ok(())
}
