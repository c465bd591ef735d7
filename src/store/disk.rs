use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};
use crate::hash::ObjectId;
use crate::store::{RandomAccessReader, Store};

/// `<cache>/objects/XX/YYYY…` content-addressed store with atomic writes:
/// temp file, fsync, then rename into place.
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self { root: cache_dir.into().join("objects") }
    }

    fn object_path(&self, hash: &ObjectId) -> PathBuf {
        let (dir, file) = hash.to_path_components();
        self.root.join(dir).join(file)
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn fsync_dir(path: &Path) -> Result<()> {
        let dir = File::open(path).with_path(path)?;
        dir.sync_all().with_path(path)
    }
}

impl Store for DiskStore {
    fn read(&self, hash: &ObjectId) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(hash);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_path(path),
        }
    }

    fn stat(&self, hash: &ObjectId) -> Result<Option<u64>> {
        let path = self.object_path(hash);
        match fs::metadata(&path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_path(path),
        }
    }

    fn open_reader(&self, hash: &ObjectId) -> Result<Option<Box<dyn RandomAccessReader>>> {
        let path = self.object_path(hash);
        match File::open(&path) {
            Ok(file) => Ok(Some(Box::new(DiskReader { file }))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_path(path),
        }
    }

    fn write(&self, hash: &ObjectId, bytes: &[u8]) -> Result<()> {
        let path = self.object_path(hash);
        if path.exists() {
            return Ok(());
        }
        let dir = path.parent().expect("object path always has a parent");
        fs::create_dir_all(dir).with_path(dir)?;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).with_path(dir)?;

        let tmp_dir = self.tmp_dir();
        fs::create_dir_all(&tmp_dir).with_path(&tmp_dir)?;
        let tmp_path = tmp_dir.join(uuid::Uuid::new_v4().to_string());

        {
            let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
            tmp_file.write_all(bytes).with_path(&tmp_path)?;
            tmp_file.sync_all().with_path(&tmp_path)?;
        }

        fs::rename(&tmp_path, &path).with_path(&path)?;
        Self::fsync_dir(dir)
    }
}

struct DiskReader {
    file: File,
}

impl Read for DiskReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl RandomAccessReader for DiskReader {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let path = PathBuf::from("<object>");
        self.file.seek(SeekFrom::Start(offset)).with_path(&path)?;
        self.file.read(buf).with_path(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        let hash = ObjectId::of_loose_object("blob", b"hello");
        store.write(&hash, b"hello").unwrap();

        assert_eq!(store.read(&hash).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.stat(&hash).unwrap(), Some(5));
    }

    #[test]
    fn missing_object_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        let hash = ObjectId::of_loose_object("blob", b"absent");
        assert_eq!(store.read(&hash).unwrap(), None);
        assert_eq!(store.stat(&hash).unwrap(), None);
        assert!(store.open_reader(&hash).unwrap().is_none());
    }

    #[test]
    fn write_is_idempotent_on_existing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        let hash = ObjectId::of_loose_object("blob", b"dup");
        store.write(&hash, b"dup").unwrap();
        store.write(&hash, b"dup").unwrap();
        assert_eq!(store.read(&hash).unwrap(), Some(b"dup".to_vec()));
    }

    #[test]
    fn open_reader_supports_random_access() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        let hash = ObjectId::of_loose_object("blob", b"0123456789");
        store.write(&hash, b"0123456789").unwrap();

        let mut reader = store.open_reader(&hash).unwrap().unwrap();
        let mut buf = [0u8; 4];
        let n = reader.read_at(3, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"3456");
    }

    #[test]
    fn object_directories_created_with_mode_0700() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        let hash = ObjectId::of_loose_object("blob", b"perm");
        store.write(&hash, b"perm").unwrap();

        let (subdir, _) = hash.to_path_components();
        let meta = fs::metadata(dir.path().join("objects").join(subdir)).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o700);
    }
}
