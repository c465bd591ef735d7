use std::collections::HashMap;
use std::io::Cursor;
use std::sync::RwLock;

use crate::error::Result;
use crate::hash::ObjectId;
use crate::store::{RandomAccessReader, Store};

/// ephemeral in-memory store, scoped to a single fetch, used when no
/// on-disk cache directory is configured.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<ObjectId, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn read(&self, hash: &ObjectId) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.read().unwrap().get(hash).cloned())
    }

    fn stat(&self, hash: &ObjectId) -> Result<Option<u64>> {
        Ok(self.objects.read().unwrap().get(hash).map(|b| b.len() as u64))
    }

    fn open_reader(&self, hash: &ObjectId) -> Result<Option<Box<dyn RandomAccessReader>>> {
        let bytes = self.objects.read().unwrap().get(hash).cloned();
        Ok(bytes.map(|b| Box::new(MemoryReader(Cursor::new(b))) as Box<dyn RandomAccessReader>))
    }

    fn write(&self, hash: &ObjectId, bytes: &[u8]) -> Result<()> {
        self.objects.write().unwrap().entry(*hash).or_insert_with(|| bytes.to_vec());
        Ok(())
    }
}

struct MemoryReader(Cursor<Vec<u8>>);

impl std::io::Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::io::Read::read(&mut self.0, buf)
    }
}

impl RandomAccessReader for MemoryReader {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        use std::io::{Seek, SeekFrom};
        self.0.seek(SeekFrom::Start(offset)).expect("in-memory seek cannot fail");
        Ok(std::io::Read::read(&mut self.0, buf).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let store = MemoryStore::new();
        let hash = ObjectId::of_loose_object("blob", b"hello");
        store.write(&hash, b"hello").unwrap();
        assert_eq!(store.read(&hash).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.stat(&hash).unwrap(), Some(5));
    }

    #[test]
    fn missing_object_reads_as_none() {
        let store = MemoryStore::new();
        let hash = ObjectId::of_loose_object("blob", b"absent");
        assert_eq!(store.read(&hash).unwrap(), None);
    }
}
