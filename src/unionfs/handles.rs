//! Open-file table: a synthesized `wrapfh -> file{layer, inner-fh}` map,
//! plus a fingerprint-keyed index of writable opens so a copy-up can
//! rebind them onto layer 0 atomically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use nix::errno::Errno;

use crate::pathmap::fingerprint_body;
use crate::unionfs::{Filesystem, NixResult};

#[derive(Clone, Copy, Debug)]
pub struct OpenFile {
    pub layer: usize,
    pub inner_fh: u64,
}

pub struct HandleTable {
    next: AtomicU64,
    files: Mutex<HashMap<u64, OpenFile>>,
    /// only writable opens are tracked here; read-only handles never need
    /// to move when a copy-up happens underneath them.
    writable_by_path: Mutex<HashMap<[u8; 15], Vec<(u64, String)>>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(0), files: Mutex::new(HashMap::new()), writable_by_path: Mutex::new(HashMap::new()) }
    }

    pub fn insert(&self, path: &str, layer: usize, inner_fh: u64, writable: bool) -> u64 {
        let wrapfh = self.next.fetch_add(1, Ordering::SeqCst);
        self.files.lock().unwrap().insert(wrapfh, OpenFile { layer, inner_fh });
        if writable {
            self.writable_by_path
                .lock()
                .unwrap()
                .entry(fingerprint_body(path))
                .or_default()
                .push((wrapfh, path.to_string()));
        }
        wrapfh
    }

    pub fn get(&self, wrapfh: u64) -> NixResult<OpenFile> {
        self.files.lock().unwrap().get(&wrapfh).copied().ok_or(Errno::EBADF)
    }

    pub fn remove(&self, wrapfh: u64) -> Option<OpenFile> {
        self.files.lock().unwrap().remove(&wrapfh)
    }

    /// closes every writable handle open on `path` against its current
    /// layer and reopens it on layer 0 under the same `wrapfh`, per the
    /// copy-up contract ("invalidate any existing open handles for that
    /// path so they re-bind to layer 0").
    pub fn rebind_to_layer0(&self, path: &str, layers: &[std::sync::Arc<dyn Filesystem>]) -> NixResult<()> {
        let key = fingerprint_body(path);
        let entries = self.writable_by_path.lock().unwrap().get(&key).cloned().unwrap_or_default();

        for (wrapfh, entry_path) in entries {
            if entry_path != path {
                continue;
            }
            let old = match self.files.lock().unwrap().get(&wrapfh).copied() {
                Some(o) if o.layer != 0 => o,
                _ => continue,
            };
            let _ = layers[old.layer].release(old.inner_fh);
            let new_fh = layers[0].open(path, true)?;
            self.files.lock().unwrap().insert(wrapfh, OpenFile { layer: 0, inner_fh: new_fh });
        }
        Ok(())
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
