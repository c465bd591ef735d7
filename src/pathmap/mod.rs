//! Path map: a journaled, crash-safe map from path fingerprint to
//! visibility tag.

pub mod journal;

use std::collections::HashMap;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// 15-byte fingerprint body used as the in-memory map key (the 16th byte of
/// the on-disk record carries the tag, not path identity).
pub type FingerprintBody = [u8; 15];

/// visibility tag recorded per path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    Unknown,
    Opaque,
    Whiteout,
    NotExist,
    Layer(u8),
}

const UNKNOWN_BYTE: u8 = 127;
const OPAQUE_BYTE: u8 = 126;
const WHITEOUT_BYTE: u8 = 125;
const NOTEXIST_BYTE: u8 = 124;
const MAX_LAYER: u8 = 123;

impl Tag {
    pub fn to_byte(self) -> u8 {
        match self {
            Tag::Unknown => UNKNOWN_BYTE,
            Tag::Opaque => OPAQUE_BYTE,
            Tag::Whiteout => WHITEOUT_BYTE,
            Tag::NotExist => NOTEXIST_BYTE,
            Tag::Layer(i) => i,
        }
    }

    pub fn from_byte(b: u8) -> Result<Tag> {
        match b {
            UNKNOWN_BYTE => Ok(Tag::Unknown),
            OPAQUE_BYTE => Ok(Tag::Opaque),
            WHITEOUT_BYTE => Ok(Tag::Whiteout),
            NOTEXIST_BYTE => Ok(Tag::NotExist),
            i if i <= MAX_LAYER => Ok(Tag::Layer(i)),
            other => Err(Error::JournalCorrupt(format!("invalid visibility tag byte {other}"))),
        }
    }

    /// the "kind" used to decide dirtiness on `set`: any two layer indices
    /// are the same kind as each other, but distinct from the four
    /// structural tags.
    fn kind(self) -> u8 {
        match self {
            Tag::Unknown => 0,
            Tag::Opaque => 1,
            Tag::Whiteout => 2,
            Tag::NotExist => 3,
            Tag::Layer(_) => 4,
        }
    }
}

struct Entry {
    tag: Tag,
    dirty: bool,
}

/// SHA-256 of the case-folded path, truncated to 16 bytes; the leading byte
/// is overwritten by the tag when the record is written to disk, so only
/// the trailing 15 bytes identify the path.
pub fn fingerprint(path: &str) -> [u8; 16] {
    let mut hasher = Sha256::new();
    hasher.update(path.to_uppercase().as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

pub(crate) fn fingerprint_body(path: &str) -> FingerprintBody {
    let full = fingerprint(path);
    let mut body = [0u8; 15];
    body.copy_from_slice(&full[1..]);
    body
}

/// yields `""`, `"a"`, `"a/b"`, `"a/b/c"` for input `"a/b/c"`: ancestors
/// root-to-leaf, matching the walk order `get` needs to detect an OPAQUE
/// ancestor before returning the leaf's own tag.
fn prefixes(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut acc = String::new();
    for (i, component) in path.split('/').filter(|s| !s.is_empty()).enumerate() {
        if i > 0 {
            acc.push('/');
        }
        acc.push_str(component);
        out.push(acc.clone());
    }
    out
}

pub struct PathMap {
    entries: Mutex<HashMap<FingerprintBody, Entry>>,
}

impl Default for PathMap {
    fn default() -> Self {
        Self::new()
    }
}

impl PathMap {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// `(isopaque, tag)` for the full path; `isopaque` is set if any
    /// ancestor (or the path itself) carries `Opaque`.
    pub fn get(&self, path: &str) -> (bool, Tag) {
        let guard = self.entries.lock().unwrap();
        let mut isopaque = false;
        for ancestor in prefixes(path) {
            let key = fingerprint_body(&ancestor);
            if let Some(entry) = guard.get(&key) {
                if entry.tag == Tag::Opaque {
                    isopaque = true;
                }
            }
        }
        let leaf = guard.get(&fingerprint_body(path)).map(|e| e.tag).unwrap_or(Tag::Unknown);
        (isopaque, leaf)
    }

    /// unions a new tag into the full-path bucket; marks dirty iff the
    /// semantic kind changed.
    pub fn set(&self, path: &str, v: Tag) {
        let key = fingerprint_body(path);
        let mut guard = self.entries.lock().unwrap();
        match guard.get_mut(&key) {
            Some(entry) => {
                if entry.tag.kind() != v.kind() {
                    entry.dirty = true;
                }
                entry.tag = v;
            }
            None => {
                let dirty = v.kind() != Tag::Unknown.kind();
                guard.insert(key, Entry { tag: v, dirty });
            }
        }
    }

    /// like `set`, but a no-op if the path has no entry yet (still `Unknown`).
    pub fn set_if(&self, path: &str, v: Tag) {
        let key = fingerprint_body(path);
        let guard = self.entries.lock().unwrap();
        if guard.contains_key(&key) {
            drop(guard);
            self.set(path, v);
        }
    }

    pub fn has(&self, path: &str) -> bool {
        let key = fingerprint_body(path);
        self.entries.lock().unwrap().contains_key(&key)
    }

    pub fn is_dirty(&self, path: &str) -> bool {
        let key = fingerprint_body(path);
        self.entries.lock().unwrap().get(&key).map(|e| e.dirty).unwrap_or(false)
    }

    /// drops in-memory `UNKNOWN`/`NOTEXIST` entries that are clean, retaining
    /// `WHITEOUT`/`OPAQUE` (and any layer index) regardless of dirtiness.
    pub fn purge(&self) {
        let mut guard = self.entries.lock().unwrap();
        guard.retain(|_, entry| entry.dirty || !matches!(entry.tag, Tag::Unknown | Tag::NotExist));
    }

    pub fn dirty_records(&self) -> Vec<(FingerprintBody, Tag)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(k, e)| (*k, e.tag))
            .collect()
    }

    pub fn all_records(&self) -> Vec<(FingerprintBody, Tag)> {
        self.entries.lock().unwrap().iter().map(|(k, e)| (*k, e.tag)).collect()
    }

    pub fn clear_dirty(&self, keys: &[FingerprintBody]) {
        let mut guard = self.entries.lock().unwrap();
        for key in keys {
            if let Some(entry) = guard.get_mut(key) {
                entry.dirty = false;
            }
        }
    }

    /// used by journal replay: installs records from a committed transaction.
    /// `replace` mirrors the `S` command (clears the map first); `A` merges.
    pub fn apply_committed(&self, records: &[(FingerprintBody, Tag)], replace: bool) {
        let mut guard = self.entries.lock().unwrap();
        if replace {
            guard.clear();
        }
        for (key, tag) in records {
            guard.insert(*key, Entry { tag: *tag, dirty: false });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
