//! Git object identity (SHA-1) used throughout the pack client, object
//! decoder and content store.

use std::fmt;

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// a git object id: the SHA-1 of a loose object's `"<type> <size>\0<body>"`
/// encoding, as advertised by the pack protocol.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    pub const NULL: ObjectId = ObjectId([0u8; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// parse a 40-character hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != 40 {
            return Err(Error::InvalidRef(format!(
                "object id must be 40 hex chars, got {}",
                s.len()
            )));
        }
        let bytes = hex::decode(s).map_err(|_| Error::InvalidRef(format!("invalid hex: {s}")))?;
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// true if `s` is exactly 40 hex characters
    pub fn looks_like_hex(s: &str) -> bool {
        s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// split into the `objects/XX/YYYY…` path components used by the content store
    pub fn to_path_components(&self) -> (String, String) {
        let hex = self.to_hex();
        (hex[..2].to_string(), hex[2..].to_string())
    }

    /// hash a fully-formed loose-object byte stream (`"<kind> <len>\0<body>"`)
    pub fn of_loose_object(kind: &str, body: &[u8]) -> Self {
        let header = format!("{kind} {}\0", body.len());
        let mut hasher = Sha1::new();
        hasher.update(header.as_bytes());
        hasher.update(body);
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..12])
    }
}

impl serde::Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// running SHA-1 over a byte stream, used to verify a packfile's trailing checksum
/// and to hash inflated object bodies as they stream in.
pub struct Hasher(Sha1);

impl Hasher {
    pub fn new() -> Self {
        Self(Sha1::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> [u8; 20] {
        self.0.finalize().into()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
