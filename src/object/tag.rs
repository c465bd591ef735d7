use crate::error::{Error, Result};
use crate::hash::ObjectId;
use crate::object::Kind;

/// a decoded tag object, kept minimal: only enough to confirm the tagged
/// object and its kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub object: ObjectId,
    pub kind: Kind,
    pub tag: String,
}

pub fn decode(body: &[u8]) -> Result<Tag> {
    let text = std::str::from_utf8(body).map_err(|_| Error::PackFormat("tag body is not utf-8".into()))?;
    let mut object = None;
    let mut kind = None;
    let mut tag = None;

    for line in text.split('\n') {
        if line.is_empty() {
            break;
        }
        if let Some(rest) = line.strip_prefix("object ") {
            object = Some(ObjectId::from_hex(rest.trim())?);
        } else if let Some(rest) = line.strip_prefix("type ") {
            kind = Some(
                Kind::from_str(rest.trim())
                    .ok_or_else(|| Error::PackFormat(format!("unknown tagged type {rest:?}")))?,
            );
        } else if let Some(rest) = line.strip_prefix("tag ") {
            tag = Some(rest.trim().to_string());
        }
    }

    Ok(Tag {
        object: object.ok_or_else(|| Error::PackFormat("tag missing object header".into()))?,
        kind: kind.ok_or_else(|| Error::PackFormat("tag missing type header".into()))?,
        tag: tag.unwrap_or_default(),
    })
}
