//! Packfile parsing.
//!
//! `PACK` magic, version 2, object count, then objects back to back, each
//! with a variable-length type/size prefix, zlib-deflated body. Deltas are
//! resolved against objects already streamed earlier in the same fetch
//! (ofs-delta: relative to an earlier offset in this pack; ref-delta: keyed
//! by the base object's hash, which may be a prior object in this stream or
//! one already present in the content store).

use std::collections::HashMap;
use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::{Error, Result};
use crate::hash::{Hasher, ObjectId};
use crate::object::Kind;
use crate::pack::delta;

const PACK_MAGIC: &[u8; 4] = b"PACK";
const OFS_DELTA: u8 = 6;
const REF_DELTA: u8 = 7;

/// a fully inflated object, tagged with its final (non-delta) kind
pub struct DecodedObject {
    pub hash: ObjectId,
    pub kind: Kind,
    pub data: Vec<u8>,
}

/// resolves ref-delta bases that are not present earlier in this stream;
/// returning `None` fails the parse with `PackFormat`.
pub trait BaseLookup {
    fn lookup(&self, hash: &ObjectId) -> Option<Vec<u8>>;
}

impl BaseLookup for () {
    fn lookup(&self, _hash: &ObjectId) -> Option<Vec<u8>> {
        None
    }
}

/// adapts a content store into a `BaseLookup`, so a ref-delta whose base is
/// missing from the current pack stream can still resolve against an
/// object a previous fetch already wrote to the store.
pub struct StoreBaseLookup<'a>(pub &'a dyn crate::store::Store);

impl BaseLookup for StoreBaseLookup<'_> {
    fn lookup(&self, hash: &ObjectId) -> Option<Vec<u8>> {
        self.0.read(hash).ok().flatten()
    }
}

/// parse a full packfile byte stream, invoking `on_object` for each fully
/// inflated object in the order encountered. Returning `Err` from the
/// callback aborts the fetch.
pub fn parse(
    bytes: &[u8],
    external_bases: &dyn BaseLookup,
    mut on_object: impl FnMut(ObjectId, Kind, &[u8]) -> Result<()>,
) -> Result<()> {
    if bytes.len() < 12 || &bytes[0..4] != PACK_MAGIC {
        return Err(Error::PackFormat("missing PACK magic".into()));
    }
    let version = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
    if version != 2 {
        return Err(Error::PackFormat(format!("unsupported pack version {version}")));
    }
    let count = u32::from_be_bytes(bytes[8..12].try_into().unwrap());

    if bytes.len() < 20 {
        return Err(Error::PackFormat("pack too short for trailer".into()));
    }
    let trailer = &bytes[bytes.len() - 20..];
    let mut running = Hasher::new();
    running.update(&bytes[..bytes.len() - 20]);
    if running.finalize().as_slice() != trailer {
        return Err(Error::PackFormat("packfile trailer hash mismatch".into()));
    }

    let mut cursor = 12usize;
    // offset -> (kind-if-base, bytes) for ofs-delta resolution, plus a hash index for ref-delta
    let mut by_offset: HashMap<usize, (Kind, Vec<u8>)> = HashMap::new();
    let mut by_hash: HashMap<ObjectId, (Kind, Vec<u8>)> = HashMap::new();

    for _ in 0..count {
        let obj_start = cursor;
        let (type_tag, inflated_size, header_len) = read_type_and_size(&bytes[cursor..])?;
        cursor += header_len;

        match type_tag {
            1..=4 => {
                let kind = Kind::from_pack_type(type_tag)
                    .ok_or_else(|| Error::PackFormat(format!("unknown object type {type_tag}")))?;
                let (data, consumed) = inflate_at(bytes, cursor, inflated_size)?;
                cursor += consumed;
                by_offset.insert(obj_start, (kind, data.clone()));
                by_hash.insert(ObjectId::of_loose_object(kind.as_str(), &data), (kind, data.clone()));
                on_object(ObjectId::of_loose_object(kind.as_str(), &data), kind, &data)?;
            }
            OFS_DELTA => {
                let (neg_offset, ofs_len) = read_offset_delta(&bytes[cursor..])?;
                cursor += ofs_len;
                let base_offset = obj_start
                    .checked_sub(neg_offset)
                    .ok_or_else(|| Error::PackFormat("ofs-delta base offset underflows".into()))?;
                let (base_kind, base_data) = by_offset
                    .get(&base_offset)
                    .cloned()
                    .ok_or_else(|| Error::PackFormat("ofs-delta base not found in stream".into()))?;
                let (delta_bytes, consumed) = inflate_at(bytes, cursor, inflated_size)?;
                cursor += consumed;
                let data = delta::apply(&base_data, &delta_bytes)?;
                let hash = ObjectId::of_loose_object(base_kind.as_str(), &data);
                by_offset.insert(obj_start, (base_kind, data.clone()));
                by_hash.insert(hash, (base_kind, data.clone()));
                on_object(hash, base_kind, &data)?;
            }
            REF_DELTA => {
                if cursor + 20 > bytes.len() {
                    return Err(Error::PackFormat("truncated ref-delta base hash".into()));
                }
                let mut base_hash_bytes = [0u8; 20];
                base_hash_bytes.copy_from_slice(&bytes[cursor..cursor + 20]);
                let base_hash = ObjectId::from_bytes(base_hash_bytes);
                cursor += 20;

                let (base_kind, base_data) = match by_hash.get(&base_hash) {
                    Some((k, d)) => (*k, d.clone()),
                    None => {
                        let external = external_bases
                            .lookup(&base_hash)
                            .ok_or_else(|| Error::PackFormat(format!(
                                "ref-delta base {base_hash} not streamed and not in store"
                            )))?;
                        // kind of an externally-supplied base is not re-derivable from
                        // bytes alone; callers are expected to have it classified already.
                        (Kind::Blob, external)
                    }
                };

                let (delta_bytes, consumed) = inflate_at(bytes, cursor, inflated_size)?;
                cursor += consumed;
                let data = delta::apply(&base_data, &delta_bytes)?;
                let hash = ObjectId::of_loose_object(base_kind.as_str(), &data);
                by_offset.insert(obj_start, (base_kind, data.clone()));
                by_hash.insert(hash, (base_kind, data.clone()));
                on_object(hash, base_kind, &data)?;
            }
            other => return Err(Error::PackFormat(format!("unknown pack object type {other}"))),
        }
    }

    Ok(())
}

/// read the variable-length type+size header: first byte's low 4 bits are
/// the low size bits, bits 4-6 the type, bit 7 a continuation flag; each
/// following byte contributes 7 more size bits, MSB-first continuation.
fn read_type_and_size(data: &[u8]) -> Result<(u8, u64, usize)> {
    let first = *data
        .first()
        .ok_or_else(|| Error::PackFormat("truncated object header".into()))?;
    let type_tag = (first >> 4) & 0x7;
    let mut size = u64::from(first & 0x0f);
    let mut shift = 4u32;
    let mut consumed = 1usize;
    let mut continued = first & 0x80 != 0;

    while continued {
        let byte = *data
            .get(consumed)
            .ok_or_else(|| Error::PackFormat("truncated object header".into()))?;
        size |= u64::from(byte & 0x7f) << shift;
        shift += 7;
        continued = byte & 0x80 != 0;
        consumed += 1;
    }

    Ok((type_tag, size, consumed))
}

/// ofs-delta's negative offset uses git's own base-128 variant (not the
/// generic delta varint): each byte contributes 7 bits, and every byte after
/// the first has 1 added before shifting, per `builtin/pack-objects.c`.
fn read_offset_delta(data: &[u8]) -> Result<(usize, usize)> {
    let mut consumed = 0usize;
    let first = *data
        .first()
        .ok_or_else(|| Error::PackFormat("truncated ofs-delta offset".into()))?;
    let mut value = u64::from(first & 0x7f);
    consumed += 1;
    let mut continued = first & 0x80 != 0;
    while continued {
        let byte = *data
            .get(consumed)
            .ok_or_else(|| Error::PackFormat("truncated ofs-delta offset".into()))?;
        value += 1;
        value = (value << 7) | u64::from(byte & 0x7f);
        continued = byte & 0x80 != 0;
        consumed += 1;
    }
    Ok((value as usize, consumed))
}

/// inflate a zlib stream starting at `start`, returning the inflated bytes
/// (checked against `expected_len`) and the number of compressed bytes consumed.
fn inflate_at(bytes: &[u8], start: usize, expected_len: u64) -> Result<(Vec<u8>, usize)> {
    let mut decoder = ZlibDecoder::new(&bytes[start..]);
    let mut out = Vec::with_capacity(expected_len as usize);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::PackFormat(format!("zlib inflate failed: {e}")))?;
    if out.len() as u64 != expected_len {
        return Err(Error::PackFormat(format!(
            "inflated size {} does not match header size {expected_len}",
            out.len()
        )));
    }
    let consumed = decoder.total_in() as usize;
    Ok((out, consumed))
}
